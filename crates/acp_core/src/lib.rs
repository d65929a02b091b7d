pub mod cancel;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod retry;
