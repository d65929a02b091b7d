use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AppError, QUERY_CANCELLED};

/// Cooperative cancellation flag shared between a caller and the work it started.
///
/// Clones observe the same flag. Pipeline stages poll it between steps; nothing is interrupted
/// mid-call, so an in-flight external request still ends at its own timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self, stage: &str) -> Result<(), AppError> {
        if self.is_cancelled() {
            return Err(AppError::new(QUERY_CANCELLED, "Query was cancelled by the caller")
                .with_details(format!("stage={stage}")));
        }
        Ok(())
    }
}

/// Poll an optional token; `None` never cancels.
pub fn check_cancelled(token: Option<&CancelToken>, stage: &str) -> Result<(), AppError> {
    match token {
        Some(t) => t.check(stage),
        None => Ok(()),
    }
}
