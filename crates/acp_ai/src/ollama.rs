use std::time::Duration;

use acp_core::error::{AppError, OLLAMA_UNHEALTHY, OLLAMA_UNREACHABLE};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
}

impl OllamaClient {
    /// Create a client for an Ollama server given as `http(s)://host[:port]`.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();

        let rest = base_url
            .strip_prefix("http://")
            .or_else(|| base_url.strip_prefix("https://"))
            .ok_or_else(|| invalid_url(&base_url, "scheme must be http or https"))?;

        if rest.is_empty() {
            return Err(invalid_url(&base_url, "host is missing"));
        }
        if rest.contains('/') || rest.contains('@') || rest.contains('?') || rest.contains('#') {
            return Err(invalid_url(&base_url, "only scheme, host and port are allowed"));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((h, p)) if !h.ends_with(']') && !h.contains(':') => (h, Some(p)),
            Some((h, p)) if h.starts_with('[') && h.ends_with(']') => (h, Some(p)),
            _ => (rest, None),
        };
        if host.is_empty() {
            return Err(invalid_url(&base_url, "host is missing"));
        }
        if let Some(p) = port {
            match p.parse::<u16>() {
                Ok(n) if n > 0 => {}
                _ => return Err(invalid_url(&base_url, "port must be in 1..=65535")),
            }
        }

        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url).timeout(Duration::from_millis(800)).call();

        match resp {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(unhealthy(r.status())),
            Err(ureq::Error::Status(status, _)) => Err(unhealthy(status)),
            Err(e) => Err(AppError::new(OLLAMA_UNREACHABLE, "Failed to reach Ollama")
                .with_details(e.to_string())
                .with_retryable(true)),
        }
    }
}

/// Map a ureq failure to a pipeline error. Transport failures, 429 and 5xx are retryable;
/// other statuses mean the request itself was rejected.
pub(crate) fn map_ureq_error(code: &str, message: &str, err: ureq::Error) -> AppError {
    match err {
        ureq::Error::Status(status, resp) => {
            let body = resp.into_string().unwrap_or_default();
            let retryable = status == 429 || status >= 500;
            AppError::new(code, message)
                .with_details(format!("status={status}; body={}", truncate(&body, 300)))
                .with_retryable(retryable)
        }
        ureq::Error::Transport(t) => AppError::new(code, message)
            .with_details(t.to_string())
            .with_retryable(true),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn unhealthy(status: u16) -> AppError {
    AppError::new(OLLAMA_UNHEALTHY, "Ollama health check failed")
        .with_details(format!("status={status}"))
        .with_retryable(status == 429 || status >= 500)
}

fn invalid_url(base_url: &str, problem: &str) -> AppError {
    AppError::invalid_config("Invalid Ollama base URL")
        .with_details(format!("base_url={base_url}; {problem}"))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use acp_core::error::{OLLAMA_UNHEALTHY, OLLAMA_UNREACHABLE};

    use super::OllamaClient;

    /// Answers a single HTTP request with `status_line` and an empty body.
    fn one_shot_server(status_line: &'static str) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let resp = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = stream.write_all(resp.as_bytes());
            }
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn health_check_reports_server_errors_as_unhealthy() {
        let (url, server) = one_shot_server("503 Service Unavailable");
        let err = OllamaClient::new(&url)
            .expect("client")
            .health_check()
            .expect_err("unhealthy");
        server.join().expect("server");
        assert_eq!(err.code, OLLAMA_UNHEALTHY);
        assert_eq!(err.details.as_deref(), Some("status=503"));
        assert!(err.retryable);
    }

    #[test]
    fn health_check_reports_closed_port_as_unreachable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let err = OllamaClient::new(&format!("http://127.0.0.1:{port}"))
            .expect("client")
            .health_check()
            .expect_err("unreachable");
        assert_eq!(err.code, OLLAMA_UNREACHABLE);
    }

    #[test]
    fn validates_base_url_shape() {
        assert!(OllamaClient::new("http://127.0.0.1:11434").is_ok());
        assert!(OllamaClient::new("http://localhost").is_ok());
        assert!(OllamaClient::new("https://ollama.internal:443/").is_ok()); // trailing slash is trimmed
        assert!(OllamaClient::new("http://[::1]:11434").is_ok());

        assert!(OllamaClient::new("ftp://127.0.0.1:11434").is_err());
        assert!(OllamaClient::new("http://").is_err());
        assert!(OllamaClient::new("http://127.0.0.1@evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:0").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:99999").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:11434/api").is_err());
    }
}
