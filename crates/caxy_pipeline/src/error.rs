//! Error types for the proxy pipeline.

use std::fmt;

#[derive(Debug)]
pub enum PipelineError {
    /// Missing or unparseable target URL.
    BadRequest(String),
    /// The origin could not be reached or broke the wire protocol.
    BadGateway(String),
    /// Unexpected internal failure before any response bytes were written.
    Internal(String),
    /// Writing to the client failed after the response head was flushed.
    /// Nothing can be recovered; the caller logs and drops the connection.
    ClientWrite(anyhow::Error),
}

impl PipelineError {
    /// Status code for the error envelope, or `None` once the response head
    /// is already on the wire.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PipelineError::BadRequest(_) => Some(400),
            PipelineError::BadGateway(_) => Some(502),
            PipelineError::Internal(_) => Some(500),
            PipelineError::ClientWrite(_) => None,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::BadRequest(msg) => write!(f, "{msg}"),
            PipelineError::BadGateway(msg) => write!(f, "{msg}"),
            PipelineError::Internal(msg) => write!(f, "{msg}"),
            PipelineError::ClientWrite(err) => write!(f, "client write failed: {err}"),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PipelineError::BadRequest("no url".into()).status_code(),
            Some(400)
        );
        assert_eq!(
            PipelineError::BadGateway("refused".into()).status_code(),
            Some(502)
        );
        assert_eq!(
            PipelineError::Internal("bug".into()).status_code(),
            Some(500)
        );
        assert_eq!(
            PipelineError::ClientWrite(anyhow::anyhow!("broken pipe")).status_code(),
            None
        );
    }

    #[test]
    fn test_display_is_the_bare_message() {
        let err = PipelineError::BadRequest("No target URL provided".into());
        assert_eq!(err.to_string(), "No target URL provided");
    }
}
