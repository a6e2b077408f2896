//! Failure kinds a single log fetch can end in.

/// Why one fetch against the build console failed.
///
/// The streamer treats every variant the same way (the stream becomes
/// `Failed`), but keeps the original value around so it can be shown.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport-level failure: connect, timeout, reading the body.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx answer that is not an auth rejection.
    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    /// 401 or 403.
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    /// The response does not follow the progressive text contract.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FetchError {
    /// Maps a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth { status },
            _ => Self::Server { status },
        }
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_distinguished() {
        assert!(matches!(FetchError::from_status(401), FetchError::Auth { status: 401 }));
        assert!(matches!(FetchError::from_status(403), FetchError::Auth { status: 403 }));
        assert!(matches!(FetchError::from_status(500), FetchError::Server { status: 500 }));
        assert!(matches!(FetchError::from_status(404), FetchError::Server { status: 404 }));
    }

    #[test]
    fn display_includes_status() {
        assert_eq!(FetchError::Server { status: 502 }.to_string(), "server error (HTTP 502)");
        assert_eq!(
            FetchError::Auth { status: 401 }.to_string(),
            "authentication rejected (HTTP 401)"
        );
    }

    #[test]
    fn protocol_is_flagged() {
        let e = FetchError::Protocol("missing X-Text-Size".into());
        assert!(e.is_protocol());
        assert_eq!(e.to_string(), "protocol error: missing X-Text-Size");
        assert!(!FetchError::Server { status: 500 }.is_protocol());
    }
}
