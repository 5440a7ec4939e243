use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("OAuth error: {0}")]
    OAuth(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Transient remote failure: {0}")]
    Transient(String),
    #[error("Remote store rejected request: {0}")]
    RemoteRejected(String),
    #[error("Local persistence failure: {0}")]
    LocalPersistence(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InfraError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classifies a non-success HTTP status from a Google API.
    pub fn from_remote_status(context: &str, status: u16, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            format!("{context}: http {status}")
        } else {
            format!("{context}: http {status}; body={body}")
        };

        match status {
            401 => Self::Unauthenticated(detail),
            403 if is_rate_limited(body) => Self::Transient(detail),
            403 => Self::Unauthenticated(detail),
            408 | 429 => Self::Transient(detail),
            500..=599 => Self::Transient(detail),
            _ => Self::RemoteRejected(detail),
        }
    }
}

fn is_rate_limited(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("ratelimitexceeded") || body.contains("quotaexceeded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_statuses_map_to_unauthenticated() {
        assert!(InfraError::from_remote_status("find", 401, "").is_unauthenticated());
        assert!(
            InfraError::from_remote_status("find", 403, r#"{"reason":"insufficientPermissions"}"#)
                .is_unauthenticated()
        );
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(
            InfraError::from_remote_status("update", 403, r#"{"reason":"userRateLimitExceeded"}"#)
                .is_transient()
        );
        assert!(InfraError::from_remote_status("update", 429, "").is_transient());
        assert!(InfraError::from_remote_status("update", 503, "").is_transient());
    }

    #[test]
    fn other_client_errors_are_rejections() {
        let error = InfraError::from_remote_status("read", 404, "not found");
        assert!(matches!(error, InfraError::RemoteRejected(message) if message.contains("http 404")));
    }
}
