use thiserror::Error;

/// Errors that can occur in walcap-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),

    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::InvalidLsn("0/ZZ".into()).to_string(),
            "invalid LSN format: 0/ZZ"
        );
        assert_eq!(
            Error::TimestampOutOfRange(i64::MAX).to_string(),
            format!("timestamp out of range: {}", i64::MAX)
        );
    }
}
