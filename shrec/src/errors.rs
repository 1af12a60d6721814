use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

/// Store access errors, split into the four kinds a caller can react to
/// differently: fix the calling code (`Usage`), fix the data (`Data`),
/// give up on the connection (`Internal`), or retry/inspect the underlying
/// store (`Engine`).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("engine error: {0}")]
    Engine(String),
}

impl DbError {
    pub(crate) fn usage(msg: impl Into<String>) -> DbError {
        DbError::Usage(msg.into())
    }

    pub(crate) fn data(msg: impl Into<String>) -> DbError {
        DbError::Data(msg.into())
    }

    pub(crate) fn internal(msg: impl Into<String>) -> DbError {
        DbError::Internal(msg.into())
    }

    pub(crate) fn engine(msg: impl Into<String>) -> DbError {
        DbError::Engine(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = DbError::usage("Transaction already started.");
        assert_eq!(
            err.to_string(),
            "usage error: Transaction already started."
        );
        let err = DbError::data("Field number out of bounds.");
        assert!(err.to_string().starts_with("data error:"));
    }
}
