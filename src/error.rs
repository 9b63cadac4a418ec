use std::path::PathBuf;

/// All errors that can occur in the knowledge-base engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("knowledge base not found: {0}")]
    KbNotFound(String),

    #[error("file not found: {kb}/{filename}")]
    FileNotFound { kb: String, filename: String },

    #[error("knowledge base already exists: {0}")]
    KbAlreadyExists(String),

    #[error("file already exists: {kb}/{filename}")]
    FileAlreadyExists { kb: String, filename: String },

    #[error("loader error for {}: {message}", path.display())]
    Loader { path: PathBuf, message: String },

    #[error("splitter error for {}: {message}", path.display())]
    Splitter { path: PathBuf, message: String },

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("re-ranker error: {0}")]
    Rerank(String),

    #[error("index integrity error: read-back for source {source} in kb {kb} returned zero hits")]
    IndexIntegrity { kb: String, source: String },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("logging initialization failed: {0}")]
    Logging(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Catalog(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Error::Catalog(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_variant_formats() {
        let err = Error::Validation("bad name".into());
        assert_eq!(err.to_string(), "validation error: bad name");
    }

    #[test]
    fn kb_not_found_variant_formats() {
        let err = Error::KbNotFound("samples".into());
        assert!(err.to_string().contains("samples"));
    }

    #[test]
    fn file_not_found_variant_formats() {
        let err = Error::FileNotFound {
            kb: "samples".into(),
            filename: "foo.md".into(),
        };
        let s = err.to_string();
        assert!(s.contains("samples"));
        assert!(s.contains("foo.md"));
    }

    #[test]
    fn index_integrity_variant_formats() {
        let err = Error::IndexIntegrity {
            kb: "samples".into(),
            source: "foo.md".into(),
        };
        assert!(err.to_string().contains("zero hits"));
    }

    #[test]
    fn io_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
