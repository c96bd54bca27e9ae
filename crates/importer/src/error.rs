use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use catalink_core::errors::ApplicationError;
use catalink_db::RepositoryError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not read import payload `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
}

/// Failure of a whole run. No partial [`ImportResult`] is produced.
///
/// [`ImportResult`]: catalink_core::import::ImportResult
#[derive(Debug, Error)]
pub enum RunError {
    #[error("import payload is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("import payload must be a JSON array of product records")]
    PayloadShape,
    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),
    #[error("storage unavailable: {0}")]
    Storage(#[source] RepositoryError),
    #[error("import run timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("import worker failed: {0}")]
    WorkerPool(String),
}

impl From<RunError> for ApplicationError {
    fn from(value: RunError) -> Self {
        match value {
            RunError::Storage(error) => error.into(),
            other => Self::Import(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use catalink_core::errors::ApplicationError;
    use catalink_db::RepositoryError;

    use super::RunError;

    #[test]
    fn storage_failures_keep_their_repository_mapping() {
        let error = RunError::Storage(RepositoryError::Decode("bad row".to_string()));
        assert!(matches!(ApplicationError::from(error), ApplicationError::Persistence(_)));
    }

    #[test]
    fn timeout_message_names_the_limit() {
        let error = RunError::Timeout(Duration::from_secs(300));
        assert_eq!(error.to_string(), "import run timed out after 300s");
        assert!(matches!(ApplicationError::from(error), ApplicationError::Import(_)));
    }
}
