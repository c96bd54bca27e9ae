use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::SourceError;

/// Where a run's raw payload comes from.
#[async_trait]
pub trait ImportSource: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<Vec<u8>, SourceError>;
}

/// JSON array of provider records stored on disk.
#[derive(Clone, Debug)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ImportSource for JsonFileSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch(&self) -> Result<Vec<u8>, SourceError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Read { path: self.path.clone(), source })
    }
}

#[derive(Clone, Debug, Default)]
pub struct InlineSource {
    bytes: Vec<u8>,
}

impl InlineSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

#[async_trait]
impl ImportSource for InlineSource {
    fn describe(&self) -> String {
        format!("inline:{} bytes", self.bytes.len())
    }

    async fn fetch(&self) -> Result<Vec<u8>, SourceError> {
        Ok(self.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{ImportSource, InlineSource, JsonFileSource};
    use crate::error::SourceError;

    #[tokio::test]
    async fn file_source_reads_payload_bytes() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("products.json");
        fs::write(&path, b"[]").expect("write payload");

        let source = JsonFileSource::new(&path);
        assert_eq!(source.fetch().await.expect("fetch"), b"[]".to_vec());
        assert!(source.describe().starts_with("file:"));
    }

    #[tokio::test]
    async fn missing_file_reports_its_path() {
        let source = JsonFileSource::new("/nonexistent/products.json");
        let error = source.fetch().await.expect_err("missing file");

        assert!(matches!(error, SourceError::Read { .. }));
        assert!(error.to_string().contains("/nonexistent/products.json"));
    }

    #[tokio::test]
    async fn inline_source_returns_its_bytes() {
        let source = InlineSource::new(br#"[{"externalId":"E-1"}]"#.to_vec());
        assert_eq!(source.fetch().await.expect("fetch").len(), 22);
    }
}
