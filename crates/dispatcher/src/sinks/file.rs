//! FileDeliver - appends each output as a line

use std::collections::HashMap;
use std::path::PathBuf;

use contracts::{ContractError, Deliver, FormattedOutput};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Configuration for FileDeliver
#[derive(Debug, Clone)]
pub struct FileDeliverConfig {
    /// Output file, created if missing, appended otherwise
    pub path: PathBuf,
}

impl FileDeliverConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let path = params
            .get("path")
            .map(PathBuf::from)
            .ok_or_else(|| "missing 'path' parameter".to_string())?;
        Ok(Self { path })
    }
}

/// Delivery that appends to a local file
///
/// The file is opened lazily on the first delivery and reopened after a
/// failed write.
pub struct FileDeliver {
    name: String,
    config: FileDeliverConfig,
    file: Option<File>,
}

impl FileDeliver {
    /// Create a new FileDeliver, creating the parent directory
    pub fn new(name: impl Into<String>, config: FileDeliverConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            name: name.into(),
            config,
            file: None,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = FileDeliverConfig::from_params(params)
            .map_err(|e| ContractError::delivery(&name, e))?;
        Self::new(name.clone(), config).map_err(|e| ContractError::delivery(&name, e.to_string()))
    }

    async fn append(&mut self, line: &str) -> std::io::Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.config.path)
                .await?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).await?;
        file.flush().await
    }
}

impl Deliver for FileDeliver {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "file_deliver", skip(self, output), fields(sink = %self.name))]
    async fn deliver(&mut self, output: &FormattedOutput) -> Result<(), ContractError> {
        let line = output.to_text();
        self.append(&line).await.map_err(|e| {
            self.file = None;
            ContractError::delivery(&self.name, e.to_string())
        })
    }

    #[instrument(name = "file_deliver_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut file) = self.file.take() {
            file.sync_all()
                .await
                .map_err(|e| ContractError::delivery(&self.name, e.to_string()))?;
        }
        debug!(sink = %self.name, path = %self.config.path.display(), "FileDeliver closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_deliver_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("records.jsonl");
        let params = HashMap::from([("path".to_string(), path.display().to_string())]);

        let mut sink = FileDeliver::from_params("file", &params).unwrap();
        sink.deliver(&FormattedOutput::Text("one".into())).await.unwrap();
        sink.deliver(&FormattedOutput::Text("two".into())).await.unwrap();
        sink.close().await.unwrap();

        let mut again = FileDeliver::from_params("file", &params).unwrap();
        again
            .deliver(&FormattedOutput::Form(vec![("k".into(), "v".into())]))
            .await
            .unwrap();
        again.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "one\ntwo\nk=v\n");
    }

    #[test]
    fn test_missing_path_param() {
        let err = FileDeliver::from_params("file", &HashMap::new()).err().unwrap();
        assert!(err.to_string().contains("path"));
    }
}
