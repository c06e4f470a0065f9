//! Destinations for exported dumps.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[async_trait]
pub trait ExportSink: Send {
    /// Replace the sink's contents with `data`.
    async fn write_dump(&mut self, data: &[u8]) -> Result<()>;
}

/// Writes the dump to a file, truncating it first.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ExportSink for FileSink {
    async fn write_dump(&mut self, data: &[u8]) -> Result<()> {
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl ExportSink for Vec<u8> {
    async fn write_dump(&mut self, data: &[u8]) -> Result<()> {
        self.clear();
        self.extend_from_slice(data);
        Ok(())
    }
}
