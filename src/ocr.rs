//! Image text extraction.
//!
//! The production extractor shells out to `tesseract`. Each image is written
//! to a uniquely named file in the scratch directory that is removed when the
//! call returns, whatever the outcome.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ExtractionError;

/// Default extraction timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Image bytes → recognised text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ExtractionError>;
}

/// Runs `tesseract <image> stdout`.
pub struct TesseractExtractor {
    binary: String,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl TesseractExtractor {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: "tesseract".to_string(),
            scratch_dir: scratch_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a different tesseract binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the per-image timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ExtractionError> {
        if image.is_empty() {
            return Err(ExtractionError::Failed("empty image".into()));
        }

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let file = tempfile::Builder::new()
            .prefix("ocr-")
            .tempfile_in(&self.scratch_dir)?;
        tokio::fs::write(file.path(), image).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg(file.path())
            .arg("stdout")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| ExtractionError::Failed(format!("failed to spawn {}: {e}", self.binary)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(ExtractionError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Failed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}
