//! Installer download

use super::error::ProvisionError;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetches `url` into `dest`, returning the number of bytes written.
    ///
    /// Implementations may leave a partial `dest` behind on error; the
    /// provisioner removes it.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, ProvisionError>;
}

/// Streams the installer over HTTP(S)
pub struct HttpDownloader {
    client: reqwest::Client,
    show_progress: bool,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisionError::Network {
                url: String::new(),
                reason: format!("HTTP client setup failed: {}", e),
            })?;

        Ok(Self {
            client,
            show_progress: std::io::stderr().is_terminal(),
        })
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        match total {
            Some(len) => {
                let bar = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::with_template(
                    "{msg} [{bar:30}] {bytes}/{total_bytes} ({eta})",
                ) {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => ProgressBar::new_spinner(),
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, ProvisionError> {
        let network = |reason: String| ProvisionError::Network {
            url: url.to_string(),
            reason,
        };

        info!("Downloading installer from {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| network(e.to_string()))?;

        let bar = self.progress_bar(response.content_length());
        bar.set_message("installer");

        let mut file = File::create(dest)
            .await
            .map_err(|e| ProvisionError::io(format!("Creating {}", dest.display()), e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| network(e.to_string()))? {
            file.write_all(&chunk)
                .await
                .map_err(|e| ProvisionError::io(format!("Writing {}", dest.display()), e))?;
            written += chunk.len() as u64;
            bar.set_position(written);
        }

        file.flush()
            .await
            .map_err(|e| ProvisionError::io(format!("Writing {}", dest.display()), e))?;
        bar.finish_and_clear();

        if let Some(expected) = response.content_length() {
            if expected != written {
                return Err(network(format!(
                    "connection closed after {} of {} bytes",
                    written, expected
                )));
            }
        }

        debug!(bytes = written, dest = %dest.display(), "download complete");
        Ok(written)
    }
}

/// Hex SHA-256 of a file on disk.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("installer.sh");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let dir = TempDir::new().unwrap();
        let downloader = HttpDownloader::new(Duration::from_secs(2)).unwrap();

        let result = downloader
            .fetch("http://127.0.0.1:9/installer.sh", &dir.path().join("x.part"))
            .await;

        assert!(matches!(result, Err(ProvisionError::Network { .. })));
    }
}
