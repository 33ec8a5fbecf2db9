//! Local-filesystem conveniences bridging `tokio::fs` to the generic
//! transfer engine.

use crate::client::FtpClient;
use crate::error::FtpResult;
use crate::types::FtpResponse;
use std::path::Path;
use tokio::fs;

impl FtpClient {
    /// Upload a local file to `remote_path` (STOR).
    pub async fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> FtpResult<FtpResponse> {
        let mut file = fs::File::open(local_path.as_ref()).await?;
        self.upload(&mut file, remote_path).await
    }

    /// Append a local file to `remote_path` (APPE).
    pub async fn append_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> FtpResult<FtpResponse> {
        let mut file = fs::File::open(local_path.as_ref()).await?;
        self.append(&mut file, remote_path).await
    }

    /// Download `remote_path` into a local file, creating parent
    /// directories as needed.
    pub async fn download_file(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> FtpResult<FtpResponse> {
        let local_path = local_path.as_ref();
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(local_path).await?;
        self.download(&mut file, remote_path, 0).await
    }

    /// Continue a download into an existing local file: the transfer
    /// starts at the file's current length (REST) and bytes are appended.
    pub async fn download_file_from_offset(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> FtpResult<FtpResponse> {
        let local_path = local_path.as_ref();
        let offset = match fs::metadata(local_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if offset == 0 {
            return self.download_file(remote_path, local_path).await;
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(local_path)
            .await?;
        self.download(&mut file, remote_path, offset).await
    }
}
