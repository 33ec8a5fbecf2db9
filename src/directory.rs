//! Directory-tree operations — mkdir, rmdir, recursive removal, MLST.

use crate::client::{parse_path_reply, FtpClient};
use crate::error::{FtpError, FtpResult};
use crate::parser;
use crate::types::{FtpEntry, FtpEntryKind};

impl FtpClient {
    // ─── MKD ─────────────────────────────────────────────────────

    /// Create a directory on the server. Returns the created path as
    /// reported in the 257 reply, or the requested path when the server
    /// does not quote one.
    pub async fn mkdir(&self, path: &str) -> FtpResult<String> {
        let response = self.send_command(&format!("MKD {}", path)).await?;
        if !response.is_completion() {
            return Err(FtpError::from_reply(response.code, &response.text()));
        }
        Ok(parse_path_reply(&response.text()).unwrap_or_else(|_| path.to_string()))
    }

    /// Create a directory and all missing parents. FTP has no recursive
    /// MKD, so each prefix is attempted and "already exists" rejections
    /// are ignored.
    pub async fn mkdir_all(&self, path: &str) -> FtpResult<()> {
        let mut prefix = if path.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };

        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !prefix.is_empty() && !prefix.ends_with('/') {
                prefix.push('/');
            }
            prefix.push_str(component);

            let response = self.send_command(&format!("MKD {}", prefix)).await?;
            if !response.is_completion() && response.code != 550 {
                return Err(FtpError::from_reply(response.code, &response.text()));
            }
        }
        Ok(())
    }

    // ─── RMD ─────────────────────────────────────────────────────

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: &str) -> FtpResult<()> {
        let response = self.send_command(&format!("RMD {}", path)).await?;
        if !response.is_completion() {
            return Err(FtpError::from_reply(response.code, &response.text()));
        }
        Ok(())
    }

    /// Recursively remove a directory and everything below it.
    pub async fn rmdir_recursive(&self, path: &str) -> FtpResult<()> {
        let entries = self.list(Some(path)).await?;

        for entry in entries {
            let full_path = if path.ends_with('/') {
                format!("{}{}", path, entry.name)
            } else {
                format!("{}/{}", path, entry.name)
            };

            match entry.kind {
                FtpEntryKind::Directory => {
                    Box::pin(self.rmdir_recursive(&full_path)).await?;
                }
                _ => self.remove(&full_path).await?,
            }
        }

        self.rmdir(path).await
    }

    // ─── CDUP ────────────────────────────────────────────────────

    /// Move to the parent directory.
    pub async fn cdup(&self) -> FtpResult<String> {
        let response = self.send_command("CDUP").await?;
        if !response.is_completion() {
            return Err(FtpError::from_reply(response.code, &response.text()));
        }
        self.pwd().await
    }

    // ─── MLST ────────────────────────────────────────────────────

    /// Facts about a single file or directory via MLST (RFC 3659). The
    /// fact line arrives on the control channel between the 250 frames.
    pub async fn stat_entry(&self, path: &str) -> FtpResult<FtpEntry> {
        if !self.features().mlst {
            return Err(FtpError::unsupported("Server does not support MLST"));
        }

        let response = self.send_command(&format!("MLST {}", path)).await?;
        if !response.is_completion() {
            return Err(FtpError::from_reply(response.code, &response.text()));
        }

        let fact_line = response
            .lines
            .iter()
            .find(|l| l.trim_start().contains('=') && l.contains(';'))
            .ok_or_else(|| FtpError::protocol_error("MLST reply carries no fact line"))?;

        parser::parse_listing(fact_line.trim())
            .into_iter()
            .next()
            .ok_or_else(|| FtpError::protocol_error("MLST fact line did not parse"))
    }

    // ─── SITE CHMOD ──────────────────────────────────────────────

    /// Change permissions via SITE CHMOD (widely supported, not standard).
    pub async fn chmod(&self, path: &str, mode: &str) -> FtpResult<()> {
        let response = self.site(&format!("CHMOD {} {}", mode, path)).await?;
        if !response.is_completion() {
            return Err(FtpError::from_reply(response.code, &response.text()));
        }
        Ok(())
    }
}
