use std::path::{Path, PathBuf};

use tracing::debug;

use crate::api::{CheckResponse, Endpoints, Envelope};
use crate::hashing::digest_file;
use crate::session::{SessionManager, SessionTicket};
use crate::transport::{ApiRequest, Transport};
use crate::{Error, Result};

/// A file already present at the destination, as reported by a folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingFile {
    pub quick_key: String,
    pub prior_content_hash: String,
    pub folder_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferTarget {
    NewFile { folder_key: String },
    Update(ExistingFile),
}

impl TransferTarget {
    pub fn folder_key(&self) -> &str {
        match self {
            Self::NewFile { folder_key } => folder_key,
            Self::Update(existing) => &existing.folder_key,
        }
    }
}

/// Everything a single transfer needs to know, fixed once the pre-flight
/// check has answered.
#[derive(Debug, Clone)]
pub struct TransferIntent {
    pub local_path: PathBuf,
    pub remote_name: String,
    pub target: TransferTarget,
    pub total_size: u64,
    pub file_hash: String,
    /// Server-dictated chunk size; `None` if the check response carried none.
    pub unit_size: Option<u64>,
}

impl TransferIntent {
    pub fn is_update(&self) -> bool {
        matches!(self.target, TransferTarget::Update(_))
    }

    pub fn existing(&self) -> Option<&ExistingFile> {
        match &self.target {
            TransferTarget::Update(existing) => Some(existing),
            TransferTarget::NewFile { .. } => None,
        }
    }
}

pub struct TransferPlanner<'a> {
    transport: &'a dyn Transport,
    session: &'a SessionManager,
    endpoints: &'a Endpoints,
}

impl<'a> TransferPlanner<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        session: &'a SessionManager,
        endpoints: &'a Endpoints,
    ) -> Self {
        Self {
            transport,
            session,
            endpoints,
        }
    }

    pub async fn plan(
        &self,
        ticket: &SessionTicket,
        local_path: &Path,
        remote_name: &str,
        target: TransferTarget,
    ) -> Result<TransferIntent> {
        let digest = digest_file(local_path).await?;

        let uploads = serde_json::json!([{
            "filename": remote_name,
            "folder_key": target.folder_key(),
            "size": digest.size,
            "hash": digest.hash,
            "resumable": "yes",
            "preemptive": "yes",
        }]);

        let res = self
            .transport
            .execute(
                ApiRequest::get(&self.endpoints.upload_check)
                    .query("session_token", &ticket.session_token)
                    .query("uploads", uploads.to_string())
                    .query("response_format", "json")
                    .header("accept", "*/*")
                    .header("cookie", &ticket.cookie_header),
            )
            .await
            .map_err(|e| Error::transfer_failed(format!("check request failed: {e}")))?;

        let parsed: Envelope<CheckResponse> = res
            .json()
            .map_err(|e| Error::UploadRejected {
                message: format!("check response: {e}"),
            })?;
        let check = parsed.response;

        if check.is_session_expired() {
            // Not retried here; the next call starts from a fresh handshake.
            self.session.invalidate(ticket).await;
        }
        if !check.is_success() {
            return Err(Error::UploadRejected {
                message: check.message.clone().unwrap_or_else(|| {
                    format!(
                        "check result={}",
                        check.result.as_deref().unwrap_or("<missing>")
                    )
                }),
            });
        }

        let unit_size = check.unit_size();
        debug!(
            event = "transfer.planned",
            remote_name,
            size = digest.size,
            unit_size = unit_size.unwrap_or(0),
            update = matches!(target, TransferTarget::Update(_)),
            "transfer.planned"
        );

        Ok(TransferIntent {
            local_path: local_path.to_path_buf(),
            remote_name: remote_name.to_string(),
            target,
            total_size: digest.size,
            file_hash: digest.hash,
            unit_size,
        })
    }
}
