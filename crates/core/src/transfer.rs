use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{Endpoints, Envelope, UploadResponse};
use crate::hashing::{Chunk, ChunkPlan};
use crate::planner::TransferIntent;
use crate::progress::{ProgressSink, TransferProgress};
use crate::session::{SessionManager, SessionTicket};
use crate::transport::{ApiRequest, Transport};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPath {
    Simple,
    Chunked,
}

/// A transfer the server fully acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub remote_name: String,
    pub path: TransferPath,
    /// Upload key for new files, the file's quick key for updates.
    pub destination_id: Option<String>,
    pub bytes: u64,
    pub chunks_sent: u64,
    pub reauthenticated: bool,
}

#[derive(Default)]
pub struct TransferOptions<'a> {
    pub progress: Option<&'a dyn ProgressSink>,
}

#[derive(Debug)]
enum Verdict {
    Accepted(Option<String>),
    SessionExpired,
    Rejected(String),
}

fn classify(res: &UploadResponse) -> Verdict {
    if res.is_session_expired() {
        Verdict::SessionExpired
    } else if res.is_accepted() {
        Verdict::Accepted(res.upload_key())
    } else {
        Verdict::Rejected(res.describe())
    }
}

fn destination_id(intent: &TransferIntent, upload_key: Option<String>) -> Option<String> {
    match intent.existing() {
        Some(existing) => Some(existing.quick_key.clone()),
        None => upload_key,
    }
}

/// Single-request transfer for files at or below the chunking threshold.
pub struct SimpleTransferPath<'a> {
    transport: &'a dyn Transport,
    session: &'a SessionManager,
    endpoints: &'a Endpoints,
}

impl<'a> SimpleTransferPath<'a> {
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

    pub async fn send_whole(
        &self,
        intent: &TransferIntent,
        ticket: &SessionTicket,
    ) -> Result<TransferOutcome> {
        let body = read_file(&intent.local_path).await?;
        if body.len() as u64 != intent.total_size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} changed size since planning: expected {} bytes, found {}",
                    intent.local_path.display(),
                    intent.total_size,
                    body.len()
                ),
            )));
        }

        let req = match intent.existing() {
            Some(existing) => ApiRequest::post(&self.endpoints.upload_update)
                .query("session_token", &ticket.session_token)
                .query("quick_key", &existing.quick_key)
                .query("response_format", "json"),
            None => ApiRequest::post(&self.endpoints.upload_simple)
                .query("folder_key", intent.target.folder_key())
                .query("response_format", "json")
                .query("session_token", &ticket.session_token)
                .header("X-Filehash", &intent.file_hash),
        }
        .header("cookie", &ticket.cookie_header)
        .header("X-Filename", &intent.remote_name)
        .header("X-Filesize", intent.total_size.to_string())
        .bytes(body);

        let res = self
            .transport
            .execute(req)
            .await
            .map_err(|e| Error::transfer_failed(format!("simple transfer request failed: {e}")))?;
        let parsed: Envelope<UploadResponse> = res
            .json()
            .map_err(|e| Error::transfer_failed(format!("simple transfer response: {e}")))?;

        match classify(&parsed.response) {
            Verdict::Accepted(key) => {
                info!(
                    event = "transfer.finish",
                    path = "simple",
                    remote_name = %intent.remote_name,
                    bytes = intent.total_size,
                    "transfer.finish"
                );
                Ok(TransferOutcome {
                    remote_name: intent.remote_name.clone(),
                    path: TransferPath::Simple,
                    destination_id: destination_id(intent, key),
                    bytes: intent.total_size,
                    chunks_sent: 1,
                    reauthenticated: false,
                })
            }
            Verdict::SessionExpired => {
                self.session.invalidate(ticket).await;
                Err(Error::transfer_failed(format!(
                    "{}: session expired during simple transfer",
                    intent.remote_name
                )))
            }
            Verdict::Rejected(message) => Err(Error::transfer_failed(format!(
                "{}: {message}",
                intent.remote_name
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    AfterReauth,
}

/// Drives the resumable protocol: chunks go out strictly in index order, each
/// staged to a temp artifact that is removed once the chunk is done with.
pub struct ChunkedTransferExecutor<'a> {
    transport: &'a dyn Transport,
    session: &'a SessionManager,
    endpoints: &'a Endpoints,
    temp_dir: &'a Path,
}

impl<'a> ChunkedTransferExecutor<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        session: &'a SessionManager,
        endpoints: &'a Endpoints,
        temp_dir: &'a Path,
    ) -> Self {
        Self {
            transport,
            session,
            endpoints,
            temp_dir,
        }
    }

    pub async fn run(
        &self,
        intent: &TransferIntent,
        ticket: SessionTicket,
        options: &TransferOptions<'_>,
    ) -> Result<TransferOutcome> {
        let unit_size = intent.unit_size.ok_or_else(|| Error::UploadRejected {
            message: "check response carried no resumable unit size".to_string(),
        })?;
        let plan = ChunkPlan::new(intent.total_size, unit_size)?;
        let chunks_total = plan.chunk_count();
        let transfer_tag = uuid::Uuid::new_v4().simple().to_string();

        debug!(
            event = "transfer.chunked.start",
            remote_name = %intent.remote_name,
            size = intent.total_size,
            unit_size,
            chunks_total,
            update = intent.is_update(),
            "transfer.chunked.start"
        );

        let mut ticket = ticket;
        let mut reauthenticated = false;
        let mut bytes_sent = 0u64;
        let mut chunks_sent = 0u64;
        let mut last_key = None;
        let mut completed = false;

        for range in plan.ranges() {
            let mut chunk =
                Chunk::materialize(&intent.local_path, range, self.temp_dir, &transfer_tag)
                    .await?;

            let mut attempt = Attempt::First;
            let key = loop {
                match (self.send_chunk(intent, &mut chunk, &ticket).await?, attempt) {
                    (Verdict::Accepted(key), _) => break key,
                    (Verdict::SessionExpired, Attempt::First) => {
                        warn!(
                            event = "transfer.reauth",
                            remote_name = %intent.remote_name,
                            chunk = chunk.index,
                            "transfer.reauth"
                        );
                        self.session.invalidate(&ticket).await;
                        ticket = self.session.ensure_session(self.transport).await?;
                        reauthenticated = true;
                        attempt = Attempt::AfterReauth;
                    }
                    (Verdict::SessionExpired, Attempt::AfterReauth) => {
                        return Err(Error::transfer_failed(format!(
                            "{}: chunk {} rejected again after re-authentication: session expired",
                            intent.remote_name, chunk.index
                        )));
                    }
                    (Verdict::Rejected(message), _) => {
                        return Err(Error::transfer_failed(format!(
                            "{}: chunk {} rejected: {message}",
                            intent.remote_name, chunk.index
                        )));
                    }
                }
            };

            bytes_sent += chunk.len;
            chunks_sent += 1;
            if key.is_some() {
                last_key = key;
            }
            completed = chunk.is_last;
            debug!(
                event = "transfer.chunk.sent",
                remote_name = %intent.remote_name,
                chunk = chunk.index,
                chunk_bytes = chunk.len,
                last = chunk.is_last,
                "transfer.chunk.sent"
            );

            if let Some(sink) = options.progress {
                sink.on_progress(TransferProgress {
                    remote_name: intent.remote_name.clone(),
                    phase: "upload".to_string(),
                    chunks_total: Some(chunks_total),
                    chunks_done: Some(chunks_sent),
                    bytes_total: Some(intent.total_size),
                    bytes_sent: Some(bytes_sent),
                });
            }
        }

        if !completed || chunks_sent != chunks_total {
            return Err(Error::transfer_failed(format!(
                "{}: {chunks_sent}/{chunks_total} chunks acknowledged",
                intent.remote_name
            )));
        }

        info!(
            event = "transfer.finish",
            path = "chunked",
            remote_name = %intent.remote_name,
            bytes = bytes_sent,
            chunks = chunks_sent,
            reauthenticated,
            "transfer.finish"
        );

        Ok(TransferOutcome {
            remote_name: intent.remote_name.clone(),
            path: TransferPath::Chunked,
            destination_id: destination_id(intent, last_key),
            bytes: bytes_sent,
            chunks_sent,
            reauthenticated,
        })
    }

    async fn send_chunk(
        &self,
        intent: &TransferIntent,
        chunk: &mut Chunk,
        ticket: &SessionTicket,
    ) -> Result<Verdict> {
        let body = chunk.read_body().await?;

        let req = ApiRequest::post(&self.endpoints.upload_resumable);
        let req = match intent.existing() {
            Some(existing) => req
                .query("response_format", "json")
                .query("quick_key", &existing.quick_key)
                .query("session_token", &ticket.session_token)
                .query("source_hash", &existing.prior_content_hash)
                .query("target_hash", &chunk.hash),
            None => req
                .query("folder_key", intent.target.folder_key())
                .query("response_format", "json")
                .query("session_token", &ticket.session_token),
        }
        .header("cookie", &ticket.cookie_header)
        .header("X-Filesize", intent.total_size.to_string())
        .header("X-Filetype", "")
        .header("X-Filehash", &intent.file_hash)
        .header("X-Filename", &intent.remote_name)
        .header("X-Unit-Hash", &chunk.hash)
        .header("X-Unit-Size", chunk.len.to_string())
        .header("X-Unit-Id", chunk.index.to_string())
        .bytes(body);

        let res = self.transport.execute(req).await.map_err(|e| {
            Error::transfer_failed(format!("chunk {} request failed: {e}", chunk.index))
        })?;
        let parsed: Envelope<UploadResponse> = res.json().map_err(|e| {
            Error::transfer_failed(format!("chunk {} response: {e}", chunk.index))
        })?;
        Ok(classify(&parsed.response))
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::read(path))
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
        .map_err(Error::Io)
}
