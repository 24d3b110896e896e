use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferProgress {
    pub remote_name: String,
    pub phase: String,
    pub chunks_total: Option<u64>,
    pub chunks_done: Option<u64>,
    pub bytes_total: Option<u64>,
    pub bytes_sent: Option<u64>,
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: TransferProgress);
}
