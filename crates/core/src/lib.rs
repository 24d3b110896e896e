mod api;
mod client;
pub mod config;
mod error;
pub mod hashing;
pub mod logging;
mod planner;
mod progress;
pub mod session;
mod transfer;
pub mod transport;

pub const APP_NAME: &str = "mirrorback";

pub use api::{
    DEFAULT_WEB_BASE, Endpoints, SESSION_EXPIRED_ERROR_CODE, SESSION_EXPIRED_MESSAGE,
};
pub use client::{MediaFireClient, RemoteFile, RemoteFolder, safe_remote_name};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use planner::{ExistingFile, TransferIntent, TransferPlanner, TransferTarget};
pub use progress::{ProgressSink, TransferProgress};
pub use session::{SessionManager, SessionState, SessionTicket};
pub use transfer::{
    ChunkedTransferExecutor, SimpleTransferPath, TransferOptions, TransferOutcome, TransferPath,
};
pub use transport::{ApiRequest, ApiResponse, Method, ReqwestTransport, RequestBody, Transport};
