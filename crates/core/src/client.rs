use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{Envelope, FolderContentResponse};
use crate::config::ClientConfig;
use crate::planner::{ExistingFile, TransferPlanner, TransferTarget};
use crate::session::{SessionManager, SessionTicket};
use crate::transfer::{
    ChunkedTransferExecutor, SimpleTransferPath, TransferOptions, TransferOutcome,
};
use crate::transport::{ApiRequest, ReqwestTransport, Transport};
use crate::{Error, Result};

const LIST_PAGE_SIZE: usize = 100;
const LIST_MAX_PAGES: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub quick_key: String,
    pub content_hash: String,
}

impl RemoteFile {
    pub fn as_existing(&self, folder_key: &str) -> ExistingFile {
        ExistingFile {
            quick_key: self.quick_key.clone(),
            prior_content_hash: self.content_hash.clone(),
            folder_key: folder_key.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub name: String,
    pub folder_key: String,
}

#[derive(Debug, Clone, Copy)]
enum ContentType {
    Files,
    Folders,
}

impl ContentType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Folders => "folders",
        }
    }
}

/// Client for the session-authenticated storage service.
///
/// One client holds one session; transfers started concurrently on the same
/// client share it and wait on a single login when it has to be renewed.
pub struct MediaFireClient<T: Transport = ReqwestTransport> {
    config: ClientConfig,
    transport: T,
    session: SessionManager,
}

impl MediaFireClient<ReqwestTransport> {
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> MediaFireClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        let session = SessionManager::new(&config);
        Self {
            config,
            transport,
            session,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub async fn ensure_session(&self) -> Result<SessionTicket> {
        self.session.ensure_session(&self.transport).await
    }

    pub async fn list_folder_contents(&self, folder_key: &str) -> Result<Vec<RemoteFile>> {
        let content = self.get_content(folder_key, ContentType::Files).await?;
        Ok(content
            .into_iter()
            .flat_map(|page| page.files)
            .map(|f| RemoteFile {
                name: f.filename,
                quick_key: f.quickkey,
                content_hash: f.hash,
            })
            .collect())
    }

    pub async fn list_subfolders(&self, folder_key: &str) -> Result<Vec<RemoteFolder>> {
        let content = self.get_content(folder_key, ContentType::Folders).await?;
        Ok(content
            .into_iter()
            .flat_map(|page| page.folders)
            .map(|f| RemoteFolder {
                name: f.name,
                folder_key: f.folderkey,
            })
            .collect())
    }

    /// Resolves the single subfolder of `parent_key` called `name`.
    pub async fn find_folder(&self, parent_key: &str, name: &str) -> Result<RemoteFolder> {
        let mut matches: Vec<RemoteFolder> = self
            .list_subfolders(parent_key)
            .await?
            .into_iter()
            .filter(|f| f.name == name)
            .collect();
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(Error::InvalidConfig {
                message: format!("folder {name:?} not found under {parent_key}; create it first"),
            }),
            n => Err(Error::InvalidConfig {
                message: format!("folder name {name:?} is ambiguous under {parent_key} ({n} matches)"),
            }),
        }
    }

    pub async fn upload_new(
        &self,
        local_path: &Path,
        remote_name: &str,
        folder_key: &str,
    ) -> Result<TransferOutcome> {
        self.upload_new_with(local_path, remote_name, folder_key, TransferOptions::default())
            .await
    }

    pub async fn upload_new_with(
        &self,
        local_path: &Path,
        remote_name: &str,
        folder_key: &str,
        options: TransferOptions<'_>,
    ) -> Result<TransferOutcome> {
        let target = TransferTarget::NewFile {
            folder_key: folder_key.to_string(),
        };
        self.transfer(local_path, remote_name, target, options).await
    }

    pub async fn update_existing(
        &self,
        local_path: &Path,
        remote_name: &str,
        existing: ExistingFile,
    ) -> Result<TransferOutcome> {
        self.update_existing_with(local_path, remote_name, existing, TransferOptions::default())
            .await
    }

    pub async fn update_existing_with(
        &self,
        local_path: &Path,
        remote_name: &str,
        existing: ExistingFile,
        options: TransferOptions<'_>,
    ) -> Result<TransferOutcome> {
        self.transfer(local_path, remote_name, TransferTarget::Update(existing), options)
            .await
    }

    async fn transfer(
        &self,
        local_path: &Path,
        remote_name: &str,
        target: TransferTarget,
        options: TransferOptions<'_>,
    ) -> Result<TransferOutcome> {
        if remote_name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "remote name must not be empty".to_string(),
            });
        }

        let ticket = self.ensure_session().await?;
        let endpoints = &self.config.endpoints;
        let intent = TransferPlanner::new(&self.transport, &self.session, endpoints)
            .plan(&ticket, local_path, remote_name, target)
            .await?;

        if intent.total_size > self.config.chunk_threshold_bytes {
            ChunkedTransferExecutor::new(
                &self.transport,
                &self.session,
                endpoints,
                &self.config.temp_dir,
            )
            .run(&intent, ticket, &options)
            .await
        } else {
            SimpleTransferPath::new(&self.transport, &self.session, endpoints)
                .send_whole(&intent, &ticket)
                .await
        }
    }

    async fn get_content(
        &self,
        folder_key: &str,
        content_type: ContentType,
    ) -> Result<Vec<crate::api::FolderContent>> {
        let ticket = self.ensure_session().await?;
        let mut pages = Vec::new();

        for chunk in 1..=LIST_MAX_PAGES {
            let page_no = chunk.to_string();
            let page_size = LIST_PAGE_SIZE.to_string();
            let res = self
                .transport
                .execute(
                    ApiRequest::post(&self.config.endpoints.folder_content)
                        .header("accept", "application/json")
                        .header("cookie", &ticket.cookie_header)
                        .form(&[
                            ("session_token", ticket.session_token.as_str()),
                            ("response_format", "json"),
                            ("folder_key", folder_key),
                            ("content_type", content_type.as_str()),
                            ("chunk", page_no.as_str()),
                            ("chunk_size", page_size.as_str()),
                            ("details", "yes"),
                            ("order_direction", "asc"),
                            ("order_by", "name"),
                            ("filter", ""),
                        ]),
                )
                .await?;

            let parsed: Envelope<FolderContentResponse> = res
                .json()
                .map_err(|e| Error::Api {
                    message: format!("folder listing response: {e}"),
                })?;
            let response = parsed.response;
            if response.is_session_expired() {
                self.session.invalidate(&ticket).await;
                return Err(Error::Api {
                    message: format!("folder listing of {folder_key}: session expired"),
                });
            }
            let Some(page) = response.folder_content else {
                return Err(Error::Api {
                    message: format!(
                        "folder listing of {folder_key} failed: {}",
                        response
                            .message
                            .or(response.result)
                            .unwrap_or_else(|| "no folder_content".to_string())
                    ),
                });
            };

            let more = page.more_chunks.as_deref() == Some("yes");
            debug!(
                event = "folder.listed",
                folder_key,
                content_type = content_type.as_str(),
                chunk,
                files = page.files.len(),
                folders = page.folders.len(),
                "folder.listed"
            );
            pages.push(page);
            if !more {
                return Ok(pages);
            }
        }

        Err(Error::Api {
            message: format!(
                "folder listing of {folder_key} still has more chunks after {LIST_MAX_PAGES} pages"
            ),
        })
    }
}

/// Object keys may contain `/`; remote file names may not.
pub fn safe_remote_name(key: &str) -> String {
    key.replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_remote_name_flattens_path_separators() {
        assert_eq!(safe_remote_name("db/2024/dump.sql"), "db_2024_dump.sql");
        assert_eq!(safe_remote_name("plain.txt"), "plain.txt");
    }

    #[test]
    fn remote_file_maps_to_existing_target() {
        let f = RemoteFile {
            name: "a".to_string(),
            quick_key: "qk".to_string(),
            content_hash: "h0".to_string(),
        };
        let e = f.as_existing("fk");
        assert_eq!(e.quick_key, "qk");
        assert_eq!(e.prior_content_hash, "h0");
        assert_eq!(e.folder_key, "fk");
    }
}
