use serde::{Deserialize, Deserializer};

pub const DEFAULT_WEB_BASE: &str = "https://www.mediafire.com";
pub const API_VERSION_PATH: &str = "api/1.5";

/// Message the API returns when the `session_token` parameter is no longer valid.
pub const SESSION_EXPIRED_MESSAGE: &str = "The supplied Session Token is expired or invalid";
/// API error code carried alongside [`SESSION_EXPIRED_MESSAGE`].
pub const SESSION_EXPIRED_ERROR_CODE: i64 = 105;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login_page: String,
    pub client_login: String,
    pub session_token: String,
    pub folder_content: String,
    pub upload_check: String,
    pub upload_simple: String,
    pub upload_update: String,
    pub upload_resumable: String,
}

impl Endpoints {
    pub fn with_base(web_base: &str) -> Self {
        let web = web_base.trim_end_matches('/');
        let api = format!("{web}/{API_VERSION_PATH}");
        Self {
            login_page: format!("{web}/login/"),
            client_login: format!("{web}/dynamic/client_login/mediafire.php"),
            session_token: format!("{web}/application/get_session_token.php"),
            folder_content: format!("{api}/folder/get_content.php"),
            upload_check: format!("{api}/upload/check.php"),
            upload_simple: format!("{api}/upload/simple.php"),
            upload_update: format!("{api}/upload/update.php"),
            upload_resumable: format!("{api}/upload/resumable.php"),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::with_base(DEFAULT_WEB_BASE)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub response: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionTokenResponse {
    pub session_token: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckResponse {
    pub result: Option<String>,
    pub message: Option<String>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub error: Option<i64>,
    pub resumable_upload: Option<ResumableUploadInfo>,
}

impl CheckResponse {
    pub fn is_success(&self) -> bool {
        self.result.as_deref() == Some("Success")
    }

    pub fn is_session_expired(&self) -> bool {
        self.message.as_deref() == Some(SESSION_EXPIRED_MESSAGE)
            || self.error == Some(SESSION_EXPIRED_ERROR_CODE)
    }

    pub fn unit_size(&self) -> Option<u64> {
        self.resumable_upload
            .as_ref()
            .and_then(|r| r.unit_size)
            .filter(|n| *n > 0)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResumableUploadInfo {
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub unit_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    pub result: Option<String>,
    pub message: Option<String>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub error: Option<i64>,
    pub doupload: Option<DoUpload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DoUpload {
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub result: Option<i64>,
    pub key: Option<String>,
}

impl UploadResponse {
    pub fn is_session_expired(&self) -> bool {
        self.message.as_deref() == Some(SESSION_EXPIRED_MESSAGE)
            || self.error == Some(SESSION_EXPIRED_ERROR_CODE)
    }

    pub fn is_accepted(&self) -> bool {
        self.doupload.as_ref().and_then(|d| d.result) == Some(0)
    }

    pub fn upload_key(&self) -> Option<String> {
        self.doupload.as_ref().and_then(|d| d.key.clone())
    }

    pub fn describe(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match self.doupload.as_ref().and_then(|d| d.result) {
            Some(code) => format!("doupload.result={code}"),
            None => format!(
                "result={}",
                self.result.as_deref().unwrap_or("<missing>")
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FolderContentResponse {
    pub result: Option<String>,
    pub message: Option<String>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub error: Option<i64>,
    pub folder_content: Option<FolderContent>,
}

impl FolderContentResponse {
    pub fn is_session_expired(&self) -> bool {
        self.message.as_deref() == Some(SESSION_EXPIRED_MESSAGE)
            || self.error == Some(SESSION_EXPIRED_ERROR_CODE)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FolderContent {
    pub more_chunks: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub folders: Vec<FolderEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileEntry {
    pub filename: String,
    pub quickkey: String,
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FolderEntry {
    pub name: String,
    pub folderkey: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    String(String),
}

fn de_opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let raw = Option::<NumberOrString>::deserialize(d)?;
    Ok(match raw {
        Some(NumberOrString::Number(n)) => n.as_i64(),
        Some(NumberOrString::String(s)) => s.trim().parse().ok(),
        None => None,
    })
}

fn de_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let raw = Option::<NumberOrString>::deserialize(d)?;
    Ok(match raw {
        Some(NumberOrString::Number(n)) => n.as_u64(),
        Some(NumberOrString::String(s)) => s.trim().parse().ok(),
        None => None,
    })
}
