#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;

use mirrorback_core::hashing::sha256_hex;
use mirrorback_core::{
    ApiRequest, ApiResponse, ClientConfig, Endpoints, MediaFireClient, RequestBody,
    SESSION_EXPIRED_MESSAGE, Transport,
};
use serde_json::json;

pub const BASE: &str = "http://mock.test";
pub const SECURITY_TOKEN: &str = "sec-token-1";
pub const UNIT_SIZE: u64 = 4_000_000;

pub fn login_html(token: &str) -> String {
    format!(
        r#"<html><body><form id="form_login"><input type="hidden" name="security" value="{token}"><input name="login_email"></form></body></html>"#
    )
}

#[derive(Debug, Clone)]
pub struct ChunkCall {
    pub unit_id: u64,
    pub unit_size: u64,
    pub unit_hash: String,
    pub body_hash: String,
    pub file_size: u64,
    pub file_hash: String,
    pub filename: String,
    pub session_token: String,
    pub folder_key: Option<String>,
    pub quick_key: Option<String>,
    pub source_hash: Option<String>,
    pub target_hash: Option<String>,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct SimpleCall {
    pub endpoint: &'static str,
    pub filename: String,
    pub file_size: u64,
    pub file_hash: Option<String>,
    pub body_len: usize,
    pub folder_key: Option<String>,
    pub quick_key: Option<String>,
}

struct State {
    calls: Vec<&'static str>,
    cookies: Vec<(&'static str, String)>,
    login_html: String,
    login_error: String,
    unit_size: Option<u64>,
    check_rejection: Option<String>,
    checks: Vec<serde_json::Value>,
    token_seq: u64,
    current_token: Option<String>,
    handshakes: usize,
    expire_on_chunk: HashMap<u64, usize>,
    expire_when_files_started: Option<usize>,
    expired_once: bool,
    reject_chunk: Option<u64>,
    expire_on_endpoint: HashSet<&'static str>,
    endless_listing: bool,
    chunks: Vec<ChunkCall>,
    simple: Vec<SimpleCall>,
    assembled: HashMap<String, Vec<u8>>,
    files: Vec<(String, String, String, String)>,
    folders: Vec<(String, String, String)>,
}

/// In-process stand-in for the storage service, speaking the same request
/// and response shapes as the real endpoints.
pub struct MockServer {
    state: Mutex<State>,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                calls: Vec::new(),
                cookies: Vec::new(),
                login_html: login_html(SECURITY_TOKEN),
                login_error: String::new(),
                unit_size: Some(UNIT_SIZE),
                check_rejection: None,
                checks: Vec::new(),
                token_seq: 0,
                current_token: None,
                handshakes: 0,
                expire_on_chunk: HashMap::new(),
                expire_when_files_started: None,
                expired_once: false,
                reject_chunk: None,
                expire_on_endpoint: HashSet::new(),
                endless_listing: false,
                chunks: Vec::new(),
                simple: Vec::new(),
                assembled: HashMap::new(),
                files: Vec::new(),
                folders: Vec::new(),
            }),
        }
    }

    pub fn with_unit_size(self, unit_size: Option<u64>) -> Self {
        self.state.lock().unwrap().unit_size = unit_size;
        self
    }

    pub fn with_login_html(self, html: &str) -> Self {
        self.state.lock().unwrap().login_html = html.to_string();
        self
    }

    pub fn with_login_error(self, message: &str) -> Self {
        self.state.lock().unwrap().login_error = message.to_string();
        self
    }

    pub fn reject_check(self, message: &str) -> Self {
        self.state.lock().unwrap().check_rejection = Some(message.to_string());
        self
    }

    /// The next `times` arrivals of chunk `index` find the session expired.
    pub fn expire_session_on_chunk(self, index: u64, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .expire_on_chunk
            .insert(index, times);
        self
    }

    /// Expires the session once, as soon as `n` distinct files each have at
    /// least one accepted chunk.
    pub fn expire_session_once_files_started(self, n: usize) -> Self {
        self.state.lock().unwrap().expire_when_files_started = Some(n);
        self
    }

    /// The next call to `endpoint` finds the session expired.
    pub fn expire_session_on(self, endpoint: &'static str) -> Self {
        self.state.lock().unwrap().expire_on_endpoint.insert(endpoint);
        self
    }

    /// Every listing page claims more chunks follow.
    pub fn with_endless_listing(self) -> Self {
        self.state.lock().unwrap().endless_listing = true;
        self
    }

    pub fn reject_chunk(self, index: u64) -> Self {
        self.state.lock().unwrap().reject_chunk = Some(index);
        self
    }

    pub fn with_file(self, folder_key: &str, name: &str, quick_key: &str, hash: &str) -> Self {
        self.state.lock().unwrap().files.push((
            folder_key.to_string(),
            name.to_string(),
            quick_key.to_string(),
            hash.to_string(),
        ));
        self
    }

    pub fn with_folder(self, parent_key: &str, name: &str, folder_key: &str) -> Self {
        self.state.lock().unwrap().folders.push((
            parent_key.to_string(),
            name.to_string(),
            folder_key.to_string(),
        ));
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.calls().iter().filter(|c| **c == endpoint).count()
    }

    pub fn handshakes(&self) -> usize {
        self.state.lock().unwrap().handshakes
    }

    pub fn cookie_header(&self, endpoint: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .cookies
            .iter()
            .rev()
            .find(|(e, _)| *e == endpoint)
            .map(|(_, c)| c.clone())
    }

    pub fn checks(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().checks.clone()
    }

    pub fn chunk_calls(&self) -> Vec<ChunkCall> {
        self.state.lock().unwrap().chunks.clone()
    }

    pub fn simple_calls(&self) -> Vec<SimpleCall> {
        self.state.lock().unwrap().simple.clone()
    }

    pub fn assembled(&self, filename: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().assembled.get(filename).cloned()
    }

    fn handle(&self, req: ApiRequest) -> ApiResponse {
        let mut guard = self.state.lock().unwrap();
        let st = &mut *guard;
        let path = req.url.strip_prefix(BASE).unwrap_or(&req.url).to_string();

        match path.as_str() {
            "/login/" => {
                st.calls.push("login_page");
                ApiResponse {
                    status: 200,
                    set_cookies: vec!["ukey=u1; path=/; HttpOnly".to_string()],
                    body: st.login_html.clone(),
                }
            }
            "/dynamic/client_login/mediafire.php" => {
                st.calls.push("client_login");
                st.cookies
                    .push(("client_login", cookie_of(&req)));
                let error = if req.form_value("security") != Some(SECURITY_TOKEN) {
                    "Invalid security token".to_string()
                } else {
                    st.login_error.clone()
                };
                ApiResponse {
                    status: 200,
                    set_cookies: vec!["session=s1; path=/; Secure".to_string()],
                    body: json!({ "errorMessage": error }).to_string(),
                }
            }
            "/application/get_session_token.php" => {
                st.calls.push("session_token");
                let cookie = cookie_of(&req);
                st.cookies.push(("session_token", cookie.clone()));
                if !cookie.contains("session=s1") {
                    return ok(json!({ "response": { "result": "Error", "message": "not logged in" } }));
                }
                st.handshakes += 1;
                st.token_seq += 1;
                let token = format!("tok-{}", st.token_seq);
                st.current_token = Some(token.clone());
                ok(json!({ "response": { "result": "Success", "session_token": token } }))
            }
            "/api/1.5/folder/get_content.php" => {
                st.calls.push("get_content");
                expire_if_scheduled(st, "get_content");
                if !token_ok(st, req.form_value("session_token")) {
                    return expired();
                }
                let folder_key = req.form_value("folder_key").unwrap_or_default().to_string();
                let more = if st.endless_listing { "yes" } else { "no" };
                match req.form_value("content_type") {
                    Some("folders") => {
                        let folders: Vec<_> = st
                            .folders
                            .iter()
                            .filter(|(p, _, _)| *p == folder_key)
                            .map(|(_, name, key)| json!({ "name": name, "folderkey": key }))
                            .collect();
                        ok(json!({ "response": { "result": "Success", "folder_content": { "more_chunks": more, "folders": folders } } }))
                    }
                    _ => {
                        let files: Vec<_> = st
                            .files
                            .iter()
                            .filter(|(f, _, _, _)| *f == folder_key)
                            .map(|(_, name, qk, hash)| {
                                json!({ "filename": name, "quickkey": qk, "hash": hash })
                            })
                            .collect();
                        ok(json!({ "response": { "result": "Success", "folder_content": { "more_chunks": more, "files": files } } }))
                    }
                }
            }
            "/api/1.5/upload/check.php" => {
                st.calls.push("check");
                expire_if_scheduled(st, "check");
                if !token_ok(st, req.query_value("session_token")) {
                    return expired();
                }
                let uploads: serde_json::Value =
                    serde_json::from_str(req.query_value("uploads").unwrap_or("null"))
                        .unwrap_or(serde_json::Value::Null);
                st.checks.push(uploads);
                if let Some(message) = st.check_rejection.clone() {
                    return ok(json!({ "response": { "result": "Error", "message": message } }));
                }
                match st.unit_size {
                    Some(unit) => ok(json!({ "response": {
                        "result": "Success",
                        "resumable_upload": { "unit_size": unit.to_string() }
                    } })),
                    None => ok(json!({ "response": { "result": "Success" } })),
                }
            }
            "/api/1.5/upload/simple.php" | "/api/1.5/upload/update.php" => {
                let endpoint = if path.ends_with("simple.php") {
                    "simple"
                } else {
                    "update"
                };
                st.calls.push(endpoint);
                expire_if_scheduled(st, endpoint);
                if !token_ok(st, req.query_value("session_token")) {
                    return expired();
                }
                let body = body_of(&req);
                let filename = req.header_value("X-Filename").unwrap_or_default().to_string();
                st.simple.push(SimpleCall {
                    endpoint,
                    filename: filename.clone(),
                    file_size: parse_header(&req, "X-Filesize"),
                    file_hash: req.header_value("X-Filehash").map(str::to_string),
                    body_len: body.len(),
                    folder_key: req.query_value("folder_key").map(str::to_string),
                    quick_key: req.query_value("quick_key").map(str::to_string),
                });
                st.assembled.insert(filename.clone(), body);
                ok(json!({ "response": { "result": "Success", "doupload": { "result": "0", "key": format!("up-{filename}") } } }))
            }
            "/api/1.5/upload/resumable.php" => {
                st.calls.push("resumable");
                let body = body_of(&req);
                let unit_id = parse_header(&req, "X-Unit-Id");
                let mut call = ChunkCall {
                    unit_id,
                    unit_size: parse_header(&req, "X-Unit-Size"),
                    unit_hash: req.header_value("X-Unit-Hash").unwrap_or_default().to_string(),
                    body_hash: sha256_hex(&body),
                    file_size: parse_header(&req, "X-Filesize"),
                    file_hash: req.header_value("X-Filehash").unwrap_or_default().to_string(),
                    filename: req.header_value("X-Filename").unwrap_or_default().to_string(),
                    session_token: req
                        .query_value("session_token")
                        .unwrap_or_default()
                        .to_string(),
                    folder_key: req.query_value("folder_key").map(str::to_string),
                    quick_key: req.query_value("quick_key").map(str::to_string),
                    source_hash: req.query_value("source_hash").map(str::to_string),
                    target_hash: req.query_value("target_hash").map(str::to_string),
                    accepted: false,
                };

                if !token_ok(st, Some(call.session_token.as_str())) {
                    st.chunks.push(call);
                    return expired();
                }
                if let Some(left) = st.expire_on_chunk.get_mut(&unit_id) {
                    if *left > 0 {
                        *left -= 1;
                        st.current_token = None;
                        st.chunks.push(call);
                        return expired();
                    }
                }
                if st.reject_chunk == Some(unit_id)
                    || call.body_hash != call.unit_hash
                    || body.len() as u64 != call.unit_size
                {
                    st.chunks.push(call);
                    return ok(json!({ "response": { "result": "Success", "doupload": { "result": "-40" } } }));
                }

                call.accepted = true;
                let filename = call.filename.clone();
                st.chunks.push(call);
                st.assembled.entry(filename.clone()).or_default().extend_from_slice(&body);
                if let Some(n) = st.expire_when_files_started {
                    let started: HashSet<&str> = st
                        .chunks
                        .iter()
                        .filter(|c| c.accepted)
                        .map(|c| c.filename.as_str())
                        .collect();
                    if !st.expired_once && started.len() >= n {
                        st.expired_once = true;
                        st.current_token = None;
                    }
                }
                ok(json!({ "response": { "result": "Success", "doupload": { "result": "0", "key": format!("res-{filename}") } } }))
            }
            _ => ApiResponse {
                status: 404,
                set_cookies: Vec::new(),
                body: "not found".to_string(),
            },
        }
    }
}

impl Transport for MockServer {
    fn execute<'a>(
        &'a self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = mirrorback_core::Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            // Give concurrent transfers a chance to interleave.
            tokio::task::yield_now().await;
            Ok(self.handle(request))
        })
    }
}

fn ok(body: serde_json::Value) -> ApiResponse {
    ApiResponse {
        status: 200,
        set_cookies: Vec::new(),
        body: body.to_string(),
    }
}

fn expired() -> ApiResponse {
    ok(json!({ "response": {
        "result": "Error",
        "error": "105",
        "message": SESSION_EXPIRED_MESSAGE,
    } }))
}

fn expire_if_scheduled(st: &mut State, endpoint: &'static str) {
    if st.expire_on_endpoint.remove(endpoint) {
        st.current_token = None;
    }
}

fn token_ok(st: &State, token: Option<&str>) -> bool {
    match (&st.current_token, token) {
        (Some(current), Some(token)) => current == token,
        _ => false,
    }
}

fn cookie_of(req: &ApiRequest) -> String {
    req.header_value("cookie").unwrap_or_default().to_string()
}

fn body_of(req: &ApiRequest) -> Vec<u8> {
    match &req.body {
        RequestBody::Bytes(bytes) => bytes.clone(),
        _ => Vec::new(),
    }
}

fn parse_header(req: &ApiRequest, name: &str) -> u64 {
    req.header_value(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(u64::MAX)
}

pub fn client(server: MockServer, temp_dir: &Path) -> MediaFireClient<MockServer> {
    let mut config = ClientConfig::new("me@example.com", "hunter2");
    config.endpoints = Endpoints::with_base(BASE);
    config.temp_dir = temp_dir.to_path_buf();
    MediaFireClient::with_transport(config, server)
}

/// Writes `size` bytes of a non-repeating-per-unit pattern.
pub fn write_file(path: PathBuf, size: usize) -> Vec<u8> {
    let bytes: Vec<u8> = (0..size).map(|i| ((i * 31 + i / 997) % 251) as u8).collect();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, &bytes).unwrap();
    bytes
}

pub fn temp_artifacts(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".part"))
        })
        .collect()
}
