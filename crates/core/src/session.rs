use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{Endpoints, Envelope, LoginResponse, SessionTokenResponse};
use crate::config::ClientConfig;
use crate::transport::{ApiRequest, ApiResponse, Transport};
use crate::{Error, Result};

const SECURITY_MARKER: &str = "security";
const VALUE_OPEN: &str = "\" value=\"";
const VALUE_CLOSE: &str = "\">";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated,
}

/// Cookies accumulated across the login stages, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: Vec<(String, String)>,
}

impl CookieJar {
    /// Keeps the leading `name=value` pair of a `Set-Cookie` header; attributes
    /// are ignored. A later cookie with the same name replaces the earlier one.
    pub fn absorb_set_cookie(&mut self, header: &str) {
        let pair = header.split(';').next().unwrap_or_default().trim();
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let value = value.trim().to_string();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn absorb_response(&mut self, res: &ApiResponse) {
        for header in &res.set_cookies {
            self.absorb_set_cookie(header);
        }
    }

    pub fn header_value(&self) -> String {
        self.entries
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Default)]
struct Session {
    security_token: Option<String>,
    session_token: Option<String>,
    cookies: CookieJar,
    state: SessionState,
}

impl Session {
    fn ticket(&self) -> Option<SessionTicket> {
        match (self.state, &self.session_token) {
            (SessionState::Authenticated, Some(token)) => Some(SessionTicket {
                session_token: token.clone(),
                cookie_header: self.cookies.header_value(),
            }),
            _ => None,
        }
    }
}

/// Snapshot of the session materials attached to authenticated calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub session_token: String,
    pub cookie_header: String,
}

/// Owns the login handshake and the session it produces. The session lock is
/// held for the whole handshake, so concurrent callers wait for a single
/// in-flight login instead of starting their own.
pub struct SessionManager {
    email: String,
    password: String,
    endpoints: Endpoints,
    session: Mutex<Session>,
    handshakes: AtomicUsize,
}

impl SessionManager {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            email: config.email.clone(),
            password: config.password.clone(),
            endpoints: config.endpoints.clone(),
            session: Mutex::new(Session::default()),
            handshakes: AtomicUsize::new(0),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state
    }

    /// Number of handshakes started since construction.
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::Relaxed)
    }

    pub async fn ensure_session(&self, transport: &dyn Transport) -> Result<SessionTicket> {
        let mut session = self.session.lock().await;
        if let Some(ticket) = session.ticket() {
            return Ok(ticket);
        }

        let attempt = self.handshakes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(event = "session.handshake.start", attempt, "session.handshake.start");

        *session = Session::default();
        match self.handshake(transport, &mut session).await {
            Ok(ticket) => {
                info!(
                    event = "session.handshake.finish",
                    attempt,
                    cookies = session.cookies.len(),
                    "session.handshake.finish"
                );
                Ok(ticket)
            }
            Err(e) => {
                *session = Session::default();
                warn!(
                    event = "session.handshake.failed",
                    attempt,
                    error = %e,
                    "session.handshake.failed"
                );
                Err(e)
            }
        }
    }

    /// Resets the session if it is still the one `stale` was taken from.
    /// Returns `false` when another caller already replaced it.
    pub async fn invalidate(&self, stale: &SessionTicket) -> bool {
        let mut session = self.session.lock().await;
        if session.session_token.as_deref() != Some(stale.session_token.as_str()) {
            debug!(event = "session.invalidate.skipped", "session.invalidate.skipped");
            return false;
        }
        *session = Session::default();
        debug!(event = "session.invalidated", "session.invalidated");
        true
    }

    async fn handshake(
        &self,
        transport: &dyn Transport,
        session: &mut Session,
    ) -> Result<SessionTicket> {
        // Stage 1: anonymous login page carries the anti-forgery token.
        let res = transport
            .execute(
                ApiRequest::get(&self.endpoints.login_page)
                    .header("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
                    .header("cookie", ""),
            )
            .await
            .map_err(|e| Error::auth(format!("login page request failed: {e}")))?;
        if !res.is_success() {
            return Err(Error::auth(format!("login page http {}", res.status)));
        }
        let security = extract_security_token(&res.body)
            .ok_or_else(|| Error::auth("security token not found in login page"))?;
        session.cookies.absorb_response(&res);
        session.security_token = Some(security.clone());
        debug!(event = "session.stage", stage = "security_token", "session.stage");

        // Stage 2: credentials + token.
        let res = transport
            .execute(
                ApiRequest::post(&self.endpoints.client_login)
                    .header("accept", "*/*")
                    .header("cookie", session.cookies.header_value())
                    .header("referer", &self.endpoints.login_page)
                    .form(&[
                        ("security", security.as_str()),
                        ("login_email", self.email.as_str()),
                        ("login_pass", self.password.as_str()),
                        ("login_remember", "true"),
                    ]),
            )
            .await
            .map_err(|e| Error::auth(format!("login request failed: {e}")))?;
        let login: LoginResponse = res
            .json()
            .map_err(|e| Error::auth(format!("login response: {e}")))?;
        match login.error_message.as_deref() {
            Some("") => {}
            Some(message) => return Err(Error::auth(format!("login refused: {message}"))),
            None => return Err(Error::auth("login response missing errorMessage")),
        }
        session.cookies.absorb_response(&res);
        debug!(event = "session.stage", stage = "login", "session.stage");

        // Stage 3: cookies -> session token.
        let res = transport
            .execute(
                ApiRequest::post(&self.endpoints.session_token)
                    .header("accept", "*/*")
                    .header("cookie", session.cookies.header_value()),
            )
            .await
            .map_err(|e| Error::auth(format!("session token request failed: {e}")))?;
        let parsed: Envelope<SessionTokenResponse> = res
            .json()
            .map_err(|e| Error::auth(format!("session token response: {e}")))?;
        let token = parsed
            .response
            .session_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::auth(format!(
                    "session token missing: {}",
                    parsed.response.message.as_deref().unwrap_or("no message")
                ))
            })?;

        session.session_token = Some(token);
        session.state = SessionState::Authenticated;
        session
            .ticket()
            .ok_or_else(|| Error::auth("session not authenticated after handshake"))
    }
}

// Scans for `security` ... `" value="` ... `">` in the login page markup.
pub fn extract_security_token(content: &str) -> Option<String> {
    let after_marker = content.split(SECURITY_MARKER).nth(1)?;
    let after_open = after_marker.split(VALUE_OPEN).nth(1)?;
    let (token, _) = after_open.split_once(VALUE_CLOSE)?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_extracted_from_hidden_input() {
        let html = r#"<form><input type="hidden" name="security" value="abc123"><input name="x"></form>"#;
        assert_eq!(extract_security_token(html).as_deref(), Some("abc123"));
    }

    #[test]
    fn token_scan_reports_absence_instead_of_panicking() {
        assert_eq!(extract_security_token(""), None);
        assert_eq!(extract_security_token("<html>no token here</html>"), None);
        assert_eq!(extract_security_token(r#"name="security""#), None);
        assert_eq!(extract_security_token(r#"name="security" value="unterminated"#), None);
        assert_eq!(extract_security_token(r#"name="security" value="">"#), None);
    }

    #[test]
    fn cookie_jar_accumulates_and_replaces_by_name() {
        let mut jar = CookieJar::default();
        jar.absorb_set_cookie("ukey=one; path=/; HttpOnly");
        jar.absorb_set_cookie("session=s1; Secure");
        jar.absorb_set_cookie("ukey=two; path=/");
        jar.absorb_set_cookie("garbage-without-equals");

        assert_eq!(jar.len(), 2);
        assert_eq!(jar.header_value(), "ukey=two; session=s1");
    }
}
