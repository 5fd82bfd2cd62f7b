//! Knowledge base sources: the spreadsheet and a local JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ConfigError, KnowledgeBaseError};
use crate::kb::record::SheetRow;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of a signed assertion; Google rejects anything over an hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Per-request limit for Sheets and token calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can produce knowledge base rows in source order.
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Human-readable source name for logs and errors.
    fn name(&self) -> &str;

    /// Fetch every row. The first matching row wins, so order matters.
    async fn fetch_rows(&self) -> Result<Vec<SheetRow>, KnowledgeBaseError>;
}

// ── Google Sheets ───────────────────────────────────────────────────

/// How requests to the Sheets API are authorized.
#[derive(Debug, Clone)]
pub enum SheetsAuth {
    /// Service-account key; a fresh access token is minted per fetch.
    ServiceAccount(ServiceAccountKey),
    /// `?key=` query parameter; works for link-shared sheets.
    ApiKey(SecretString),
    /// Pre-minted OAuth2 bearer token.
    Bearer(SecretString),
}

/// The parts of a Google service-account key file needed to sign in.
#[derive(Debug, Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: SecretString,
    pub private_key_id: Option<String>,
    pub token_uri: String,
}

/// Shape of the credentials file. Service-account keys are tried first.
#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialsFile {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        private_key_id: Option<String>,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    ApiKey {
        api_key: String,
    },
    AccessToken {
        access_token: String,
    },
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl SheetsAuth {
    /// Read credentials from a JSON file: a service-account key, or an
    /// object holding `api_key` or `access_token`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: CredentialsFile = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!(
                "{}: expected a service-account key, 'api_key' or 'access_token' ({e})",
                path.display()
            ))
        })?;
        Ok(match parsed {
            CredentialsFile::ServiceAccount {
                client_email,
                private_key,
                private_key_id,
                token_uri,
            } => Self::ServiceAccount(ServiceAccountKey {
                client_email,
                private_key: SecretString::from(private_key),
                private_key_id,
                token_uri,
            }),
            CredentialsFile::ApiKey { api_key } => Self::ApiKey(SecretString::from(api_key)),
            CredentialsFile::AccessToken { access_token } => Self::Bearer(SecretString::from(access_token)),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ServiceAccountKey {
    /// Signed RS256 JWT to trade for an access token at `token_uri`.
    fn assertion(&self, now: DateTime<Utc>) -> Result<String, jsonwebtoken::errors::Error> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: SHEETS_READONLY_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.private_key.expose_secret().as_bytes())?;
        jsonwebtoken::encode(&header, &claims, &key)
    }
}

/// Reads a worksheet through the Sheets v4 `values` endpoint.
pub struct GoogleSheetsSource {
    sheet_id: String,
    sheet_name: String,
    auth: SheetsAuth,
    api_base: String,
    client: reqwest::Client,
    label: String,
}

impl GoogleSheetsSource {
    pub fn new(sheet_id: impl Into<String>, sheet_name: impl Into<String>, auth: SheetsAuth) -> Self {
        let sheet_id = sheet_id.into();
        let sheet_name = sheet_name.into();
        let label = format!("gsheet:{sheet_id}/{sheet_name}");
        Self {
            sheet_id,
            sheet_name,
            auth,
            api_base: SHEETS_API_BASE.to_string(),
            client: http_client(DEFAULT_TIMEOUT),
            label,
        }
    }

    /// Bound every Sheets and token request to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    /// Point at another Sheets-compatible endpoint.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn unavailable(&self, reason: impl Into<String>) -> KnowledgeBaseError {
        KnowledgeBaseError::SourceUnavailable {
            source_name: self.label.clone(),
            reason: reason.into(),
        }
    }

    /// Values URL for the whole worksheet. The sheet name is the A1 range.
    fn values_url(&self) -> Result<reqwest::Url, KnowledgeBaseError> {
        let mut url = reqwest::Url::parse(&self.api_base).map_err(|e| self.unavailable(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| self.unavailable("invalid base url"))?
            .extend([self.sheet_id.as_str(), "values", self.sheet_name.as_str()]);
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");
        if let SheetsAuth::ApiKey(ref key) = self.auth {
            url.query_pairs_mut().append_pair("key", key.expose_secret());
        }
        Ok(url)
    }

    /// Exchange a signed assertion for a short-lived access token.
    async fn access_token(&self, key: &ServiceAccountKey) -> Result<SecretString, KnowledgeBaseError> {
        let assertion = key
            .assertion(Utc::now())
            .map_err(|e| self.unavailable(format!("cannot sign service-account assertion: {e}")))?;

        let resp = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| self.unavailable(format!("token request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| self.unavailable(format!("bad token response: {e}")))?;
        debug!(account = %key.client_email, "Minted Sheets access token");
        Ok(SecretString::from(token.access_token))
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

#[async_trait]
impl SheetSource for GoogleSheetsSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn fetch_rows(&self) -> Result<Vec<SheetRow>, KnowledgeBaseError> {
        let mut request = self.client.get(self.values_url()?);
        match self.auth {
            SheetsAuth::ServiceAccount(ref key) => {
                let token = self.access_token(key).await?;
                request = request.bearer_auth(token.expose_secret());
            }
            SheetsAuth::Bearer(ref token) => request = request.bearer_auth(token.expose_secret()),
            SheetsAuth::ApiKey(_) => {}
        }

        let resp = request.send().await.map_err(|e| self.unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("Sheets API returned {status}: {body}")));
        }

        let data: Value = resp.json().await.map_err(|e| self.unavailable(e.to_string()))?;
        Ok(rows_from_values(&data))
    }
}

/// Convert a `values` response (header row first) into keyed rows.
///
/// The API trims trailing empty cells, so short rows are padded with empty
/// strings for every header.
pub fn rows_from_values(data: &Value) -> Vec<SheetRow> {
    let Some(values) = data.get("values").and_then(Value::as_array) else {
        return Vec::new();
    };
    let Some((header, body)) = values.split_first() else {
        return Vec::new();
    };

    let header: Vec<String> = header
        .as_array()
        .map(|cells| cells.iter().map(|c| cell_text(c).trim().to_string()).collect())
        .unwrap_or_default();

    body.iter()
        .map(|row| {
            let cells = row.as_array().map(Vec::as_slice).unwrap_or_default();
            header
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(i, name)| (name.clone(), cells.get(i).map(cell_text).unwrap_or_default()))
                .collect()
        })
        .collect()
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ── Local file ──────────────────────────────────────────────────────

/// Reads rows from a JSON array of objects, e.g.
/// `[{"keywords": "vpn", "steps_es": "…", "steps_en": "…"}]`.
pub struct JsonFileSource {
    path: PathBuf,
    label: String,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = format!("file:{}", path.display());
        Self { path, label }
    }
}

#[async_trait]
impl SheetSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn fetch_rows(&self) -> Result<Vec<SheetRow>, KnowledgeBaseError> {
        let unavailable = |reason: String| KnowledgeBaseError::SourceUnavailable {
            source_name: self.label.clone(),
            reason,
        };

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let rows: Vec<serde_json::Map<String, Value>> =
            serde_json::from_str(&raw).map_err(|e| unavailable(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|(k, v)| (k.trim().to_string(), cell_text(&v))).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn rows_from_values_pads_short_rows() {
        let data = serde_json::json!({
            "range": "KB!A1:C3",
            "majorDimension": "ROWS",
            "values": [
                ["keywords", "steps_es", "steps_en"],
                ["login issue", "Reinicia sesión", "Restart session"],
                ["vpn", "Reconecta la VPN"]
            ]
        });
        let rows = rows_from_values(&data);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["steps_en"], "Restart session");
        assert_eq!(rows[1]["steps_es"], "Reconecta la VPN");
        assert_eq!(rows[1]["steps_en"], "");
    }

    #[test]
    fn rows_from_values_keeps_cells_as_text() {
        let data = serde_json::json!({
            "values": [[" keywords ", "steps_es"], [404, true]]
        });
        let rows = rows_from_values(&data);
        assert_eq!(rows[0]["keywords"], "404");
        assert_eq!(rows[0]["steps_es"], "true");
    }

    #[test]
    fn rows_from_values_empty_sheet() {
        assert!(rows_from_values(&serde_json::json!({})).is_empty());
        assert!(rows_from_values(&serde_json::json!({"values": []})).is_empty());
        assert!(rows_from_values(&serde_json::json!({"values": [["keywords"]]})).is_empty());
    }

    #[test]
    fn values_url_encodes_sheet_name() {
        let source = GoogleSheetsSource::new(
            "abc123",
            "KB Sheet",
            SheetsAuth::ApiKey(SecretString::from("k".to_string())),
        );
        let url = source.values_url().unwrap();
        assert_eq!(url.path(), "/v4/spreadsheets/abc123/values/KB%20Sheet");
        let query = url.query().unwrap();
        assert!(query.contains("valueRenderOption=FORMATTED_VALUE"));
        assert!(query.contains("key=k"));
    }

    #[test]
    fn bearer_auth_keeps_key_out_of_url() {
        let source = GoogleSheetsSource::new(
            "abc123",
            "KB",
            SheetsAuth::Bearer(SecretString::from("tok".to_string())),
        );
        let url = source.values_url().unwrap();
        assert!(!url.query().unwrap().contains("key="));
        assert_eq!(source.name(), "gsheet:abc123/KB");
    }

    #[test]
    fn credentials_file_variants() {
        let mut api = tempfile::NamedTempFile::new().unwrap();
        write!(api, r#"{{"api_key": "AIza-test"}}"#).unwrap();
        assert!(matches!(SheetsAuth::from_file(api.path()).unwrap(), SheetsAuth::ApiKey(_)));

        let mut token = tempfile::NamedTempFile::new().unwrap();
        write!(token, r#"{{"access_token": "ya29.test"}}"#).unwrap();
        assert!(matches!(SheetsAuth::from_file(token.path()).unwrap(), SheetsAuth::Bearer(_)));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{"type": "service_account"}}"#).unwrap();
        assert!(matches!(SheetsAuth::from_file(bad.path()), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn credentials_file_service_account_key() {
        let key = serde_json::json!({
            "type": "service_account",
            "project_id": "fixbuddy",
            "private_key_id": "abc",
            "private_key": TEST_PRIVATE_KEY,
            "client_email": "kb-reader@fixbuddy.iam.gserviceaccount.com",
            "client_id": "123"
        });
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{key}").unwrap();

        match SheetsAuth::from_file(file.path()).unwrap() {
            SheetsAuth::ServiceAccount(sa) => {
                assert_eq!(sa.client_email, "kb-reader@fixbuddy.iam.gserviceaccount.com");
                assert_eq!(sa.private_key_id.as_deref(), Some("abc"));
                assert_eq!(sa.token_uri, DEFAULT_TOKEN_URI);
            }
            other => panic!("Expected service account, got {:?}", other),
        }
    }

    const TEST_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/service_account_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../../tests/fixtures/service_account_pub.pem");

    fn service_account(token_uri: &str) -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "kb-reader@fixbuddy.iam.gserviceaccount.com".into(),
            private_key: SecretString::from(TEST_PRIVATE_KEY.to_string()),
            private_key_id: Some("abc".into()),
            token_uri: token_uri.into(),
        }
    }

    #[test]
    fn assertion_is_signed_for_token_endpoint() {
        let key = service_account(DEFAULT_TOKEN_URI);
        let jwt = key.assertion(Utc::now()).unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("abc"));

        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&[DEFAULT_TOKEN_URI]);
        let public = jsonwebtoken::DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap();
        let claims = jsonwebtoken::decode::<AssertionClaims>(&jwt, &public, &validation)
            .unwrap()
            .claims;
        assert_eq!(claims.iss, key.client_email);
        assert_eq!(claims.scope, SHEETS_READONLY_SCOPE);
        assert_eq!(claims.exp - claims.iat, ASSERTION_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn unusable_private_key_is_unavailable() {
        let mut key = service_account(DEFAULT_TOKEN_URI);
        key.private_key = SecretString::from("not a pem".to_string());
        let source = GoogleSheetsSource::new("abc123", "KB", SheetsAuth::ServiceAccount(key));

        match source.fetch_rows().await.unwrap_err() {
            KnowledgeBaseError::SourceUnavailable { reason, .. } => {
                assert!(reason.contains("service-account assertion"), "{reason}")
            }
            other => panic!("Expected unavailable, got {:?}", other),
        }
    }

    /// Minimal HTTP/1.1 responder: answers each request with the body of the
    /// first route whose path prefix matches, and records the raw requests.
    async fn serve(routes: Vec<(&'static str, Value)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                let body = routes
                    .iter()
                    .find(|(prefix, _)| request.split_whitespace().nth(1).is_some_and(|p| p.starts_with(prefix)))
                    .map(|(_, body)| body.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                log.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        (base, seen)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn service_account_token_is_exchanged_and_used() {
        let (base, seen) = serve(vec![
            ("/token", serde_json::json!({"access_token": "ya29.minted", "expires_in": 3599})),
            (
                "/v4/spreadsheets",
                serde_json::json!({"values": [["keywords", "steps_es"], ["vpn", "Reconecta"]]}),
            ),
        ])
        .await;

        let key = service_account(&format!("{base}/token"));
        let source = GoogleSheetsSource::new("abc123", "KB", SheetsAuth::ServiceAccount(key))
            .with_api_base(format!("{base}/v4/spreadsheets"));
        let rows = source.fetch_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["keywords"], "vpn");

        let requests = seen.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("POST /token"));
        assert!(requests[0].contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"));
        assert!(requests[1].starts_with("GET /v4/spreadsheets/abc123/values/KB"));
        assert!(requests[1].to_lowercase().contains("authorization: bearer ya29.minted"));
    }

    #[tokio::test]
    async fn stalled_sheets_api_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v4/spreadsheets", listener.local_addr().unwrap());
        // Accept and hold connections without ever answering.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let source = GoogleSheetsSource::new("abc123", "KB", SheetsAuth::ApiKey(SecretString::from("k".to_string())))
            .with_api_base(base)
            .with_timeout(Duration::from_millis(200));
        let result = tokio::time::timeout(Duration::from_secs(5), source.fetch_rows())
            .await
            .expect("fetch should give up on its own");
        assert!(matches!(result, Err(KnowledgeBaseError::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn json_file_source_reads_rows_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"keywords": "printer", "steps_es": "Reinicia", "steps_en": "Restart"}},
                {{"keywords": "vpn", "steps_es": "Reconecta", "steps_en": null}}
            ]"#
        )
        .unwrap();

        let source = JsonFileSource::new(file.path());
        let rows = source.fetch_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["keywords"], "printer");
        assert_eq!(rows[1]["steps_en"], "");
    }

    #[tokio::test]
    async fn json_file_source_missing_file_is_unavailable() {
        let source = JsonFileSource::new("/nonexistent/kb.json");
        let err = source.fetch_rows().await.unwrap_err();
        assert!(matches!(err, KnowledgeBaseError::SourceUnavailable { .. }));
    }
}
