//! Authenticated session against the Meiju cloud API.
//!
//! A [`CloudSession`] holds the mutable per-account state (access token,
//! session key, optional password) and performs the signed HTTP exchange.
//! Every operation goes through one generic [`request`](CloudSession::request)
//! path that fills the protocol bookkeeping fields, signs the body, and
//! classifies the response envelope into an [`ApiOutcome`].
//!
//! # Concurrency
//!
//! Data calls (list/query/control) may run concurrently against the same
//! session; they only take brief read locks to pick up the current token
//! and session key. Login is the sole mutator of session state and runs
//! under a per-session critical section so two concurrent token-error
//! recoveries cannot interleave token and session-key installation.

use std::sync::RwLock;

use chrono::{Local, Utc};
use rand::RngCore;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::credentials::Credentials;
use crate::crypto::CloudSecurity;
use crate::error::Error;
use crate::response::{
    value_as_i64, ApiOutcome, ApplianceListData, ApplianceMap, ApplianceRecord, Envelope,
    HomeMap, HomegroupListData, CODE_TRANSPORT, CODE_UNPARSEABLE,
};

/// Endpoint paths consumed by the session.
mod endpoints {
    pub const LOGIN_ID: &str = "/v1/user/login/id/get";
    pub const LOGIN: &str = "/mj/user/login";
    pub const HOMEGROUP_LIST: &str = "/v1/homegroup/list/get";
    pub const APPLIANCE_LIST: &str = "/v1/appliance/home/list/get";
    pub const DEVICE_STATUS: &str = "/mjl/v1/device/status/lua/get";
    pub const DEVICE_CONTROL: &str = "/mjl/v1/device/lua/control";
}

/// Mutable state owned exclusively by the session.
struct SessionState {
    security: CloudSecurity,
    access_token: Option<String>,
    session_key: Option<String>,
    password: Option<SecretString>,
}

/// Authenticated client session for one Meiju cloud account.
///
/// # Example
///
/// ```no_run
/// use meiju_core::CloudSession;
///
/// #[tokio::main]
/// async fn main() -> Result<(), meiju_core::Error> {
///     let session = CloudSession::new("user@example.com").with_password("secret");
///     session.login().await?;
///
///     if let meiju_core::ApiOutcome::Success(homes) = session.list_homes().await {
///         for (id, name) in homes {
///             println!("{id}: {name}");
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct CloudSession {
    account: String,
    device_id: String,
    api_url: String,
    http: reqwest::Client,
    state: RwLock<SessionState>,
    /// Serializes login/refresh; data calls never take this.
    login_lock: tokio::sync::Mutex<()>,
}

impl CloudSession {
    /// Creates a session for the given account with no credentials yet.
    pub fn new(account: impl Into<String>) -> Self {
        let account = account.into();
        Self {
            device_id: CloudSecurity::device_id(&account),
            account,
            api_url: crate::API_URL.to_string(),
            http: reqwest::Client::new(),
            state: RwLock::new(SessionState {
                security: CloudSecurity::default(),
                access_token: None,
                session_key: None,
                password: None,
            }),
            login_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Attaches the account password, enabling [`login`](Self::login) and
    /// password-based credential refresh.
    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.state.write().unwrap().password = Some(SecretString::from(password.into()));
        self
    }

    /// Overrides the API base URL (regional endpoints, tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// The account this session authenticates.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// The device id derived from the account.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The access token currently held, if any.
    pub fn access_token(&self) -> Option<String> {
        self.state.read().unwrap().access_token.clone()
    }

    /// Returns `true` when an access token is held.
    pub fn is_logged_in(&self) -> bool {
        self.state.read().unwrap().access_token.is_some()
    }

    /// Returns `true` when a password is available for refresh.
    pub fn has_password(&self) -> bool {
        self.state.read().unwrap().password.is_some()
    }

    /// Logs in with the stored account password.
    ///
    /// Resolves the login id, posts the two-level login request through the
    /// signed path, then unwraps and installs the access token and session
    /// key as one unit. Runs under the session's login critical section;
    /// concurrent callers queue rather than race.
    pub async fn login(&self) -> Result<(), Error> {
        let _guard = self.login_lock.lock().await;

        let password = self
            .state
            .read()
            .unwrap()
            .password
            .clone()
            .ok_or_else(|| Error::Authentication("no password available for login".into()))?;

        let login_id = self.resolve_login_id().await?;
        debug!(account = %self.account, "resolved login id");

        let stamp = timestamp();
        let (iam_password, std_password) = {
            let state = self.state.read().unwrap();
            (
                state.security.encrypt_iam_password(password.expose_secret()),
                state
                    .security
                    .encrypt_password(&login_id, password.expose_secret()),
            )
        };

        let body = json!({
            "iotData": {
                "clientType": crate::CLIENT_TYPE,
                "deviceId": self.device_id,
                "iampwd": iam_password,
                "iotAppId": crate::APP_ID,
                "loginAccount": self.account,
                "password": std_password,
                "reqId": random_request_id(),
                "stamp": stamp,
            },
            "data": {
                "appKey": crate::APP_KEY,
                "deviceId": self.device_id,
                "platform": crate::PLATFORM,
            },
            "timestamp": stamp,
            "stamp": stamp,
        });

        match self.request(endpoints::LOGIN, body).await {
            ApiOutcome::Success(data) => {
                let token = data
                    .pointer("/mdata/accessToken")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Parse("access token missing from login response".into()))?;
                let wrapped_key = data
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Parse("session key missing from login response".into()))?;

                let session_key = {
                    let state = self.state.read().unwrap();
                    state.security.unwrap_session_key(wrapped_key)?
                };

                let mut state = self.state.write().unwrap();
                state.access_token = Some(token.to_string());
                state.session_key = Some(session_key.clone());
                state.security.set_session_key(session_key.into_bytes(), None);

                debug!(account = %self.account, "login succeeded");
                Ok(())
            }
            ApiOutcome::Failure { code, message } => Err(Error::Authentication(format!(
                "login rejected ({code}): {message}"
            ))),
        }
    }

    /// Resolves the intermediate login id for the account.
    async fn resolve_login_id(&self) -> Result<String, Error> {
        let body = json!({
            "loginAccount": self.account,
            "type": "1",
        });
        match self.request(endpoints::LOGIN_ID, body).await {
            ApiOutcome::Success(data) => data
                .get("loginId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Authentication(format!(
                        "no login id returned for account {}",
                        self.account
                    ))
                }),
            ApiOutcome::Failure { code, message } => Err(Error::Authentication(format!(
                "login id lookup failed ({code}): {message}"
            ))),
        }
    }

    /// Sends a signed request to an endpoint and classifies the response.
    ///
    /// Object bodies get `reqId` (32 hex chars) and `stamp`
    /// (`YYYYMMDDHHMMSS`) filled in when absent. The serialized body is
    /// signed with the current unix time as nonce; the signature, nonce,
    /// secret-version marker, and (when held) access token travel as
    /// headers. Transport failures and unparseable responses come back as
    /// failures with the reserved negative codes, never as panics.
    pub async fn request(&self, endpoint: &str, body: Value) -> ApiOutcome {
        let body = fill_protocol_fields(body);
        let payload = body.to_string();
        let nonce = Utc::now().timestamp().to_string();

        let (signature, token) = {
            let state = self.state.read().unwrap();
            (
                state.security.sign(&payload, &nonce),
                state.access_token.clone(),
            )
        };

        let url = format!("{}{}", self.api_url, endpoint);
        debug!(%url, "sending cloud request");

        let mut request = self
            .http
            .post(&url)
            .timeout(crate::DEFAULT_TIMEOUT)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header("secretVersion", "1")
            .header("sign", signature)
            .header("random", &nonce)
            .body(payload);
        if let Some(token) = token {
            request = request.header("accesstoken", token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(%url, "transport failure: {err}");
                return ApiOutcome::failure(CODE_TRANSPORT, err.to_string());
            }
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return ApiOutcome::failure(CODE_TRANSPORT, err.to_string()),
        };

        match serde_json::from_slice::<Envelope>(&bytes) {
            Ok(envelope) => envelope.classify(),
            Err(err) => ApiOutcome::failure(
                CODE_UNPARSEABLE,
                format!("unparseable response (status {status}): {err}"),
            ),
        }
    }

    /// Lists the account's homes as an id → name mapping.
    pub async fn list_homes(&self) -> ApiOutcome<HomeMap> {
        match self.request(endpoints::HOMEGROUP_LIST, json!({})).await {
            ApiOutcome::Success(data) => match serde_json::from_value::<HomegroupListData>(data) {
                Ok(list) => {
                    let mut homes = HomeMap::new();
                    for home in list.home_list.unwrap_or_default() {
                        match value_as_i64(&home.homegroup_id) {
                            Some(id) => {
                                homes.insert(id, home.name);
                            }
                            None => debug!("skipping home with unreadable id"),
                        }
                    }
                    ApiOutcome::Success(homes)
                }
                Err(err) => ApiOutcome::failure(
                    CODE_UNPARSEABLE,
                    format!("unexpected home list shape: {err}"),
                ),
            },
            ApiOutcome::Failure { code, message } => ApiOutcome::Failure { code, message },
        }
    }

    /// Lists the appliances of one home, keyed by numeric appliance code.
    ///
    /// Records are built fresh on every call. A serial number that fails to
    /// decrypt degrades to an empty string for that appliance only; the
    /// listing itself never fails because of one bad field.
    pub async fn list_appliances(&self, home_id: i64) -> ApiOutcome<ApplianceMap> {
        let body = json!({ "homegroupId": home_id });
        let data = match self.request(endpoints::APPLIANCE_LIST, body).await {
            ApiOutcome::Success(data) => data,
            ApiOutcome::Failure { code, message } => {
                return ApiOutcome::Failure { code, message }
            }
        };

        let list = match serde_json::from_value::<ApplianceListData>(data) {
            Ok(list) => list,
            Err(err) => {
                return ApiOutcome::failure(
                    CODE_UNPARSEABLE,
                    format!("unexpected appliance list shape: {err}"),
                )
            }
        };

        let mut appliances = ApplianceMap::new();
        let state = self.state.read().unwrap();

        for home in list.home_list.unwrap_or_default() {
            for room in home.room_list.unwrap_or_default() {
                for entry in room.appliance_list.unwrap_or_default() {
                    let Some(code) = value_as_i64(&entry.appliance_code) else {
                        debug!("skipping appliance with unreadable code");
                        continue;
                    };

                    let serial = if entry.sn.is_empty() {
                        String::new()
                    } else {
                        state.security.decrypt_field(&entry.sn).unwrap_or_else(|err| {
                            debug!(appliance = code, "serial decrypt failed: {err}");
                            String::new()
                        })
                    };

                    let short_serial = if entry.sn8.is_empty() {
                        "00000000".to_string()
                    } else {
                        entry.sn8.clone()
                    };
                    let model = if entry.product_model.is_empty() {
                        short_serial.clone()
                    } else {
                        entry.product_model.clone()
                    };

                    appliances.insert(
                        code,
                        ApplianceRecord {
                            name: entry.name.clone(),
                            appliance_type: entry.numeric_type(),
                            type_hex: entry.type_hex.clone(),
                            serial,
                            short_serial,
                            model,
                            online: entry.is_online(),
                            room: room.name.clone(),
                        },
                    );
                }
            }
        }

        ApiOutcome::Success(appliances)
    }

    /// Queries device state fields.
    ///
    /// `query` is an opaque field → selector mapping; schema validation
    /// belongs to the per-device-type layer above this crate.
    pub async fn get_status(&self, device_id: i64, query: Map<String, Value>) -> ApiOutcome {
        let body = json!({
            "applianceCode": device_id.to_string(),
            "command": { "query": query },
        });
        self.request(endpoints::DEVICE_STATUS, body).await
    }

    /// Sends a control command to a device.
    ///
    /// The optional `status` snapshot is passed through untouched and only
    /// when the caller supplies it.
    pub async fn send_control(
        &self,
        device_id: i64,
        control: Map<String, Value>,
        status: Option<Map<String, Value>>,
    ) -> ApiOutcome {
        let mut command = Map::new();
        command.insert("control".to_string(), Value::Object(control));
        if let Some(status) = status {
            command.insert("status".to_string(), Value::Object(status));
        }

        let body = json!({
            "applianceCode": device_id.to_string(),
            "command": command,
        });
        self.request(endpoints::DEVICE_CONTROL, body).await
    }

    /// Exports the current credentials for persistence.
    ///
    /// Returns `None` until a login has installed an access token.
    pub fn export_credentials(&self) -> Option<Credentials> {
        let state = self.state.read().unwrap();
        let token = state.access_token.clone()?;
        let mut creds = Credentials::new(
            self.account.clone(),
            token,
            state.session_key.clone().unwrap_or_default(),
        );
        if let Some(password) = &state.password {
            creds = creds.with_password(password.expose_secret().to_string());
        }
        Some(creds)
    }

    /// Restores token, session key, and password from stored credentials.
    ///
    /// Returns `false` (and changes nothing) when the supplied credentials
    /// carry no access token.
    pub fn import_credentials(&self, creds: &Credentials) -> bool {
        if creds.access_token.is_empty() {
            return false;
        }

        let mut state = self.state.write().unwrap();
        state.access_token = Some(creds.access_token.clone());
        state.session_key = Some(creds.session_key.clone());
        if !creds.session_key.is_empty() {
            state
                .security
                .set_session_key(creds.session_key.clone().into_bytes(), None);
        }
        if let Some(password) = creds.expose_password() {
            state.password = Some(SecretString::from(password.to_string()));
        }
        true
    }

    /// Drops the access token and session key, keeping account and password.
    pub fn clear_session(&self) {
        let mut state = self.state.write().unwrap();
        state.access_token = None;
        state.session_key = None;
        state.security = CloudSecurity::default();
    }
}

impl std::fmt::Debug for CloudSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSession")
            .field("account", &self.account)
            .field("device_id", &self.device_id)
            .field("api_url", &self.api_url)
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}

/// Fills `reqId` and `stamp` into an object body when absent.
fn fill_protocol_fields(body: Value) -> Value {
    match body {
        Value::Object(mut map) => {
            map.entry("reqId".to_string())
                .or_insert_with(|| Value::String(random_request_id()));
            map.entry("stamp".to_string())
                .or_insert_with(|| Value::String(timestamp()));
            Value::Object(map)
        }
        other => other,
    }
}

/// Fresh random 128-bit request id as 32 hex characters.
fn random_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Current local time as `YYYYMMDDHHMMSS`.
fn timestamp() -> String {
    Local::now().format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_protocol_fields_adds_missing() {
        let filled = fill_protocol_fields(json!({"homegroupId": 1}));
        let obj = filled.as_object().unwrap();
        assert_eq!(obj["reqId"].as_str().unwrap().len(), 32);
        assert_eq!(obj["stamp"].as_str().unwrap().len(), 14);
        assert_eq!(obj["homegroupId"], 1);
    }

    #[test]
    fn test_fill_protocol_fields_keeps_existing() {
        let filled = fill_protocol_fields(json!({"reqId": "fixed", "stamp": "20260101000000"}));
        let obj = filled.as_object().unwrap();
        assert_eq!(obj["reqId"], "fixed");
        assert_eq!(obj["stamp"], "20260101000000");
    }

    #[test]
    fn test_random_request_id_shape() {
        let a = random_request_id();
        let b = random_request_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_export_requires_token() {
        let session = CloudSession::new("user@example.com");
        assert!(session.export_credentials().is_none());
    }

    #[test]
    fn test_import_rejects_empty_token() {
        let session = CloudSession::new("user@example.com");
        let creds = Credentials::new("user@example.com", "", "key");
        assert!(!session.import_credentials(&creds));
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_import_export_roundtrip() {
        let session = CloudSession::new("user@example.com");
        let creds = Credentials::new("user@example.com", "TOK1", "0123456789abcdef")
            .with_password("pw");
        assert!(session.import_credentials(&creds));
        assert!(session.is_logged_in());
        assert!(session.has_password());
        assert_eq!(session.access_token().as_deref(), Some("TOK1"));

        let exported = session.export_credentials().unwrap();
        assert_eq!(exported, creds);
    }

    #[test]
    fn test_device_id_derived_from_account() {
        let session = CloudSession::new("test@example.com");
        assert_eq!(session.device_id(), "366d15365135c3a6");
    }

    #[test]
    fn test_clear_session_keeps_password() {
        let session = CloudSession::new("user@example.com").with_password("pw");
        let creds = Credentials::new("user@example.com", "TOK1", "key");
        session.import_credentials(&creds);
        session.clear_session();
        assert!(!session.is_logged_in());
        assert!(session.has_password());
    }
}
