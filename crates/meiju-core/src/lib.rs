//! Core library for the Midea Meiju smart home cloud.
//!
//! This crate implements the Meiju cloud protocol: authenticated sessions
//! against the vendor's HTTPS API, signed request bodies, decryption of
//! session keys and per-field secrets, and typed operations for listing
//! homes and appliances, querying device state, and sending control
//! commands.
//!
//! # Overview
//!
//! Every operation is an HTTPS POST against one base URL with an endpoint
//! path appended. Requests carry a `reqId`/`stamp` pair in the body and an
//! HMAC-SHA256 signature in the headers; responses share a
//! `{code, data, msg}` envelope where `code == 0` means success. Login is
//! a multi-stage exchange: resolve a login id for the account, derive two
//! password encodings, then unwrap the AES session key delivered alongside
//! the access token. The session key decrypts sensitive response fields
//! (appliance serial numbers) for the rest of the session.
//!
//! Tokens expire; [`CloudClient`] wraps a [`CloudSession`] with a
//! credential store and retries a token-failed call exactly once after
//! re-authenticating with the stored password.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use meiju_core::{ApiOutcome, CloudClient, CloudSession, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), meiju_core::Error> {
//!     let session = Arc::new(CloudSession::new("user@example.com").with_password("secret"));
//!     let client = CloudClient::new(session, Arc::new(MemoryStore::new()));
//!     client.login_and_save().await?;
//!
//!     if let ApiOutcome::Success(homes) = client.list_homes().await {
//!         for (home_id, name) in homes {
//!             println!("home {home_id}: {name}");
//!             if let ApiOutcome::Success(appliances) = client.list_appliances(home_id).await {
//!                 for (code, appliance) in appliances {
//!                     println!("  {code}: {} ({})", appliance.name, appliance.room);
//!                 }
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::time::Duration;

pub mod credentials;
pub mod crypto;
pub mod error;
pub mod response;
pub mod retry;
pub mod session;
pub mod store;

pub use credentials::Credentials;
pub use crypto::{CloudSecurity, CryptoError};
pub use error::Error;
pub use response::{
    is_token_error_code, ApiOutcome, ApplianceMap, ApplianceRecord, HomeMap, CODE_OK,
    CODE_REFRESH_FAILED, CODE_TOKEN_EXPIRED, CODE_TOKEN_INVALID, CODE_TOKEN_NOT_EXIST,
    CODE_TRANSPORT, CODE_UNPARSEABLE, TOKEN_ERROR_CODES,
};
pub use retry::CloudClient;
pub use session::CloudSession;
pub use store::{
    clear_credentials, load_credentials, save_credentials, CredentialStore, MemoryStore,
    StoreError, CREDENTIALS_STORE_KEY,
};

/// The version of the meiju-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Production API base URL; endpoint paths are appended to it.
pub const API_URL: &str = "https://mp-prod.smartmidea.net/mas/v5/app/proxy?alias=";

/// App identifier sent in the login request.
pub const APP_ID: &str = "900";

/// App key sent in the outer login payload.
pub const APP_KEY: &str = "46579c15";

/// Version string of the vendor app this client speaks for.
pub const APP_VERSION: &str = "8.20.0.2";

/// Client type constant for the login request.
pub const CLIENT_TYPE: i64 = 1;

/// Platform constant for the outer login payload.
pub const PLATFORM: i64 = 2;

/// Per-request timeout for all cloud calls.
///
/// A timeout is reported as a transport failure and is not retried.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
