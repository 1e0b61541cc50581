//! Credential set for one Meiju cloud account.
//!
//! A [`Credentials`] value is the atomic unit the session exports after
//! login and the store persists as a single JSON document. The session key
//! always pairs with the access token issued by the same login; the two are
//! installed together and never mixed across logins.
//!
//! # Security
//!
//! The optional account password (kept only to allow automatic credential
//! refresh) is wrapped in [`SecretString`] so it cannot leak through
//! `Debug` or accidental logging. Use [`Credentials::expose_password()`]
//! when the raw value is needed for a login.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Credentials for an authenticated Meiju cloud session.
#[derive(Clone)]
pub struct Credentials {
    /// Account identifier (phone number or email).
    pub account: String,
    /// Access token issued by the most recent login.
    pub access_token: String,
    /// Session key unwrapped from the same login response as the token.
    pub session_key: String,
    /// Account password, kept only when password-based refresh is wanted.
    password: Option<SecretString>,
}

impl Credentials {
    /// Creates a credential set without a stored password.
    pub fn new(
        account: impl Into<String>,
        access_token: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            access_token: access_token.into(),
            session_key: session_key.into(),
            password: None,
        }
    }

    /// Attaches the account password for automatic refresh.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Returns `true` when a password is stored alongside the tokens.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Exposes the stored password for a login request.
    ///
    /// # Security
    ///
    /// Never log or display the returned value.
    pub fn expose_password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }

    /// Serializes the credential set to its JSON wire form.
    pub fn to_json(&self) -> String {
        // CredentialsWire contains only plain data; serialization cannot fail.
        serde_json::to_string(&CredentialsWire::from(self)).expect("credentials serialize")
    }

    /// Restores a credential set from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<CredentialsWire>(json).map(Credentials::from)
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.account == other.account
            && self.access_token == other.access_token
            && self.session_key == other.session_key
            && self.expose_password() == other.expose_password()
    }
}

impl Eq for Credentials {}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("access_token", &self.access_token)
            .field("session_key", &"[REDACTED]")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Plain serde form of [`Credentials`].
#[derive(Serialize, Deserialize)]
struct CredentialsWire {
    account: String,
    access_token: String,
    session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

impl From<&Credentials> for CredentialsWire {
    fn from(creds: &Credentials) -> Self {
        Self {
            account: creds.account.clone(),
            access_token: creds.access_token.clone(),
            session_key: creds.session_key.clone(),
            password: creds.expose_password().map(str::to_string),
        }
    }
}

impl From<CredentialsWire> for Credentials {
    fn from(wire: CredentialsWire) -> Self {
        Self {
            account: wire.account,
            access_token: wire.access_token,
            session_key: wire.session_key,
            password: wire.password.map(SecretString::from),
        }
    }
}
