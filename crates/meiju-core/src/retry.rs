//! Refresh-and-retry orchestration around a cloud session.
//!
//! Access tokens expire; the vendor answers with one of the token-error
//! codes and expects the client to log in again. [`CloudClient`] wraps a
//! [`CloudSession`] and a [`CredentialStore`] so that every operation runs
//! a small fixed state machine:
//!
//! 1. Issue the call. Success or a non-token failure is final.
//! 2. On a token error, check the auto-refresh capability and whether a
//!    password is stored. If either is missing, surface the token failure
//!    unchanged (zero logins).
//! 3. Otherwise log in once, persist the fresh credentials, and re-issue
//!    the original call exactly once. Its outcome is final, whatever it is.
//!
//! Only token errors trigger the detour; transport failures and business
//! failures (device offline, bad parameters) are never retried here.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::response::{ApiOutcome, ApplianceMap, HomeMap, CODE_REFRESH_FAILED};
use crate::session::CloudSession;
use crate::store::{self, CredentialStore};
use crate::error::Error;

/// A cloud session paired with a credential store and a refresh policy.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use meiju_core::{CloudClient, CloudSession, MemoryStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), meiju_core::Error> {
///     let session = Arc::new(CloudSession::new("user@example.com").with_password("secret"));
///     let store = Arc::new(MemoryStore::new());
///     let client = CloudClient::new(session, store);
///
///     client.login_and_save().await?;
///     let homes = client.list_homes().await;
///     println!("{homes:?}");
///     Ok(())
/// }
/// ```
pub struct CloudClient {
    session: Arc<CloudSession>,
    store: Arc<dyn CredentialStore>,
    auto_refresh: bool,
}

impl CloudClient {
    /// Creates a client with auto-refresh enabled.
    pub fn new(session: Arc<CloudSession>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            session,
            store,
            auto_refresh: true,
        }
    }

    /// Enables or disables password-based auto-refresh.
    ///
    /// With refresh disabled, token errors are surfaced to the caller
    /// unchanged and no login is ever attempted on their behalf.
    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    /// Rebuilds a client from persisted credentials.
    ///
    /// Returns `Ok(None)` when the store holds no usable credentials
    /// ("no active session"), so callers can prompt for a login without
    /// error handling.
    pub async fn from_store(store: Arc<dyn CredentialStore>) -> Result<Option<Self>, Error> {
        let Some(creds) = store::load_credentials(store.as_ref()).await? else {
            return Ok(None);
        };
        let session = Arc::new(CloudSession::new(creds.account.clone()));
        session.import_credentials(&creds);
        Ok(Some(Self::new(session, store)))
    }

    /// The wrapped session.
    pub fn session(&self) -> &Arc<CloudSession> {
        &self.session
    }

    /// Logs in and persists the resulting credentials.
    pub async fn login_and_save(&self) -> Result<(), Error> {
        self.session.login().await?;
        self.persist_credentials().await;
        Ok(())
    }

    /// Clears the session and removes persisted credentials.
    pub async fn logout(&self) -> Result<(), Error> {
        self.session.clear_session();
        store::clear_credentials(self.store.as_ref()).await?;
        Ok(())
    }

    /// Lists homes, refreshing credentials on a token error.
    pub async fn list_homes(&self) -> ApiOutcome<HomeMap> {
        self.run(|session| Box::pin(session.list_homes())).await
    }

    /// Lists appliances of a home, refreshing credentials on a token error.
    pub async fn list_appliances(&self, home_id: i64) -> ApiOutcome<ApplianceMap> {
        self.run(move |session| Box::pin(session.list_appliances(home_id)))
            .await
    }

    /// Queries device state, refreshing credentials on a token error.
    pub async fn get_status(&self, device_id: i64, query: Map<String, Value>) -> ApiOutcome {
        self.run(move |session| Box::pin(session.get_status(device_id, query.clone())))
            .await
    }

    /// Sends a control command, refreshing credentials on a token error.
    pub async fn send_control(
        &self,
        device_id: i64,
        control: Map<String, Value>,
        status: Option<Map<String, Value>>,
    ) -> ApiOutcome {
        self.run(move |session| {
            Box::pin(session.send_control(device_id, control.clone(), status.clone()))
        })
        .await
    }

    /// Runs one orchestrated call: attempt, optional refresh, one retry.
    async fn run<T, F>(&self, call: F) -> ApiOutcome<T>
    where
        F: for<'a> Fn(&'a CloudSession) -> BoxFuture<'a, ApiOutcome<T>>,
    {
        let first = call(self.session.as_ref()).await;
        if !first.is_token_error() {
            return first;
        }

        if !self.auto_refresh {
            debug!("token error, auto-refresh disabled");
            return first;
        }
        if !self.session.has_password() {
            warn!("token error, but no password stored for refresh");
            return first;
        }

        debug!(account = %self.session.account(), "token error, refreshing credentials");
        if let Err(err) = self.session.login().await {
            warn!("credential refresh failed: {err}");
            return ApiOutcome::failure(
                CODE_REFRESH_FAILED,
                format!("credential refresh failed: {err}"),
            );
        }

        self.persist_credentials().await;

        // The retried call's outcome is final, token error or not.
        call(self.session.as_ref()).await
    }

    /// Best-effort persistence of the current credentials.
    async fn persist_credentials(&self) {
        let Some(creds) = self.session.export_credentials() else {
            return;
        };
        if let Err(err) = store::save_credentials(self.store.as_ref(), &creds).await {
            warn!("failed to persist refreshed credentials: {err}");
        }
    }
}

impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("session", &self.session)
            .field("auto_refresh", &self.auto_refresh)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::store::{MemoryStore, CREDENTIALS_STORE_KEY};

    #[tokio::test]
    async fn test_from_store_empty_is_none() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        assert!(CloudClient::from_store(store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_store_restores_session() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        let creds = Credentials::new("user@example.com", "TOK1", "0123456789abcdef")
            .with_password("pw");
        store::save_credentials(store.as_ref(), &creds).await.unwrap();

        let client = CloudClient::from_store(store).await.unwrap().unwrap();
        assert_eq!(client.session().account(), "user@example.com");
        assert_eq!(client.session().access_token().as_deref(), Some("TOK1"));
        assert!(client.session().has_password());
    }

    #[tokio::test]
    async fn test_logout_clears_store_and_session() {
        let store = Arc::new(MemoryStore::new());
        let creds = Credentials::new("user@example.com", "TOK1", "key");
        store::save_credentials(store.as_ref(), &creds).await.unwrap();

        let session = Arc::new(CloudSession::new("user@example.com"));
        session.import_credentials(&creds);
        let client = CloudClient::new(session, store.clone());

        client.logout().await.unwrap();
        assert!(!client.session().is_logged_in());
        assert_eq!(store.get(CREDENTIALS_STORE_KEY).await.unwrap(), None);
    }
}
