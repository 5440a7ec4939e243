//! Local-first synchronization of the application state.
//!
//! The local slot is written before any remote attempt and a remote failure
//! never rolls it back. The remote document identity is resolved once per
//! process (find by name, else create) and every later sync updates that
//! document, so at most one remote document exists per user.

use crate::application::session::AccessTokenProvider;
use crate::domain::models::ApplicationState;
use crate::infrastructure::drive_client::{DocumentId, RemoteStoreClient};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::LocalStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type ReauthHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RemoteSyncStatus {
    /// No credential; only the local slot was written.
    Offline,
    Created(String),
    Updated(String),
    ReauthenticationRequired,
    /// Recoverable failure; nothing is retried automatically.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub local_persisted: bool,
    pub remote: RemoteSyncStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LoginLoad {
    /// Remote document found under the current name; local state replaced.
    Replaced(String),
    /// Only a legacy-named document existed; local state replaced from it.
    MigratedLegacy(String),
    KeptLocal,
    ReauthenticationRequired,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolved {
    Cached(DocumentId),
    Linked(DocumentId),
    Created(DocumentId),
}

pub struct SyncEngine<L, R, T>
where
    L: LocalStore,
    R: RemoteStoreClient,
    T: AccessTokenProvider + ?Sized,
{
    local_store: Arc<L>,
    remote: Arc<R>,
    tokens: Arc<T>,
    document_name: String,
    legacy_names: Vec<String>,
    identity: Mutex<Option<DocumentId>>,
    reauth_hook: ReauthHook,
}

impl<L, R, T> SyncEngine<L, R, T>
where
    L: LocalStore,
    R: RemoteStoreClient,
    T: AccessTokenProvider + ?Sized,
{
    pub fn new(
        local_store: Arc<L>,
        remote: Arc<R>,
        tokens: Arc<T>,
        document_name: impl Into<String>,
    ) -> Self {
        Self {
            local_store,
            remote,
            tokens,
            document_name: document_name.into(),
            legacy_names: Vec::new(),
            identity: Mutex::new(None),
            reauth_hook: Arc::new(|| {}),
        }
    }

    pub fn with_legacy_names(mut self, legacy_names: Vec<String>) -> Self {
        self.legacy_names = legacy_names;
        self
    }

    pub fn with_reauth_hook(mut self, reauth_hook: ReauthHook) -> Self {
        self.reauth_hook = reauth_hook;
        self
    }

    pub async fn cached_identity(&self) -> Option<DocumentId> {
        self.identity.lock().await.clone()
    }

    /// Writes the local slot, then mirrors the snapshot remotely when a
    /// credential is available. Never fails; the outcome is in the report.
    pub async fn sync(&self, state: &ApplicationState) -> SyncReport {
        let local_persisted = self.persist_local(state);
        SyncReport {
            local_persisted,
            remote: self.push_remote(state).await,
        }
    }

    /// Local half of a sync. Callers that share the state behind a lock
    /// call this while still holding it, so the slot follows mutation order.
    pub fn persist_local(&self, state: &ApplicationState) -> bool {
        self.local_store.save_best_effort(state)
    }

    /// Remote half of a sync. Never touches the local slot.
    pub async fn push_remote(&self, snapshot: &ApplicationState) -> RemoteSyncStatus {
        match self.token().await {
            Ok(Some(token)) => match self.push(&token, snapshot).await {
                Ok(Resolved::Created(id)) => {
                    tracing::info!(document_id = %id, "created remote document");
                    RemoteSyncStatus::Created(id.to_string())
                }
                Ok(Resolved::Cached(id) | Resolved::Linked(id)) => {
                    tracing::debug!(document_id = %id, "updated remote document");
                    RemoteSyncStatus::Updated(id.to_string())
                }
                Err(error) => self.remote_failure("sync", error).await,
            },
            Ok(None) => {
                (self.reauth_hook)();
                RemoteSyncStatus::Offline
            }
            Err(error) => self.remote_failure("sync", error).await,
        }
    }

    /// Remote always wins at login: a found document replaces `state`
    /// wholesale and is written to the local slot immediately.
    pub async fn load_on_login(&self, state: &mut ApplicationState) -> LoginLoad {
        let token = match self.token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                (self.reauth_hook)();
                return LoginLoad::ReauthenticationRequired;
            }
            Err(error) => return self.login_failure(error).await,
        };

        match self.pull(&token).await {
            Ok(Some((remote_state, outcome))) => {
                *state = remote_state;
                self.local_store.save_best_effort(state);
                tracing::info!(outcome = ?outcome, "replaced local state from remote document");
                outcome
            }
            Ok(None) => {
                tracing::info!(document = %self.document_name, "no remote document; keeping local state");
                LoginLoad::KeptLocal
            }
            Err(error) => self.login_failure(error).await,
        }
    }

    async fn token(&self) -> Result<Option<String>, InfraError> {
        Ok(self
            .tokens
            .access_token()
            .await?
            .filter(|token| !token.trim().is_empty()))
    }

    async fn push(&self, token: &str, snapshot: &ApplicationState) -> Result<Resolved, InfraError> {
        let cached = {
            // Held across find/create so concurrent first syncs agree on one document.
            let mut identity = self.identity.lock().await;
            match identity.clone() {
                Some(id) => id,
                None => {
                    let resolved = self.resolve_and_write(token, snapshot).await?;
                    *identity = Some(document_id(&resolved).clone());
                    return Ok(resolved);
                }
            }
        };

        let updated = self.remote.update(token, &cached, snapshot).await?;
        if updated != cached {
            *self.identity.lock().await = Some(updated.clone());
        }
        Ok(Resolved::Cached(updated))
    }

    async fn resolve_and_write(
        &self,
        token: &str,
        snapshot: &ApplicationState,
    ) -> Result<Resolved, InfraError> {
        match self.remote.find_by_name(token, &self.document_name).await? {
            Some(id) => Ok(Resolved::Linked(self.remote.update(token, &id, snapshot).await?)),
            None => Ok(Resolved::Created(
                self.remote
                    .create(token, &self.document_name, snapshot)
                    .await?,
            )),
        }
    }

    async fn pull(&self, token: &str) -> Result<Option<(ApplicationState, LoginLoad)>, InfraError> {
        let mut identity = self.identity.lock().await;
        if let Some(id) = self.remote.find_by_name(token, &self.document_name).await? {
            let remote_state = self.remote.read_by_id(token, &id).await?;
            *identity = Some(id.clone());
            return Ok(Some((remote_state, LoginLoad::Replaced(id.to_string()))));
        }

        for legacy_name in &self.legacy_names {
            if let Some(id) = self.remote.find_by_name(token, legacy_name).await? {
                let remote_state = self.remote.read_by_id(token, &id).await?;
                return Ok(Some((remote_state, LoginLoad::MigratedLegacy(legacy_name.clone()))));
            }
        }
        Ok(None)
    }

    async fn remote_failure(&self, operation: &str, error: InfraError) -> RemoteSyncStatus {
        if error.is_unauthenticated() {
            self.request_reauthentication(operation, &error).await;
            return RemoteSyncStatus::ReauthenticationRequired;
        }
        tracing::warn!(operation, transient = error.is_transient(), error = %error, "remote sync failed");
        RemoteSyncStatus::Failed(error.to_string())
    }

    async fn login_failure(&self, error: InfraError) -> LoginLoad {
        if error.is_unauthenticated() {
            self.request_reauthentication("login", &error).await;
            return LoginLoad::ReauthenticationRequired;
        }
        tracing::warn!(transient = error.is_transient(), error = %error, "remote load at login failed");
        LoginLoad::Failed(error.to_string())
    }

    /// The cached identity survives; it is still valid under a new credential.
    async fn request_reauthentication(&self, operation: &str, error: &InfraError) {
        tracing::warn!(operation, error = %error, "credential rejected; re-authentication required");
        self.tokens.discard().await;
        (self.reauth_hook)();
    }
}

fn document_id(resolved: &Resolved) -> &DocumentId {
    match resolved {
        Resolved::Cached(id) | Resolved::Linked(id) | Resolved::Created(id) => id,
    }
}
