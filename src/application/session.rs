use crate::application::oauth::OAuthManager;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::OAuthHttpClient;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// "Current bearer credential, if any" as seen by the sync engine.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// `Ok(None)` means no usable credential; interactive sign-in is needed.
    async fn access_token(&self) -> Result<Option<String>, InfraError>;

    /// Forgets the credential after the remote side rejected it.
    async fn discard(&self);
}

#[async_trait]
impl<S, C> AccessTokenProvider for OAuthManager<S, C>
where
    S: CredentialStore + ?Sized,
    C: OAuthHttpClient + ?Sized,
{
    async fn access_token(&self) -> Result<Option<String>, InfraError> {
        Ok(self
            .current_token()
            .await?
            .into_token()
            .map(|token| token.access_token))
    }

    async fn discard(&self) {
        if let Err(error) = self.clear_stored_token() {
            tracing::warn!(error = %error, "failed to discard stored oauth token");
        }
    }
}

/// Fixed credential held in memory. With no token it models offline mode.
#[derive(Debug, Default)]
pub struct InMemoryAccessToken {
    token: Mutex<Option<String>>,
    discards: AtomicUsize,
}

impl InMemoryAccessToken {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: Mutex::new(token.map(ToOwned::to_owned)),
            discards: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, token: Option<&str>) -> Result<(), InfraError> {
        *self
            .token
            .lock()
            .map_err(|error| InfraError::Internal(format!("token lock poisoned: {error}")))? =
            token.map(ToOwned::to_owned);
        Ok(())
    }

    pub fn discard_count(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessTokenProvider for InMemoryAccessToken {
    async fn access_token(&self) -> Result<Option<String>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Internal(format!("token lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    async fn discard(&self) {
        self.discards.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.token.lock() {
            *guard = None;
        }
    }
}
