use crate::domain::models::OAuthToken;
use crate::infrastructure::config::OAuthSettings;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{
    OAuthCodeExchangeRequest, OAuthHttpClient, OAuthRefreshRequest, OAuthTokenResponse,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use url::Url;

const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: GOOGLE_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }
}

impl From<OAuthSettings> for OAuthConfig {
    fn from(settings: OAuthSettings) -> Self {
        Self::new(
            settings.client_id,
            settings.client_secret,
            settings.redirect_uri,
            settings.scopes,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Valid(OAuthToken),
    Refreshed(OAuthToken),
    ReauthenticationRequired,
}

impl TokenStatus {
    pub fn into_token(self) -> Option<OAuthToken> {
        match self {
            Self::Valid(token) | Self::Refreshed(token) => Some(token),
            Self::ReauthenticationRequired => None,
        }
    }
}

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Authorization-code flow with refresh tokens; the token lives in `S`.
pub struct OAuthManager<S, C>
where
    S: CredentialStore + ?Sized,
    C: OAuthHttpClient + ?Sized,
{
    config: OAuthConfig,
    credential_store: Arc<S>,
    oauth_client: Arc<C>,
    now_provider: NowProvider,
}

impl<S, C> OAuthManager<S, C>
where
    S: CredentialStore + ?Sized,
    C: OAuthHttpClient + ?Sized,
{
    pub fn new(config: OAuthConfig, credential_store: Arc<S>, oauth_client: Arc<C>) -> Self {
        Self {
            config,
            credential_store,
            oauth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn build_authorization_url(&self, state: &str) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::OAuth("state must not be empty".to_string()));
        }
        if self.config.scopes.is_empty() {
            return Err(InfraError::OAuth("at least one scope is required".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::OAuth(format!("invalid authorization endpoint: {error}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("include_granted_scopes", "true")
            .append_pair("prompt", "consent")
            .append_pair("state", state);

        Ok(url.to_string())
    }

    pub async fn authenticate_with_code(
        &self,
        authorization_code: &str,
    ) -> Result<OAuthToken, InfraError> {
        let authorization_code = authorization_code.trim();
        if authorization_code.is_empty() {
            return Err(InfraError::OAuth("authorization code must not be empty".to_string()));
        }

        let response = self
            .oauth_client
            .exchange_authorization_code(OAuthCodeExchangeRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uri: self.config.redirect_uri.clone(),
                authorization_code: authorization_code.to_string(),
            })
            .await?;

        let token = self.token_from_response(response, None);
        self.credential_store.save_token(&token)?;
        tracing::info!(scope = ?token.scope, "stored new oauth token");
        Ok(token)
    }

    /// Returns a usable token, refreshing it if it expires within the leeway.
    /// A refresh the endpoint rejects drops the stored token.
    pub async fn current_token(&self) -> Result<TokenStatus, InfraError> {
        let Some(stored) = self.credential_store.load_token()? else {
            return Ok(TokenStatus::ReauthenticationRequired);
        };

        if stored.is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS) {
            return Ok(TokenStatus::Valid(stored));
        }

        let Some(refresh_token) = stored.refresh_token.clone() else {
            return Ok(TokenStatus::ReauthenticationRequired);
        };

        let refreshed = self
            .oauth_client
            .refresh_access_token(OAuthRefreshRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                refresh_token,
            })
            .await;

        match refreshed {
            Ok(response) => {
                let token = self.token_from_response(response, stored.refresh_token);
                self.credential_store.save_token(&token)?;
                Ok(TokenStatus::Refreshed(token))
            }
            Err(InfraError::OAuth(message)) => {
                tracing::warn!(error = %message, "refresh token rejected");
                self.credential_store.delete_token()?;
                Ok(TokenStatus::ReauthenticationRequired)
            }
            Err(error) => Err(error),
        }
    }

    pub fn clear_stored_token(&self) -> Result<(), InfraError> {
        self.credential_store.delete_token()
    }

    fn token_from_response(
        &self,
        response: OAuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> OAuthToken {
        OAuthToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at: (self.now_provider)() + Duration::seconds(response.expires_in.max(0)),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::infrastructure::config::{DRIVE_APPDATA_SCOPE, USERINFO_PROFILE_SCOPE};
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub(crate) enum FakeResponse {
        Success(OAuthTokenResponse),
        Rejected(String),
        Offline,
    }

    impl Default for FakeResponse {
        fn default() -> Self {
            Self::Success(OAuthTokenResponse {
                access_token: "fresh-access".to_string(),
                refresh_token: Some("fresh-refresh".to_string()),
                expires_in: 3600,
                token_type: Some("Bearer".to_string()),
                scope: Some(DRIVE_APPDATA_SCOPE.to_string()),
            })
        }
    }

    impl FakeResponse {
        fn into_result(self) -> Result<OAuthTokenResponse, InfraError> {
            match self {
                Self::Success(value) => Ok(value),
                Self::Rejected(message) => Err(InfraError::OAuth(message)),
                Self::Offline => Err(InfraError::Transient("token endpoint unreachable".to_string())),
            }
        }
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakeOAuthHttpClient {
        pub(crate) exchange_response: Mutex<FakeResponse>,
        pub(crate) refresh_response: Mutex<FakeResponse>,
        pub(crate) exchange_calls: AtomicUsize,
        pub(crate) refresh_calls: AtomicUsize,
    }

    impl FakeOAuthHttpClient {
        pub(crate) fn set_refresh_response(&self, response: FakeResponse) {
            *self.refresh_response.lock().expect("refresh mutex poisoned") = response;
        }
    }

    #[async_trait]
    impl OAuthHttpClient for FakeOAuthHttpClient {
        async fn exchange_authorization_code(
            &self,
            _request: OAuthCodeExchangeRequest,
        ) -> Result<OAuthTokenResponse, InfraError> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            self.exchange_response
                .lock()
                .expect("exchange mutex poisoned")
                .clone()
                .into_result()
        }

        async fn refresh_access_token(
            &self,
            _request: OAuthRefreshRequest,
        ) -> Result<OAuthTokenResponse, InfraError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refresh_response
                .lock()
                .expect("refresh mutex poisoned")
                .clone()
                .into_result()
        }
    }

    pub(crate) fn drive_config() -> OAuthConfig {
        OAuthConfig::new(
            "client-id",
            "",
            "http://127.0.0.1:8080/oauth2/callback",
            vec![
                DRIVE_APPDATA_SCOPE.to_string(),
                USERINFO_PROFILE_SCOPE.to_string(),
            ],
        )
    }

    pub(crate) fn token_expiring_in(seconds: i64, refresh_token: Option<&str>) -> OAuthToken {
        OAuthToken {
            access_token: "stored-access".to_string(),
            refresh_token: refresh_token.map(ToOwned::to_owned),
            expires_at: Utc::now() + Duration::seconds(seconds),
            token_type: "Bearer".to_string(),
            scope: Some(DRIVE_APPDATA_SCOPE.to_string()),
        }
    }

    fn token_text() -> impl Strategy<Value = String> {
        "[A-Za-z0-9._\\-]{1,64}".prop_map(|value| value.to_string())
    }

    fn arb_token() -> impl Strategy<Value = OAuthToken> {
        (
            token_text(),
            prop::option::of(token_text()),
            120i64..604800i64,
            prop::option::of(token_text()),
        )
            .prop_map(|(access_token, refresh_token, expires_in, scope)| OAuthToken {
                access_token,
                refresh_token,
                expires_at: Utc::now() + Duration::seconds(expires_in),
                token_type: "Bearer".to_string(),
                scope,
            })
    }

    // A stored token is read back unchanged.
    proptest! {
        #[test]
        fn stored_token_roundtrips(token in arb_token()) {
            let store = InMemoryCredentialStore::default();
            store.save_token(&token).expect("save token");
            let loaded = store.load_token().expect("load token").expect("token exists");
            prop_assert_eq!(loaded, token);
        }
    }

    // A token outside the leeway is used as-is, without touching the token endpoint.
    proptest! {
        #[test]
        fn valid_token_skips_token_endpoint(token in arb_token()) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(InMemoryCredentialStore::default());
                store.save_token(&token).expect("save token");

                let client = Arc::new(FakeOAuthHttpClient::default());
                let manager = OAuthManager::new(drive_config(), Arc::clone(&store), Arc::clone(&client));
                let status = manager.current_token().await.expect("current token");

                assert_eq!(status, TokenStatus::Valid(token));
                assert_eq!(client.exchange_calls.load(Ordering::SeqCst), 0);
                assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
            });
        }
    }

    #[test]
    fn authorization_url_requests_drive_scopes_offline() {
        let manager = OAuthManager::new(
            drive_config(),
            Arc::new(InMemoryCredentialStore::default()),
            Arc::new(FakeOAuthHttpClient::default()),
        );

        let url = manager.build_authorization_url("nonce-1").expect("url");
        let parsed = Url::parse(&url).expect("parse url");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["state"], "nonce-1");
        assert!(pairs["scope"].contains("drive.appdata"));
        assert!(pairs["scope"].contains("userinfo.profile"));
        assert!(manager.build_authorization_url(" ").is_err());
    }

    #[tokio::test]
    async fn missing_token_requires_reauthentication() {
        let client = Arc::new(FakeOAuthHttpClient::default());
        let manager = OAuthManager::new(
            drive_config(),
            Arc::new(InMemoryCredentialStore::default()),
            Arc::clone(&client),
        );
        assert_eq!(
            manager.current_token().await.expect("current token"),
            TokenStatus::ReauthenticationRequired
        );
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_inside_leeway_is_refreshed_keeping_refresh_token() {
        let store = Arc::new(InMemoryCredentialStore::default());
        store
            .save_token(&token_expiring_in(30, Some("long-lived")))
            .expect("save token");

        let client = Arc::new(FakeOAuthHttpClient::default());
        client.set_refresh_response(FakeResponse::Success(OAuthTokenResponse {
            access_token: "renewed".to_string(),
            refresh_token: None,
            expires_in: 3600,
            token_type: None,
            scope: None,
        }));

        let manager = OAuthManager::new(drive_config(), Arc::clone(&store), Arc::clone(&client));
        let status = manager.current_token().await.expect("current token");

        let token = status.into_token().expect("refreshed token");
        assert_eq!(token.access_token, "renewed");
        assert_eq!(token.refresh_token.as_deref(), Some("long-lived"));
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(store.load_token().expect("load"), Some(token));
    }

    #[tokio::test]
    async fn rejected_refresh_drops_stored_token() {
        let store = Arc::new(InMemoryCredentialStore::default());
        store
            .save_token(&token_expiring_in(-120, Some("revoked")))
            .expect("save token");

        let client = Arc::new(FakeOAuthHttpClient::default());
        client.set_refresh_response(FakeResponse::Rejected("invalid_grant".to_string()));

        let manager = OAuthManager::new(drive_config(), Arc::clone(&store), Arc::clone(&client));

        assert_eq!(
            manager.current_token().await.expect("current token"),
            TokenStatus::ReauthenticationRequired
        );
        assert!(store.load_token().expect("load").is_none());
    }

    #[tokio::test]
    async fn offline_refresh_is_transient_and_keeps_token() {
        let store = Arc::new(InMemoryCredentialStore::default());
        store
            .save_token(&token_expiring_in(-120, Some("still-good")))
            .expect("save token");

        let client = Arc::new(FakeOAuthHttpClient::default());
        client.set_refresh_response(FakeResponse::Offline);

        let manager = OAuthManager::new(drive_config(), Arc::clone(&store), Arc::clone(&client));
        let error = manager.current_token().await.expect_err("must fail");

        assert!(error.is_transient());
        assert!(store.load_token().expect("load").is_some());
    }

    #[tokio::test]
    async fn code_exchange_stores_token() {
        let store = Arc::new(InMemoryCredentialStore::default());
        let client = Arc::new(FakeOAuthHttpClient::default());
        let fixed_now = Utc::now();
        let manager = OAuthManager::new(drive_config(), Arc::clone(&store), Arc::clone(&client))
            .with_now_provider(Arc::new(move || fixed_now));

        let token = manager
            .authenticate_with_code(" code-123 ")
            .await
            .expect("exchange code");

        assert_eq!(token.access_token, "fresh-access");
        assert_eq!(token.expires_at, fixed_now + Duration::seconds(3600));
        assert_eq!(store.load_token().expect("load"), Some(token));
        assert!(manager.authenticate_with_code("  ").await.is_err());
        assert_eq!(client.exchange_calls.load(Ordering::SeqCst), 1);
    }
}
