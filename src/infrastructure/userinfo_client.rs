use crate::domain::models::UserProfile;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;

const USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

#[async_trait]
pub trait UserInfoClient: Send + Sync {
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestUserInfoClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct UserInfoPayload {
    name: Option<String>,
    picture: Option<String>,
}

impl ReqwestUserInfoClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl UserInfoClient for ReqwestUserInfoClient {
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::Unauthenticated(
                "access token must not be empty".to_string(),
            ));
        }

        let response = self
            .client
            .get(USERINFO_ENDPOINT)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| InfraError::Transient(format!("fetch profile: network error: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Transient(format!("fetch profile: failed reading response: {error}")))?;

        if !status.is_success() {
            return Err(InfraError::from_remote_status("fetch profile", status.as_u16(), &body));
        }

        let parsed: UserInfoPayload = serde_json::from_str(&body).map_err(|error| {
            InfraError::RemoteRejected(format!("fetch profile: invalid payload: {error}; body={body}"))
        })?;
        Ok(UserProfile {
            name: non_blank(parsed.name),
            picture: non_blank(parsed.picture),
        })
    }
}
