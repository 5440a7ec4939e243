use crate::domain::models::ApplicationState;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::state_codec::{decode_state, encode_state};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::fmt;
use url::Url;

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3/";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3/";
const APP_DATA_FOLDER: &str = "appDataFolder";
const MULTIPART_BOUNDARY: &str = "vibetable_state_boundary";

/// Opaque handle of the remote document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(value: impl Into<String>) -> Result<Self, InfraError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(InfraError::RemoteRejected(
                "document id must not be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document store behind the sync engine. Every call carries the bearer
/// token; a blank token fails with `Unauthenticated` before any request.
#[async_trait]
pub trait RemoteStoreClient: Send + Sync {
    async fn find_by_name(
        &self,
        access_token: &str,
        name: &str,
    ) -> Result<Option<DocumentId>, InfraError>;

    async fn read_by_id(
        &self,
        access_token: &str,
        id: &DocumentId,
    ) -> Result<ApplicationState, InfraError>;

    async fn create(
        &self,
        access_token: &str,
        name: &str,
        state: &ApplicationState,
    ) -> Result<DocumentId, InfraError>;

    async fn update(
        &self,
        access_token: &str,
        id: &DocumentId,
        state: &ApplicationState,
    ) -> Result<DocumentId, InfraError>;
}

/// Google Drive v3, restricted to the application-private `appDataFolder`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestDriveClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct FileListResponse {
    files: Option<Vec<FileResource>>,
}

#[derive(Debug, serde::Deserialize)]
struct FileResource {
    id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct CreateFileMetadata<'a> {
    name: &'a str,
    parents: [&'a str; 1],
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
}

impl ReqwestDriveClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn ensure_token(access_token: &str) -> Result<(), InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::Unauthenticated(
                "access token must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn endpoint(base: &str, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = Url::parse(base)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid drive api base url: {error}")))?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("drive api base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    async fn send(request: RequestBuilder, context: &str) -> Result<String, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Transient(format!("{context}: network error: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Transient(format!("{context}: failed reading response: {error}")))?;

        if !status.is_success() {
            return Err(InfraError::from_remote_status(context, status.as_u16(), &body));
        }
        Ok(body)
    }

    fn parse_file_id(body: &str, context: &str) -> Result<DocumentId, InfraError> {
        let parsed: FileResource = serde_json::from_str(body).map_err(|error| {
            InfraError::RemoteRejected(format!("{context}: invalid payload: {error}; body={body}"))
        })?;
        parsed
            .id
            .ok_or_else(|| InfraError::RemoteRejected(format!("{context}: response did not include id")))
            .and_then(DocumentId::new)
    }
}

/// Drive query literal: backslashes and single quotes are escaped.
fn name_query(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!("name = '{escaped}' and trashed = false")
}

fn multipart_body(metadata: &str, payload: &str) -> String {
    format!(
        "--{MULTIPART_BOUNDARY}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\r\n\
         {metadata}\r\n\
         --{MULTIPART_BOUNDARY}\r\n\
         Content-Type: application/json\r\n\r\n\
         {payload}\r\n\
         --{MULTIPART_BOUNDARY}--"
    )
}

#[async_trait]
impl RemoteStoreClient for ReqwestDriveClient {
    async fn find_by_name(
        &self,
        access_token: &str,
        name: &str,
    ) -> Result<Option<DocumentId>, InfraError> {
        Self::ensure_token(access_token)?;

        let endpoint = Self::endpoint(DRIVE_API_BASE, &["files"])?;
        let request = self
            .client
            .get(endpoint)
            .bearer_auth(access_token)
            .query(&[
                ("spaces", APP_DATA_FOLDER),
                ("q", name_query(name).as_str()),
                ("fields", "files(id,name)"),
            ]);
        let body = Self::send(request, "find document").await?;

        let parsed: FileListResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::RemoteRejected(format!("find document: invalid payload: {error}; body={body}"))
        })?;
        Ok(parsed
            .files
            .unwrap_or_default()
            .into_iter()
            .filter_map(|file| file.id)
            .find_map(|id| DocumentId::new(id).ok()))
    }

    async fn read_by_id(
        &self,
        access_token: &str,
        id: &DocumentId,
    ) -> Result<ApplicationState, InfraError> {
        Self::ensure_token(access_token)?;

        let endpoint = Self::endpoint(DRIVE_API_BASE, &["files", id.as_str()])?;
        let request = self
            .client
            .get(endpoint)
            .bearer_auth(access_token)
            .query(&[("alt", "media")]);
        let body = Self::send(request, "read document").await?;
        decode_state(&body)
    }

    async fn create(
        &self,
        access_token: &str,
        name: &str,
        state: &ApplicationState,
    ) -> Result<DocumentId, InfraError> {
        Self::ensure_token(access_token)?;

        let metadata = serde_json::to_string(&CreateFileMetadata {
            name,
            parents: [APP_DATA_FOLDER],
            mime_type: "application/json",
        })?;
        let body = multipart_body(&metadata, &encode_state(state)?);

        let endpoint = Self::endpoint(DRIVE_UPLOAD_BASE, &["files"])?;
        let request = self
            .client
            .post(endpoint)
            .bearer_auth(access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(body);
        let response = Self::send(request, "create document").await?;
        Self::parse_file_id(&response, "create document")
    }

    async fn update(
        &self,
        access_token: &str,
        id: &DocumentId,
        state: &ApplicationState,
    ) -> Result<DocumentId, InfraError> {
        Self::ensure_token(access_token)?;

        let endpoint = Self::endpoint(DRIVE_UPLOAD_BASE, &["files", id.as_str()])?;
        let request = self
            .client
            .patch(endpoint)
            .bearer_auth(access_token)
            .query(&[("uploadType", "media"), ("fields", "id")])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(encode_state(state)?);
        let response = Self::send(request, "update document").await?;
        Self::parse_file_id(&response, "update document")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_query_escapes_quotes_and_backslashes() {
        assert_eq!(
            name_query("vibetable_v13.json"),
            "name = 'vibetable_v13.json' and trashed = false"
        );
        assert_eq!(
            name_query(r"it's\mine"),
            r"name = 'it\'s\\mine' and trashed = false"
        );
    }

    #[test]
    fn endpoints_are_percent_encoded() {
        let url = ReqwestDriveClient::endpoint(DRIVE_UPLOAD_BASE, &["files", "a/b c"]).expect("url");
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/upload/drive/v3/files/a%2Fb%20c"
        );
    }

    #[test]
    fn multipart_body_carries_metadata_then_payload() {
        let body = multipart_body(r#"{"name":"x"}"#, r#"{"schemaVersion":1}"#);
        let metadata_at = body.find(r#"{"name":"x"}"#).expect("metadata present");
        let payload_at = body.find(r#"{"schemaVersion":1}"#).expect("payload present");
        assert!(metadata_at < payload_at);
        assert!(body.ends_with(&format!("--{MULTIPART_BOUNDARY}--")));
    }

    #[test]
    fn document_id_rejects_blank() {
        assert!(DocumentId::new("  ").is_err());
        assert_eq!(DocumentId::new(" abc ").expect("id").as_str(), "abc");
    }

    #[test]
    fn parse_file_id_requires_id() {
        assert!(ReqwestDriveClient::parse_file_id(r#"{"id":"1xyz"}"#, "create").is_ok());
        assert!(matches!(
            ReqwestDriveClient::parse_file_id("{}", "create"),
            Err(InfraError::RemoteRejected(_))
        ));
    }

    #[tokio::test]
    async fn blank_token_fails_without_request() {
        let client = ReqwestDriveClient::default();
        let error = client
            .find_by_name(" ", "vibetable_v13.json")
            .await
            .expect_err("blank token must fail");
        assert!(error.is_unauthenticated());
    }
}
