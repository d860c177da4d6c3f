//! HTTP client for the file storage API (Drive v3 resource shapes).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;

use super::{
    check_response, download_link, AssetGateway, AssetMetadata, AssetRecord, GatewayError,
    PublicLinks,
};
use crate::auth::Credential;
use crate::config::SyncConfig;

const FILE_FIELDS: &str =
    "id,name,mimeType,size,createdTime,modifiedTime,webViewLink,webContentLink";

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<AssetRecord>,
}

/// Asset gateway backed by the remote file storage API.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: String,
    upload_url: String,
    timeout: Duration,
}

impl DriveClient {
    pub fn new(http: Client, config: &SyncConfig) -> Self {
        Self {
            http,
            base_url: config.asset_api_url.trim_end_matches('/').to_string(),
            upload_url: config.asset_upload_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        }
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.base_url, urlencoding::encode(id))
    }

    fn request(&self, method: Method, url: &str, credential: &Credential) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(credential.token())
            .timeout(self.timeout)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::from_transport(e, self.timeout))?;
        check_response(response, what).await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, GatewayError> {
        self.send(request, what)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid response for {}: {}", what, e)))
    }
}

#[async_trait]
impl AssetGateway for DriveClient {
    async fn upload(
        &self,
        credential: &Credential,
        data: Bytes,
        metadata: &AssetMetadata,
    ) -> Result<AssetRecord, GatewayError> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| GatewayError::Transport(format!("invalid metadata: {}", e)))?;
        let metadata_part = Part::text(metadata_json)
            .mime_str("application/json")
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let file_part = Part::bytes(data.to_vec())
            .file_name(metadata.name.clone())
            .mime_str(&metadata.mime_type)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let form = Form::new()
            .part("metadata", metadata_part)
            .part("file", file_part);

        let url = format!("{}/files", self.upload_url);
        let request = self
            .request(Method::POST, &url, credential)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .multipart(form);
        self.send_json(request, &format!("upload of '{}'", metadata.name)).await
    }

    async fn list(
        &self,
        credential: &Credential,
        query: Option<&str>,
    ) -> Result<Vec<AssetRecord>, GatewayError> {
        let url = format!("{}/files", self.base_url);
        let fields = format!("files({})", FILE_FIELDS);
        let mut request = self
            .request(Method::GET, &url, credential)
            .query(&[("pageSize", PAGE_SIZE)])
            .query(&[("fields", fields.as_str())]);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }
        let list: FileList = self.send_json(request, "file list").await?;
        Ok(list.files)
    }

    async fn set_public(
        &self,
        credential: &Credential,
        id: &str,
    ) -> Result<PublicLinks, GatewayError> {
        let what = format!("file {}", id);
        let permission = self
            .request(Method::POST, &format!("{}/permissions", self.file_url(id)), credential)
            .json(&serde_json::json!({ "role": "reader", "type": "anyone" }));
        self.send(permission, &what).await?;

        let lookup = self
            .request(Method::GET, &self.file_url(id), credential)
            .query(&[("fields", FILE_FIELDS)]);
        let file: AssetRecord = self.send_json(lookup, &what).await?;

        Ok(PublicLinks {
            web_view_link: file.web_view_link,
            web_content_link: file.web_content_link,
            download_link: download_link(id),
        })
    }

    async fn delete(&self, credential: &Credential, id: &str) -> Result<(), GatewayError> {
        let request = self.request(Method::DELETE, &self.file_url(id), credential);
        self.send(request, &format!("file {}", id)).await?;
        Ok(())
    }
}
