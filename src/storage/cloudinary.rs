use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use super::{file_stem, title_case, ImageRecord, ImageStore, StoreError};
use crate::config::CloudinaryConfig;
use crate::utils::http::get_http_client;

const API_BASE: &str = "https://api.cloudinary.com/v1_1";
const DELIVERY_BASE: &str = "https://res.cloudinary.com";
const LIST_PAGE_SIZE: u32 = 100;
const INCOMING_TRANSFORMATION: &str = "q_auto,f_auto";
const GALLERY_TRANSFORMATION: &str = "c_fill,h_600,q_auto,w_800";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    #[serde(default)]
    resources: Vec<Resource>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    public_id: String,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    context: Option<ResourceContext>,
}

#[derive(Debug, Deserialize)]
struct ResourceContext {
    #[serde(default)]
    custom: Option<CustomContext>,
}

#[derive(Debug, Deserialize)]
struct CustomContext {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Clone)]
pub struct CloudinaryStore {
    config: CloudinaryConfig,
}

/// SHA-1 over the `&`-joined, key-sorted parameters followed by the secret.
pub fn sign_params(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let joined = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{:x}", Sha1::digest(format!("{joined}{api_secret}").as_bytes()))
}

fn escape_context_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|").replace('=', "\\=")
}

fn title_from_public_id(public_id: &str) -> String {
    let last = public_id.rsplit('/').next().unwrap_or(public_id);
    title_case(&last.replace('_', " "))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Api {
        service: "cloudinary",
        status,
        body,
    })
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig) -> Self {
        CloudinaryStore { config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{API_BASE}/{}/{path}", self.config.cloud_name)
    }

    pub fn public_id_for(&self, filename: &str) -> String {
        format!("{}/{}", self.config.folder, file_stem(filename).trim())
    }

    pub fn delivery_url(&self, public_id: &str) -> String {
        format!(
            "{DELIVERY_BASE}/{}/image/upload/{GALLERY_TRANSFORMATION}/{public_id}.jpg",
            self.config.cloud_name
        )
    }

    fn record_from_resource(&self, resource: Resource) -> ImageRecord {
        let title = resource
            .context
            .and_then(|context| context.custom)
            .and_then(|custom| custom.title)
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| title_from_public_id(&resource.public_id));
        ImageRecord {
            src: self.delivery_url(&resource.public_id),
            id: resource.public_id,
            title,
            width: resource.width,
            height: resource.height,
        }
    }

    fn signed_params(&self, mut params: BTreeMap<&'static str, String>) -> Vec<(String, String)> {
        params.insert("timestamp", Utc::now().timestamp().to_string());
        let signature = sign_params(&params, &self.config.api_secret);
        let mut fields: Vec<(String, String)> = params
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        fields.push(("api_key".to_string(), self.config.api_key.clone()));
        fields.push(("signature".to_string(), signature));
        fields
    }

    // Removes an image by public id. `Ok(false)` means Cloudinary did not
    // find it.
    pub async fn delete_image(&self, public_id: &str) -> Result<bool, StoreError> {
        let mut params = BTreeMap::new();
        params.insert("public_id", public_id.to_string());
        let fields = self.signed_params(params);

        let response = get_http_client()
            .post(self.endpoint("image/destroy"))
            .form(&fields)
            .send()
            .await?;
        let parsed: DestroyResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;

        if parsed.result == "ok" {
            info!("Deleted Cloudinary image {public_id}");
            Ok(true)
        } else {
            warn!("Cloudinary destroy for {public_id} returned {}", parsed.result);
            Ok(false)
        }
    }
}

#[async_trait]
impl ImageStore for CloudinaryStore {
    fn name(&self) -> &'static str {
        "cloudinary"
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let prefix = format!("{}/", self.config.folder);
        let mut images = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("type", "upload".to_string()),
                ("prefix", prefix.clone()),
                ("max_results", LIST_PAGE_SIZE.to_string()),
                ("context", "true".to_string()),
            ];
            if let Some(next) = cursor.take() {
                query.push(("next_cursor", next));
            }

            let response = get_http_client()
                .get(self.endpoint("resources/image/upload"))
                .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
                .query(&query)
                .send()
                .await?;
            let page: ResourcesResponse = check_status(response)
                .await?
                .json()
                .await
                .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;

            images.extend(
                page.resources
                    .into_iter()
                    .map(|resource| self.record_from_resource(resource)),
            );

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!("Cloudinary listed {} image(s) under {prefix}", images.len());
        Ok(images)
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        title: &str,
    ) -> Result<ImageRecord, StoreError> {
        let public_id = self.public_id_for(filename);
        let mut params = BTreeMap::new();
        params.insert("public_id", public_id.clone());
        params.insert("context", format!("title={}", escape_context_value(title)));
        params.insert("transformation", INCOMING_TRANSFORMATION.to_string());

        let file_part = Part::bytes(bytes).file_name(filename.to_string());
        let mut form = Form::new().part("file", file_part);
        for (key, value) in self.signed_params(params) {
            form = form.text(key, value);
        }

        info!("Uploading {filename} to Cloudinary as {public_id}");
        let response = get_http_client()
            .post(self.endpoint("image/upload"))
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;

        Ok(ImageRecord {
            id: uploaded.public_id,
            src: uploaded.secure_url,
            title: title.to_string(),
            width: uploaded.width,
            height: uploaded.height,
        })
    }
}
