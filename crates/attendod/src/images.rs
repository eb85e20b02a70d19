//! Cloud image store client (Cloudinary upload API).
//!
//! Registered photos are uploaded, then fetched back from the returned URL
//! for encoding. The URL is not kept afterwards.

use crate::config::CloudinaryConfig;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("image store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("image store rejected upload ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct ImageStore {
    client: reqwest::Client,
    config: CloudinaryConfig,
}

impl ImageStore {
    pub fn new(config: CloudinaryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn cloud_name(&self) -> &str {
        &self.config.cloud_name
    }

    /// Upload an image into the configured folder, returning its HTTPS URL.
    pub async fn upload(&self, file_name: &str, image: Vec<u8>) -> Result<String, ImageStoreError> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign(&self.config.folder, timestamp, &self.config.api_secret);
        let url = format!(
            "{}/v1_1/{}/image/upload",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name
        );

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(image).file_name(file_name.to_string()),
            )
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("folder", self.config.folder.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ImageStoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let uploaded: UploadResponse = response.json().await?;
        tracing::info!(url = %uploaded.secure_url, "image uploaded");
        Ok(uploaded.secure_url)
    }

    /// Download an image previously returned by [`upload`](Self::upload).
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageStoreError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Upload signature: hex SHA-256 of the sorted signed parameters followed by the secret.
fn sign(folder: &str, timestamp: i64, api_secret: &str) -> String {
    let to_sign = format!("folder={folder}&timestamp={timestamp}{api_secret}");
    format!("{:x}", Sha256::digest(to_sign.as_bytes()))
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::testing::{FakeCloud, API_KEY, API_SECRET};

    #[test]
    fn test_sign_is_hex_sha256() {
        let sig = sign("face-images", 1_700_000_000, "secret");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        let expected = Sha256::digest(b"folder=face-images&timestamp=1700000000secret");
        assert_eq!(sig, format!("{expected:x}"));
    }

    #[test]
    fn test_sign_depends_on_secret() {
        assert_ne!(sign("f", 1, "a"), sign("f", 1, "b"));
    }

    #[test]
    fn test_error_body_parses() {
        let body = r#"{"error":{"message":"Invalid Signature"}}"#;
        let parsed: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message, "Invalid Signature");
    }

    fn text(form: &std::collections::HashMap<String, Vec<u8>>, key: &str) -> String {
        String::from_utf8(form[key].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_sends_signed_form_and_fetches_back() {
        let cloud = FakeCloud::start().await;
        let store = ImageStore::new(cloud.config());

        let url = store.upload("me.jpg", b"pixels".to_vec()).await.unwrap();
        assert!(url.starts_with(&cloud.base), "{url}");
        assert_eq!(store.fetch(&url).await.unwrap(), b"pixels");

        let forms = cloud.forms();
        assert_eq!(forms.len(), 1);
        let form = &forms[0];
        let mut keys: Vec<_> = form.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["api_key", "file", "folder", "signature", "signature_algorithm", "timestamp"]
        );
        assert_eq!(form["file"], b"pixels");
        assert_eq!(text(form, "api_key"), API_KEY);
        assert_eq!(text(form, "folder"), "face-images");
        assert_eq!(text(form, "signature_algorithm"), "sha256");
        let timestamp: i64 = text(form, "timestamp").parse().unwrap();
        assert_eq!(text(form, "signature"), sign("face-images", timestamp, API_SECRET));
    }

    #[tokio::test]
    async fn test_rejected_upload_carries_message() {
        let cloud = FakeCloud::rejecting().await;
        let err = ImageStore::new(cloud.config())
            .upload("me.jpg", b"pixels".to_vec())
            .await
            .unwrap_err();
        match err {
            ImageStoreError::Rejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid Signature");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_missing_image_is_http_error() {
        let cloud = FakeCloud::start().await;
        let store = ImageStore::new(cloud.config());
        let err = store.fetch(&format!("{}/files/7", cloud.base)).await.unwrap_err();
        assert!(matches!(err, ImageStoreError::Http(_)));
    }
}
