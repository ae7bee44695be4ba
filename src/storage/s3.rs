use super::sigv4::{self, Credentials, UNSIGNED_PAYLOAD};
use super::{StorageBackend, StorageError, StorageKind, S3_KEY_PREFIX};
use crate::config::S3Settings;
use async_trait::async_trait;
use chrono::{Local, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// S3-compatible object storage, addressed path-style as `{endpoint}/{bucket}/{key}`.
pub struct S3Storage {
    settings: S3Settings,
    http: reqwest::Client,
}

impl S3Storage {
    pub fn new(settings: S3Settings, http: reqwest::Client) -> Result<Self, StorageError> {
        let missing = settings.missing_fields();
        if !missing.is_empty() {
            return Err(StorageError::ConfigurationIncomplete(format!(
                "missing {}",
                missing.join(", ")
            )));
        }
        Ok(Self { settings, http })
    }

    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        let raw = format!(
            "{}/{}/{}",
            self.settings.effective_endpoint(),
            sigv4::uri_encode(&self.settings.bucket, true),
            sigv4::uri_encode(key, false)
        );
        Url::parse(&raw).map_err(|e| StorageError::InvalidPath(format!("{}: {}", raw, e)))
    }

    fn signed_request(
        &self,
        method: Method,
        url: Url,
        extra: &[(&str, &str)],
    ) -> RequestBuilder {
        let credentials = Credentials {
            access_key: &self.settings.access_key,
            secret_key: &self.settings.secret_key,
            region: &self.settings.region,
        };
        let signed = sigv4::sign(
            method.as_str(),
            &url,
            extra,
            UNSIGNED_PAYLOAD,
            Utc::now(),
            &credentials,
        );

        let mut request = self
            .http
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization);
        for (name, value) in extra {
            request = request.header(*name, *value);
        }
        request
    }

    async fn check_status(
        response: Response,
        method: &'static str,
        key: &str,
    ) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::UnexpectedStatus {
            method,
            key: key.to_string(),
            status: status.as_u16(),
            body: body.chars().take(512).collect(),
        })
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    async fn save(&self, name: &str, artifact: &Path) -> Result<String, StorageError> {
        if name.is_empty() || name.contains('/') {
            return Err(StorageError::InvalidPath(name.to_string()));
        }
        let key = format!(
            "{}{}/{}",
            S3_KEY_PREFIX,
            Local::now().format("%Y%m%d"),
            name
        );
        let url = self.object_url(&key)?;

        let file = tokio::fs::File::open(artifact).await?;
        let length = file.metadata().await?.len().to_string();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .signed_request(Method::PUT, url, &[("content-length", length.as_str())])
            .body(body)
            .send()
            .await?;
        Self::check_status(response, "PUT", &key).await?;

        info!(
            "Uploaded {} to s3://{}/{}",
            name, self.settings.bucket, key
        );
        Ok(key)
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(path)?;
        let response = self.signed_request(Method::GET, url, &[]).send().await?;
        let response = Self::check_status(response, "GET", path).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        if path.is_empty() {
            return Err(StorageError::InvalidPath("empty path".to_string()));
        }
        let url = self.object_url(path)?;
        let response = self.signed_request(Method::DELETE, url, &[]).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("s3://{}/{} already absent", self.settings.bucket, path);
            return Ok(());
        }
        Self::check_status(response, "DELETE", path).await?;
        info!("Deleted s3://{}/{}", self.settings.bucket, path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_settings(endpoint: &str) -> S3Settings {
        S3Settings {
            endpoint: endpoint.to_string(),
            region: "eu-west-1".to_string(),
            access_key: "AKIA".to_string(),
            secret_key: "secret".to_string(),
            bucket: "nightly".to_string(),
        }
    }

    #[test]
    fn incomplete_settings_are_rejected() {
        let mut settings = complete_settings("");
        settings.secret_key.clear();
        let err = S3Storage::new(settings, reqwest::Client::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("storage.s3SecretKey"));
    }

    #[test]
    fn object_url_is_path_style() {
        let storage =
            S3Storage::new(complete_settings("http://minio:9000"), reqwest::Client::new())
                .unwrap();
        assert_eq!(
            storage
                .object_url("backups/20240101/task_1_a b.zip")
                .unwrap()
                .as_str(),
            "http://minio:9000/nightly/backups/20240101/task_1_a%20b.zip"
        );
    }

    #[test]
    fn empty_endpoint_uses_aws_regional_host() {
        let storage = S3Storage::new(complete_settings(""), reqwest::Client::new()).unwrap();
        assert_eq!(
            storage.object_url("backups/k").unwrap().as_str(),
            "https://s3.eu-west-1.amazonaws.com/nightly/backups/k"
        );
    }
}
