use std::env;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::{ByteStream, MediaError, MediaResult, MediaStore, PutResult};

/// S3 multipart part size; every part but the last must be at least 5 MiB
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,

    /// Custom endpoint for S3-compatible servers (MinIO, RustFS, ...)
    pub endpoint_url: Option<String>,

    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,

    /// Base URL objects are publicly served from; defaults to the bucket URL
    pub public_base_url: Option<String>,
}

impl S3Config {
    pub fn new<B: Into<String>, R: Into<String>>(bucket: B, region: R) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            public_base_url: None,
        }
    }

    /// Load from `S3_BUCKET`, `S3_REGION` (required) and the optional
    /// `S3_ENDPOINT_URL`, `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY`,
    /// `S3_PUBLIC_BASE_URL`
    pub fn from_env() -> MediaResult<Self> {
        fn required(key: &str) -> MediaResult<String> {
            env::var(key).map_err(|_| MediaError::invalid(format!("{} environment variable required", key)))
        }

        Ok(Self {
            bucket: required("S3_BUCKET")?,
            region: required("S3_REGION")?,
            endpoint_url: env::var("S3_ENDPOINT_URL").ok(),
            access_key_id: env::var("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: env::var("S3_SECRET_ACCESS_KEY").ok(),
            public_base_url: env::var("S3_PUBLIC_BASE_URL").ok(),
        })
    }

    pub fn with_endpoint_url<S: Into<String>>(mut self, url: S) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_credentials<A: Into<String>, S: Into<String>>(mut self, access_key_id: A, secret: S) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret.into());
        self
    }

    pub fn with_public_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.public_base_url = Some(url.into());
        self
    }

    fn object_base_url(&self) -> String {
        match (&self.public_base_url, &self.endpoint_url) {
            (Some(base), _) => base.trim_end_matches('/').to_string(),
            (None, Some(endpoint)) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            (None, None) => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

/// Backing store on an S3-compatible bucket
#[derive(Clone)]
pub struct S3MediaStore {
    client: Client,
    bucket: String,
    base_url: String,
}

impl S3MediaStore {
    pub async fn new(config: S3Config) -> Self {
        let client = Self::create_client(&config).await;
        Self::with_client(client, &config)
    }

    /// Use an already configured SDK client
    pub fn with_client(client: Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            base_url: config.object_base_url(),
        }
    }

    async fn create_client(config: &S3Config) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(key, secret, None, None, "dog-media"));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&sdk_config)
                // Custom endpoints generally don't serve virtual-hosted buckets
                .force_path_style(config.endpoint_url.is_some())
                .build(),
        )
    }

    async fn put_single(&self, key: &str, content_type: &str, data: Bytes) -> MediaResult<PutResult> {
        let size_bytes = data.len() as u64;
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(MediaError::backend)?;

        Ok(PutResult {
            etag: result.e_tag,
            size_bytes,
        })
    }

    async fn start_multipart(&self, key: &str, content_type: &str) -> MediaResult<String> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(MediaError::backend)?;

        created
            .upload_id
            .ok_or_else(|| MediaError::upload_failed(format!("no multipart upload id for {}", key)))
    }

    async fn upload_part(&self, key: &str, upload_id: &str, number: i32, data: Bytes) -> MediaResult<CompletedPart> {
        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(MediaError::backend)?;

        Ok(CompletedPart::builder()
            .set_e_tag(uploaded.e_tag)
            .part_number(number)
            .build())
    }

    /// Upload `first` and the rest of `stream` as parts, then complete the upload
    async fn put_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        stream: &mut ByteStream,
    ) -> MediaResult<PutResult> {
        let mut size_bytes = first.len() as u64;
        let mut parts = vec![self.upload_part(key, upload_id, 1, first).await?];
        let mut buffer = BytesMut::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);
            if buffer.len() >= PART_SIZE {
                let number = parts.len() as i32 + 1;
                parts.push(self.upload_part(key, upload_id, number, buffer.split().freeze()).await?);
            }
        }
        if !buffer.is_empty() {
            let number = parts.len() as i32 + 1;
            parts.push(self.upload_part(key, upload_id, number, buffer.freeze()).await?);
        }

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(MediaError::backend)?;

        Ok(PutResult {
            etag: completed.e_tag,
            size_bytes,
        })
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(e) = aborted {
            warn!("Failed to abort multipart upload {} for {}: {}", upload_id, key, e);
        }
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn list(&self, prefix: &str) -> MediaResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(MediaError::backend)?;

            keys.extend(page.contents().iter().filter_map(|object| object.key().map(str::to_string)));

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        debug!("Listed {} objects under {}", keys.len(), prefix);
        Ok(keys)
    }

    async fn get(&self, key: &str) -> MediaResult<ByteStream> {
        let output = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(MediaError::not_found(key));
            }
            Err(e) => return Err(MediaError::backend(e)),
        };

        let mut body = output.body;
        let stream = async_stream::stream! {
            loop {
                match body.try_next().await {
                    Ok(Some(chunk)) => yield Ok::<Bytes, std::io::Error>(chunk),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(std::io::Error::other(e));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn put(&self, key: &str, content_type: &str, mut stream: ByteStream) -> MediaResult<PutResult> {
        // Buffer up to one part; small bodies never start a multipart upload
        let mut buffer = BytesMut::new();
        while buffer.len() < PART_SIZE {
            match stream.next().await {
                Some(chunk) => buffer.extend_from_slice(&chunk?),
                None => return self.put_single(key, content_type, buffer.freeze()).await,
            }
        }

        let upload_id = self.start_multipart(key, content_type).await?;
        match self.put_parts(key, &upload_id, buffer.freeze(), &mut stream).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.abort_multipart(key, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn exists(&self, key: &str) -> MediaResult<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(MediaError::backend(e)),
        }
    }

    /// Check, copy, delete. S3 has no conditional copy, so two writers can
    /// both pass the check; the later copy overwrites identical content.
    async fn rename(&self, from: &str, to: &str) -> MediaResult<()> {
        if self.exists(to).await? {
            return Err(MediaError::already_exists(to));
        }

        // Digests are base64url, variant names and the prefix are restricted to
        // URL-safe characters, so the copy source needs no percent-encoding
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, from))
            .key(to)
            .send()
            .await
            .map_err(MediaError::backend)?;

        self.delete(from).await
    }

    async fn delete(&self, key: &str) -> MediaResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(MediaError::backend)?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_base_url_wins() {
        let config = S3Config::new("media", "eu-west-1")
            .with_endpoint_url("http://localhost:9000/")
            .with_public_base_url("https://cdn.example.com/");
        assert_eq!(config.object_base_url(), "https://cdn.example.com");
    }

    #[test]
    fn endpoint_url_uses_path_style() {
        let config = S3Config::new("media", "eu-west-1").with_endpoint_url("http://localhost:9000");
        assert_eq!(config.object_base_url(), "http://localhost:9000/media");
    }

    #[test]
    fn aws_default_url() {
        let config = S3Config::new("media", "eu-west-1");
        assert_eq!(config.object_base_url(), "https://media.s3.eu-west-1.amazonaws.com");
    }
}
