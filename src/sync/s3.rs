use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::{
    config::{http::HttpResponse, Builder as S3ConfigBuilder, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    Client as S3Client,
};
use chrono::{TimeZone, Utc};

use crate::config::SyncConfig;

use super::remote::{RemoteError, RemoteMetadata, RemoteStore};

/// S3 error codes that mean our credentials are no longer any good.
const AUTH_ERROR_CODES: [&str; 5] = [
    "ExpiredToken",
    "TokenRefreshRequired",
    "InvalidAccessKeyId",
    "InvalidToken",
    "SignatureDoesNotMatch",
];

/// A [`RemoteStore`] backed by one S3 (or S3-compatible) bucket.
pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from static credentials in the application config.
    pub fn from_config(config: &SyncConfig) -> Self {
        let mut builder = SdkConfig::builder()
            .region(Region::new(config.aws_region.clone()))
            .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                config.aws_access_key_id.clone(),
                config.aws_secret_access_key.clone(),
                None,
                None,
                "rocket config",
            )))
            .behavior_version(BehaviorVersion::latest());
        if let Some(url) = &config.aws_endpoint_url {
            builder = builder.endpoint_url(url);
        }
        let sdk_config = builder.build();

        // Self-hosted S3 lookalikes generally want path-style addressing.
        let s3_config = S3ConfigBuilder::from(&sdk_config)
            .force_path_style(config.aws_endpoint_url.is_some())
            .build();
        Self::new(S3Client::from_conf(s3_config), config.s3_bucket.clone())
    }
}

#[rocket::async_trait]
impl RemoteStore for S3Store {
    fn describe(&self, path: &str) -> String {
        format!("s3://{}/{}", self.bucket, path)
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| classify("PutObject", e))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| classify("GetObject", e))?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| RemoteError::Transient(format!("GetObject body: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, RemoteError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| classify("HeadObject", e))?;
        let modified = output.last_modified().ok_or_else(|| {
            RemoteError::Transient("HeadObject returned no Last-Modified".to_string())
        })?;
        let last_modified = Utc
            .timestamp_opt(modified.secs(), modified.subsec_nanos())
            .single()
            .ok_or_else(|| RemoteError::Transient(format!("unrepresentable time {modified:?}")))?;
        Ok(RemoteMetadata { last_modified })
    }
}

/// Sort an SDK failure into the three kinds sync cares about.
fn classify<E>(operation: &str, err: SdkError<E, HttpResponse>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let code = err
        .as_service_error()
        .and_then(|e| e.code())
        .map(str::to_string);

    match (code.as_deref(), status) {
        (Some("NoSuchBucket"), _) => RemoteError::Transient(format!("{operation}: no such bucket")),
        (Some("NoSuchKey" | "NotFound"), _) | (_, Some(404)) => RemoteError::NotFound,
        (Some(code), _) if AUTH_ERROR_CODES.contains(&code) => {
            RemoteError::AuthExpired(format!("{operation}: {code}"))
        }
        (_, Some(status @ (401 | 403))) => {
            RemoteError::AuthExpired(format!("{operation}: HTTP {status}"))
        }
        _ => RemoteError::Transient(format!("{operation}: {}", DisplayErrorContext(&err))),
    }
}
