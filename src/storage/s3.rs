use super::backend::{file_name, StorageBackend};
use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;

#[cfg(feature = "s3")]
use aws_config::BehaviorVersion;
#[cfg(feature = "s3")]
use aws_sdk_s3::config::Credentials;

pub struct S3Storage {
    bucket: String,
    region: String,
    endpoint: Option<String>,
    credentials: Option<S3Credentials>,
}

struct S3Credentials {
    access_key: String,
    secret_key: String,
}

impl S3Storage {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(S3Storage {
            bucket: config
                .s3_bucket
                .clone()
                .ok_or_else(|| anyhow::anyhow!("S3 bucket must be configured for S3 storage"))?,
            region: config
                .s3_region
                .clone()
                .unwrap_or_else(|| "us-east-1".to_string()),
            endpoint: config.s3_endpoint.clone(),
            credentials: match (&config.s3_access_key, &config.s3_secret_key) {
                (Some(access), Some(secret)) => Some(S3Credentials {
                    access_key: access.clone(),
                    secret_key: secret.clone(),
                }),
                _ => None,
            },
        })
    }

    /// Build an S3 client for the configured region/endpoint
    #[cfg(feature = "s3")]
    async fn get_client(&self) -> Result<aws_sdk_s3::Client> {
        let mut config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()));

        if let Some(endpoint) = &self.endpoint {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        // Add credentials if provided
        if let Some(creds) = &self.credentials {
            config_loader = config_loader.credentials_provider(Credentials::new(
                &creds.access_key,
                &creds.secret_key,
                None,
                None,
                "static",
            ));
        }

        let sdk_config = config_loader.load().await;
        // Custom endpoints (MinIO and friends) usually want path-style addressing.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.endpoint.is_some())
            .build();
        Ok(aws_sdk_s3::Client::from_conf(s3_config))
    }

    /// Generate S3 URL
    fn generate_s3_url(&self, key: &str) -> String {
        if let Some(endpoint) = &self.endpoint {
            format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                key
            )
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }
}

/// `HeadObject` answers a missing key with a bare 404 `NotFound`.
#[cfg(feature = "s3")]
fn is_missing_key(err: &aws_sdk_s3::operation::head_object::HeadObjectError) -> bool {
    err.is_not_found()
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn store_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        extension: &str,
        mime_type: &str,
    ) -> Result<String> {
        #[cfg(feature = "s3")]
        {
            use aws_sdk_s3::primitives::ByteStream;

            let client = self.get_client().await?;
            let key = file_name(name, extension);

            client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(ByteStream::from(bytes))
                .content_type(mime_type)
                .send()
                .await?;

            Ok(self.generate_s3_url(&key))
        }

        #[cfg(not(feature = "s3"))]
        {
            let _ = (bytes, name, extension, mime_type);
            Err(anyhow::anyhow!("S3 feature not enabled"))
        }
    }

    async fn get_file(&self, name: &str, extension: &str) -> Result<Vec<u8>> {
        #[cfg(feature = "s3")]
        {
            let client = self.get_client().await?;
            let key = file_name(name, extension);

            let response = client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await?;

            let bytes = response.body.collect().await?.into_bytes();
            Ok(bytes.to_vec())
        }

        #[cfg(not(feature = "s3"))]
        {
            let _ = (name, extension);
            Err(anyhow::anyhow!("S3 feature not enabled"))
        }
    }

    async fn delete_file(&self, name: &str, extension: &str) -> Result<bool> {
        #[cfg(feature = "s3")]
        {
            let client = self.get_client().await?;
            let key = file_name(name, extension);

            match client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(_) => {}
                Err(e) if e.as_service_error().is_some_and(is_missing_key) => {
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }

            client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await?;

            Ok(true)
        }

        #[cfg(not(feature = "s3"))]
        {
            let _ = (name, extension);
            Err(anyhow::anyhow!("S3 feature not enabled"))
        }
    }

    fn generate_url(&self, name: &str, extension: &str) -> String {
        self.generate_s3_url(&file_name(name, extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_for_aws_and_custom_endpoints() {
        let config = Config {
            s3_bucket: Some("pics".to_string()),
            s3_region: Some("eu-west-1".to_string()),
            ..Config::default()
        };
        let storage = S3Storage::new(&config).unwrap();
        assert_eq!(
            storage.generate_url("abcde", "png"),
            "https://pics.s3.eu-west-1.amazonaws.com/abcde.png"
        );

        let config = Config {
            s3_endpoint: Some("http://minio:9000/".to_string()),
            ..config
        };
        let storage = S3Storage::new(&config).unwrap();
        assert_eq!(
            storage.generate_url("abcde", "png"),
            "http://minio:9000/pics/abcde.png"
        );
    }

    #[cfg(feature = "s3")]
    #[test]
    fn only_not_found_counts_as_missing() {
        use aws_sdk_s3::error::ErrorMetadata;
        use aws_sdk_s3::operation::head_object::HeadObjectError;
        use aws_sdk_s3::types::error::NotFound;

        assert!(is_missing_key(&HeadObjectError::NotFound(
            NotFound::builder().build()
        )));
        assert!(!is_missing_key(&HeadObjectError::generic(
            ErrorMetadata::builder().code("AccessDenied").build()
        )));
    }

    #[test]
    fn requires_bucket() {
        assert!(S3Storage::new(&Config::default()).is_err());
    }
}
