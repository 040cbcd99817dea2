use std::env;

/// Default request body limit (32 MiB). Base64 inflates images by a third.
const DEFAULT_MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub base_url: String,
    pub storage_type: StorageType,
    pub local_storage_path: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub server_ip: String,
    pub server_port: u16,
    pub date_format: String,
    pub image_template: Option<String>,
    pub trust_headers: bool,
    pub allow_search: bool,
    pub require_auth: bool,
    pub bcrypt_cost: u32,
    pub max_body_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageType {
    Local,
    S3,
}

impl std::str::FromStr for StorageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageType::Local),
            "s3" => Ok(StorageType::S3),
            _ => Err(anyhow::anyhow!("Invalid storage type: {}", s)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite://image-host.db".to_string(),
            base_url: "http://localhost:29300".to_string(),
            storage_type: StorageType::Local,
            local_storage_path: Some("./images".to_string()),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
            server_ip: "0.0.0.0".to_string(),
            server_port: 29300,
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            image_template: None,
            trust_headers: false,
            allow_search: true,
            require_auth: false,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let defaults = Config::default();

        Ok(Config {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            base_url: env::var("BASE_URL").unwrap_or(defaults.base_url),
            storage_type: env::var("STORAGE_TYPE")
                .unwrap_or_else(|_| "local".to_string())
                .parse()?,
            local_storage_path: env::var("LOCAL_STORAGE_PATH")
                .ok()
                .or(defaults.local_storage_path),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_access_key: env::var("S3_ACCESS_KEY").ok(),
            s3_secret_key: env::var("S3_SECRET_KEY").ok(),
            server_ip: env::var("SERVER_IP").unwrap_or(defaults.server_ip),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| defaults.server_port.to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid SERVER_PORT: {}", e))?,
            date_format: env::var("DATE_FORMAT").unwrap_or(defaults.date_format),
            image_template: env::var("IMAGE_TEMPLATE").ok(),
            trust_headers: env_bool("TRUST_HEADERS", defaults.trust_headers)?,
            allow_search: env_bool("ALLOW_SEARCH", defaults.allow_search)?,
            require_auth: env_bool("REQUIRE_AUTH", defaults.require_auth)?,
            bcrypt_cost: env::var("BCRYPT_COST")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.bcrypt_cost))
                .map_err(|e| anyhow::anyhow!("Invalid BCRYPT_COST: {}", e))?,
            max_body_size: env::var("MAX_BODY_SIZE")
                .map(|v| v.parse())
                .unwrap_or(Ok(defaults.max_body_size))
                .map_err(|e| anyhow::anyhow!("Invalid MAX_BODY_SIZE: {}", e))?,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage_type {
            StorageType::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set for local storage"
                    ));
                }
            }
            StorageType::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!("S3_BUCKET must be set for S3 storage"));
                }
            }
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(anyhow::anyhow!(
                "BCRYPT_COST must be between 4 and 31, got {}",
                self.bcrypt_cost
            ));
        }
        Ok(())
    }

    /// Cost used for hashing auth tokens: three below the password cost, at least 4.
    pub fn token_cost(&self) -> u32 {
        self.bcrypt_cost.saturating_sub(3).max(4)
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool, anyhow::Error> {
    match env::var(key) {
        Ok(value) => parse_bool(&value)
            .ok_or_else(|| anyhow::anyhow!("Invalid {}: {}", key, value)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_storage_type_case_insensitively() {
        assert_eq!("LOCAL".parse::<StorageType>().unwrap(), StorageType::Local);
        assert_eq!("s3".parse::<StorageType>().unwrap(), StorageType::S3);
        assert!("ftp".parse::<StorageType>().is_err());
    }

    #[test]
    fn parses_bool_flags() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn s3_requires_bucket() {
        let config = Config {
            storage_type: StorageType::S3,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            s3_bucket: Some("images".to_string()),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_bcrypt_cost() {
        let config = Config {
            bcrypt_cost: 3,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn token_cost_never_drops_below_minimum() {
        let config = Config {
            bcrypt_cost: 12,
            ..Config::default()
        };
        assert_eq!(config.token_cost(), 9);

        let config = Config {
            bcrypt_cost: 5,
            ..Config::default()
        };
        assert_eq!(config.token_cost(), 4);
    }
}
