use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Body of `POST /insert`. Whether credentials are required depends on the
/// server configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InsertForm {
    pub image: String,
    pub image_name: String,
    pub image_format: String,
    pub client_name: String,
    pub username: String,
    pub auth_token: String,
    pub hidden: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeleteForm {
    pub image_name: String,
    pub username: String,
    pub auth_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HideForm {
    pub image_name: String,
    pub hidden: bool,
    pub username: String,
    pub auth_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SearchForm {
    pub image_format: String,
    pub adder: String,
    pub client_name: String,
    pub uploaded_after: i64,
    pub uploaded_before: i64,
    pub auth_token: String,
}

impl std::fmt::Display for SearchForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<{}|{}|{}|{}|{}>",
            self.image_format,
            self.adder,
            self.client_name,
            self.uploaded_after,
            self.uploaded_before
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthForm {
    pub username: String,
    pub password: String,
}

/// Response for insert/delete/hide requests and for every image endpoint error.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenericResponse {
    pub success: bool,
    #[serde(rename = "status-simple")]
    pub status: String,
    #[serde(rename = "status-humanreadable")]
    pub status_readable: String,
}

impl GenericResponse {
    pub fn ok(status: &str, readable: impl Into<String>) -> Self {
        GenericResponse {
            success: true,
            status: status.to_string(),
            status_readable: readable.into(),
        }
    }

    pub fn failure(status: &str, readable: impl Into<String>) -> Self {
        GenericResponse {
            success: false,
            status: status.to_string(),
            status_readable: readable.into(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(rename = "auth-token", skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(rename = "error-simple", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "error-humanreadable", skip_serializing_if = "Option::is_none")]
    pub error_readable: Option<String>,
}

/// A row of the `images` table.
#[derive(Debug, Clone, FromRow)]
pub struct ImageEntry {
    pub id: i64,
    pub image_name: String,
    pub format: String,
    pub mime_type: String,
    pub adder: String,
    pub adder_ip: String,
    pub client: String,
    pub timestamp: i64,
    pub hidden: bool,
}

/// Public view of an image returned by `/search`. The uploader's IP is never
/// part of it.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    #[serde(rename = "image-name")]
    pub image_name: String,
    #[serde(rename = "image-format")]
    pub format: String,
    #[serde(rename = "mime-type")]
    pub mime_type: String,
    pub adder: String,
    #[serde(rename = "client-name")]
    pub client: String,
    pub timestamp: i64,
    pub id: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl From<ImageEntry> for SearchResult {
    fn from(entry: ImageEntry) -> Self {
        SearchResult {
            image_name: entry.image_name,
            format: entry.format,
            mime_type: entry.mime_type,
            adder: entry.adder,
            client: entry.client,
            timestamp: entry.timestamp,
            id: entry.id,
            hidden: entry.hidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_form_uses_dashed_keys_and_defaults() {
        let form: InsertForm = serde_json::from_str(
            r#"{"image": "abc", "image-name": "cat", "client-name": "curl"}"#,
        )
        .unwrap();
        assert_eq!(form.image, "abc");
        assert_eq!(form.image_name, "cat");
        assert_eq!(form.client_name, "curl");
        assert!(form.image_format.is_empty());
        assert!(!form.hidden);
    }

    #[test]
    fn search_result_omits_visible_flag() {
        let result = SearchResult {
            image_name: "abcde".to_string(),
            format: "png".to_string(),
            mime_type: "png".to_string(),
            adder: "alice".to_string(),
            client: "curl".to_string(),
            timestamp: 10,
            id: 1,
            hidden: false,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("hidden").is_none());
        assert!(value.get("adder-ip").is_none());
        assert_eq!(value["image-name"], "abcde");
    }

    #[test]
    fn auth_response_skips_empty_fields() {
        let response = AuthResponse {
            auth_token: Some("token".to_string()),
            ..AuthResponse::default()
        };
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"auth-token":"token"}"#
        );
    }
}
