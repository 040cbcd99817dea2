use crate::auth::{self, AuthError, ANONYMOUS};
use crate::config::Config;
use crate::db::{self, is_unique_violation, ImageRepository, NewImage};
use crate::error::ApiError;
use crate::models::{
    AuthForm, AuthResponse, DeleteForm, GenericResponse, HideForm, InsertForm, SearchForm,
    SearchResult,
};
use crate::names::{self, IMAGE_NAME_LENGTH};
use crate::page::{self, ImagePage, PageTemplate};
use crate::search::SearchFilter;
use crate::storage::{self, create_storage, StorageBackend};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Standard alphabet; padding is optional because many clients strip it.
const IMAGE_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const DEFAULT_FORMAT: &str = "png";
const DEFAULT_CLIENT: &str = "Unknown Client";

/// How many random names to try before giving up on an upload.
const MAX_NAME_ATTEMPTS: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub storage: Arc<dyn StorageBackend>,
    pub config: Arc<Config>,
    pub template: Arc<PageTemplate>,
}

impl AppState {
    /// Connect to the database, set up storage and load the page template.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let db = db::connect(&config.database_url).await?;
        tracing::info!("Connected to database");

        let storage = create_storage(&config)?;
        tracing::info!("Storage type: {:?}", config.storage_type);

        let template = PageTemplate::load(config.image_template.as_deref())?;

        Ok(AppState {
            db,
            storage,
            config: Arc::new(config),
            template: Arc::new(template),
        })
    }
}

/// Address of the client that sent the request.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

#[axum::async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(ClientIp(client_ip(
            &parts.headers,
            peer,
            state.config.trust_headers,
        )))
    }
}

/// Resolve the client address, preferring the first `X-Forwarded-For` hop
/// when proxy headers are trusted.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_headers: bool) -> String {
    if trust_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(forwarded) = forwarded {
            return forwarded.to_string();
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Bodies are decoded as JSON whatever the Content-Type says.
fn parse_form<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::InvalidRequest)
}

/// Decode an uploaded image. Line breaks and other ASCII whitespace are
/// skipped, so wrapped `base64` output is accepted.
fn decode_image(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: Vec<u8> = encoded
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    IMAGE_BASE64.decode(compact)
}

/// MIME subtype of an image (`png`, `jpeg`, ...) or `None` if the bytes are
/// not a recognised image.
fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).and_then(|kind| kind.mime_type().strip_prefix("image/"))
}

async fn unused_image_name(images: &ImageRepository<'_>) -> Result<String, ApiError> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let name = names::image_name(IMAGE_NAME_LENGTH);
        if images.owner(&name).await?.is_none() {
            return Ok(name);
        }
    }
    tracing::warn!(
        "Could not find an unused image name after {} attempts",
        MAX_NAME_ATTEMPTS
    );
    Err(ApiError::AlreadyExists)
}

/// POST /auth/register - Create an account
pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Json<AuthResponse>, AuthError> {
    let form: AuthForm = serde_json::from_slice(&body).map_err(|_| AuthError::InvalidRequest)?;
    if form.username.is_empty() || form.password.is_empty() {
        tracing::debug!("{} sent an invalid register request", ip);
        return Err(AuthError::InvalidRequest);
    }

    let token = auth::register(
        &state.db,
        &form.username,
        &form.password,
        state.config.bcrypt_cost,
        state.config.token_cost(),
    )
    .await
    .map_err(|e| {
        match &e {
            AuthError::UserExists => tracing::debug!(
                "{} tried to register the name {}, but it is already in use",
                ip,
                form.username
            ),
            AuthError::InvalidName => {
                tracing::debug!("{} tried to register a name with illegal characters", ip)
            }
            _ => {}
        }
        e
    })?;

    tracing::debug!("{} registered as {}", ip, form.username);
    Ok(Json(AuthResponse {
        auth_token: Some(token),
        ..AuthResponse::default()
    }))
}

/// POST /auth/login - Exchange a password for a new auth token
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Json<AuthResponse>, AuthError> {
    let form: AuthForm = serde_json::from_slice(&body).map_err(|_| AuthError::InvalidRequest)?;
    if form.username.is_empty() || form.password.is_empty() {
        tracing::debug!("{} sent an invalid login request", ip);
        return Err(AuthError::InvalidRequest);
    }

    let token = auth::login(
        &state.db,
        &form.username,
        &form.password,
        state.config.token_cost(),
    )
    .await
    .map_err(|e| {
        if matches!(e, AuthError::IncorrectPassword) {
            tracing::debug!(
                "{} tried to log in as {} with an incorrect password",
                ip,
                form.username
            );
        }
        e
    })?;

    tracing::debug!("{} logged in as {}", ip, form.username);
    Ok(Json(AuthResponse {
        auth_token: Some(token),
        ..AuthResponse::default()
    }))
}

/// POST /insert - Upload a new image or replace one of your own
pub async fn insert_image(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<(StatusCode, Json<GenericResponse>), ApiError> {
    let mut form: InsertForm = parse_form(&body)?;
    if form.image.is_empty() {
        tracing::debug!("{} sent an invalid insert request", ip);
        return Err(ApiError::InvalidRequest);
    }

    if form.image_format.is_empty() {
        form.image_format = DEFAULT_FORMAT.to_string();
    }
    if form.client_name.is_empty() {
        form.client_name = DEFAULT_CLIENT.to_string();
    }
    if (!form.image_name.is_empty() && !names::valid_image_name(&form.image_name))
        || !names::valid_format(&form.image_format)
    {
        tracing::debug!("{} sent an insert request with an illegal name or format", ip);
        return Err(ApiError::InvalidName);
    }

    let username = if form.username.is_empty() || form.auth_token.is_empty() {
        if state.config.require_auth {
            tracing::debug!(
                "{} tried to upload an image without authentication, even though authentication is required",
                ip
            );
            return Err(ApiError::NotLoggedIn);
        }
        ANONYMOUS.to_string()
    } else {
        auth::check_auth_token(&state.db, &form.username, &form.auth_token)
            .await
            .map_err(|e| {
                tracing::debug!("{} tried to authenticate as {} with the wrong token", ip, form.username);
                ApiError::from(e)
            })?;
        form.username.clone()
    };

    let images = ImageRepository::new(&state.db);
    let name = if form.image_name.is_empty() {
        unused_image_name(&images).await?
    } else {
        form.image_name.clone()
    };

    // Existing images may only be replaced by their (registered) owner.
    let existing = images.query(&name).await?;
    if let Some(entry) = &existing {
        if entry.adder != username || username == ANONYMOUS {
            tracing::debug!(
                "{}@{} attempted to override an image uploaded by {}",
                username,
                ip,
                entry.adder
            );
            return Err(ApiError::AlreadyExists);
        }
    }

    let bytes = decode_image(&form.image).map_err(|e| {
        tracing::debug!("Error while decoding image from {}@{}: {}", username, ip, e);
        ApiError::from(e)
    })?;

    let mime_type = sniff_image_type(&bytes).ok_or_else(|| {
        tracing::debug!(
            "{}@{} attempted to upload data that is not an image",
            username,
            ip
        );
        ApiError::InvalidMime
    })?;

    let record = NewImage {
        name: &name,
        format: &form.image_format,
        mime_type,
        adder: &username,
        adder_ip: &ip,
        client: &form.client_name,
        timestamp: chrono::Utc::now().timestamp(),
        hidden: form.hidden,
    };
    let content_type = format!("image/{}", mime_type);

    match existing {
        None => {
            // Claim the name first so concurrent uploads can't both win.
            images.insert(&record).await.map_err(|e| {
                if is_unique_violation(&e) {
                    ApiError::AlreadyExists
                } else {
                    ApiError::Database(e)
                }
            })?;

            if let Err(e) = state
                .storage
                .store_file(bytes, &name, &form.image_format, &content_type)
                .await
            {
                if let Err(db_err) = images.remove(&name).await {
                    tracing::error!("Failed to roll back image {}: {}", name, db_err);
                }
                return Err(ApiError::Storage(e));
            }

            tracing::debug!(
                "{}@{} successfully uploaded an image with the name {} (new)",
                username,
                ip,
                name
            );
            Ok((
                StatusCode::CREATED,
                Json(GenericResponse::ok(
                    "created",
                    format!("The image was successfully saved with the name {}", name),
                )),
            ))
        }
        Some(previous) => {
            state
                .storage
                .store_file(bytes, &name, &form.image_format, &content_type)
                .await
                .map_err(ApiError::Storage)?;

            let format_changed = previous.format != form.image_format;

            if let Err(e) = images.update(&record).await {
                // The row still points at the previous file; drop the new one.
                if format_changed {
                    if let Err(e) = state.storage.delete_file(&name, &form.image_format).await {
                        tracing::warn!(
                            "Failed to remove unused file {}.{}: {}",
                            name,
                            form.image_format,
                            e
                        );
                    }
                }
                return Err(ApiError::Database(e));
            }

            if format_changed {
                if let Err(e) = state.storage.delete_file(&name, &previous.format).await {
                    tracing::warn!(
                        "Failed to remove previous file {}.{}: {}",
                        name,
                        previous.format,
                        e
                    );
                }
            }

            tracing::debug!(
                "{}@{} successfully uploaded an image with the name {} (replaced)",
                username,
                ip,
                name
            );
            Ok((
                StatusCode::ACCEPTED,
                Json(GenericResponse::ok(
                    "replaced",
                    format!(
                        "The image was successfully saved with the name {}, replacing your previous image with the same name",
                        name
                    ),
                )),
            ))
        }
    }
}

/// POST /delete - Delete one of your images
pub async fn delete_image(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<(StatusCode, Json<GenericResponse>), ApiError> {
    let form: DeleteForm = parse_form(&body)?;
    if form.image_name.is_empty() || form.username.is_empty() || form.auth_token.is_empty() {
        tracing::debug!("{} sent an invalid delete request", ip);
        return Err(ApiError::InvalidRequest);
    }

    auth::check_auth_token(&state.db, &form.username, &form.auth_token)
        .await
        .map_err(|e| {
            tracing::debug!("{} tried to authenticate as {} with the wrong token", ip, form.username);
            ApiError::from(e)
        })?;

    let images = ImageRepository::new(&state.db);
    let entry = images.query(&form.image_name).await?.ok_or_else(|| {
        tracing::debug!(
            "{}@{} attempted to delete an image that doesn't exist",
            form.username,
            ip
        );
        ApiError::NotFound
    })?;

    if entry.adder != form.username {
        tracing::debug!(
            "{}@{} attempted to delete an image uploaded by {}",
            form.username,
            ip,
            entry.adder
        );
        return Err(ApiError::NoPermissions);
    }

    images.remove(&entry.image_name).await?;

    match state
        .storage
        .delete_file(&entry.image_name, &entry.format)
        .await
    {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            "Error deleting {} from storage (requested by {}@{}): file not found",
            entry.image_name,
            form.username,
            ip
        ),
        Err(e) => {
            tracing::error!(
                "Image {} was removed from the database but its file {} could not be deleted: {}",
                entry.image_name,
                storage::backend::file_name(&entry.image_name, &entry.format),
                e
            );
            return Err(ApiError::Storage(e));
        }
    }

    tracing::debug!(
        "{}@{} successfully deleted the image with the name {}",
        form.username,
        ip,
        entry.image_name
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(GenericResponse::ok(
            "deleted",
            format!("The image {} was successfully deleted.", entry.image_name),
        )),
    ))
}

/// POST /hide - Hide or unhide one of your images
pub async fn hide_image(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<(StatusCode, Json<GenericResponse>), ApiError> {
    let form: HideForm = parse_form(&body)?;
    if form.image_name.is_empty() || form.username.is_empty() || form.auth_token.is_empty() {
        tracing::debug!("{} sent an invalid hide request", ip);
        return Err(ApiError::InvalidRequest);
    }

    auth::check_auth_token(&state.db, &form.username, &form.auth_token)
        .await
        .map_err(|e| {
            tracing::debug!("{} tried to authenticate as {} with the wrong token", ip, form.username);
            ApiError::from(e)
        })?;

    let images = ImageRepository::new(&state.db);
    match images.owner(&form.image_name).await? {
        None => {
            tracing::debug!(
                "{}@{} attempted to hide an image that doesn't exist",
                form.username,
                ip
            );
            return Err(ApiError::NotFound);
        }
        Some(owner) if owner != form.username => {
            tracing::debug!(
                "{}@{} attempted to hide an image uploaded by {}",
                form.username,
                ip,
                owner
            );
            return Err(ApiError::NoPermissions);
        }
        Some(_) => {}
    }

    images.set_hidden(&form.image_name, form.hidden).await?;

    let status = if form.hidden { "hidden" } else { "unhidden" };
    tracing::debug!(
        "{}@{} successfully changed hidden status of {} to {}",
        form.username,
        ip,
        form.image_name,
        form.hidden
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(GenericResponse::ok(
            status,
            format!("The image {} was successfully {}.", form.image_name, status),
        )),
    ))
}

/// POST /search - Search image metadata
pub async fn search_images(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    if !state.config.allow_search {
        tracing::warn!("{} attempted to execute a search, even though it's not allowed", ip);
        return Err(ApiError::SearchDisabled);
    }

    let form: SearchForm = parse_form(&body)?;
    let mut filter = SearchFilter::from_form(&form, chrono::Utc::now().timestamp())
        .ok_or_else(|| {
            tracing::debug!("{} sent an invalid search request", ip);
            ApiError::InvalidRequest
        })?;

    if !form.auth_token.is_empty() {
        auth::check_auth_token(&state.db, &form.adder, &form.auth_token)
            .await
            .map_err(|e| {
                tracing::debug!("{} tried to authenticate as {} with the wrong token", ip, form.adder);
                ApiError::from(e)
            })?;
        filter = filter.with_viewer(form.adder.clone());
    }

    let results = ImageRepository::new(&state.db)
        .search(&filter)
        .await
        .map_err(|e| {
            tracing::error!("Failed to execute search {} by {}: {}", form, ip, e);
            ApiError::Database(e)
        })?;

    tracing::debug!("{} executed a search: {}", ip, form);
    Ok(Json(results.into_iter().map(SearchResult::from).collect()))
}

/// GET /{file} - Image page for `name`, raw image data for `name.ext`
pub async fn get_image(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let images = ImageRepository::new(&state.db);

    if names::valid_image_name(&file) {
        if let Some(entry) = images.query(&file).await? {
            let image_addr = state.storage.generate_url(&entry.image_name, &entry.format);
            let date = page::format_date(entry.timestamp, &state.config.date_format);
            let html = state.template.render(&ImagePage {
                image_name: &entry.image_name,
                image_addr: &image_addr,
                uploader: &entry.adder,
                date: &date,
                client: &entry.client,
                index: entry.id,
            });
            return Ok(Html(html).into_response());
        }
    }

    let (name, extension) = names::split_file_name(&file).ok_or(ApiError::NotFound)?;

    let bytes = state
        .storage
        .get_file(name, extension)
        .await
        .map_err(|e| {
            tracing::debug!("Failed to read image {} requested by {}: {}", file, ip, e);
            ApiError::NotFound
        })?;

    let content_type = match images.query(name).await? {
        Some(entry) if entry.format == extension => format!("image/{}", entry.mime_type),
        _ => format!("image/{}", extension),
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAABUAAAARCAIAAAC95HDXAAAAFklEQVR42mP4ThlgGNU/qn9U/4jVDwBiDAmW9sWkNgAAAABJRU5ErkJggg==";

    #[test]
    fn client_ip_prefers_forwarded_header_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer = Some("10.0.0.1".parse().unwrap());

        assert_eq!(client_ip(&headers, peer, true), "203.0.113.7");
        assert_eq!(client_ip(&headers, peer, false), "10.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), None, true), "unknown");
    }

    #[test]
    fn decodes_padded_and_unpadded_base64() {
        let padded = decode_image(PNG).unwrap();
        let unpadded = decode_image(PNG.trim_end_matches('=')).unwrap();
        assert_eq!(padded, unpadded);

        let wrapped = format!("{}\r\n{}\n", &PNG[..76], &PNG[76..]);
        assert_eq!(decode_image(&wrapped).unwrap(), padded);
        assert_eq!(decode_image(&format!("  {}  ", PNG)).unwrap(), padded);

        assert!(decode_image("not base64!").is_err());
    }

    #[test]
    fn sniffs_image_types() {
        let png = decode_image(PNG).unwrap();
        assert_eq!(sniff_image_type(&png), Some("png"));
        assert_eq!(sniff_image_type(b"GIF89a\x01\x00\x01\x00"), Some("gif"));
        assert_eq!(sniff_image_type(b"plain text"), None);
        assert_eq!(sniff_image_type(b"%PDF-1.4\n"), None);
    }
}
