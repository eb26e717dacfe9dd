//! Source resolution: turns an upload, URL or data URI into raw image bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use url::Url;

use crate::models::{ImageSource, MediaType, ResolvedImage};
use crate::services::error::Rejection;

/// Checks the byte signature against the supported set
pub fn is_supported_file_type(bytes: &[u8]) -> bool {
    MediaType::sniff(bytes).is_some()
}

/// Scheme and host must both be present
pub fn is_valid_url(source: &str) -> bool {
    Url::parse(source).is_ok_and(|u| !u.scheme().is_empty() && u.host_str().is_some_and(|h| !h.is_empty()))
}

/// Supported type from the trailing `.ext` of the URL path.
/// `None` when the path has no extension; `Some(None)` when it has an unsupported one.
fn url_path_extension(url: &Url) -> Option<Option<MediaType>> {
    let last = url.path().rsplit('/').next().unwrap_or("");
    let (_, ext) = last.rsplit_once('.')?;
    Some(MediaType::from_name(ext))
}

/// `image/<type>` with an optional `; charset=...` suffix
fn media_type_from_content_type(value: &str) -> Option<MediaType> {
    let essence = value.split(';').next()?.trim();
    let (kind, subtype) = essence.split_once('/')?;
    if !kind.eq_ignore_ascii_case("image") {
        return None;
    }
    MediaType::from_name(subtype)
}

/// Declared subtype of a `data:image/<type>;base64,` prefix. Vendor and
/// legacy spellings (`x-ms-bmp`, `x-png`, `pjpeg`) match on their suffix.
fn data_uri_media_type(uri: &str) -> Option<MediaType> {
    if !uri.starts_with("data:image/") {
        return None;
    }
    let header = uri.split([';', ',']).next()?;
    let mime = header.strip_prefix("data:")?;
    let subtype = mime.strip_prefix("image/")?.trim().to_ascii_lowercase();
    ["jpeg", "jpg", "jfif", "png", "bmp"]
        .into_iter()
        .find(|name| subtype.ends_with(name))
        .and_then(MediaType::from_name)
}

/// Decode the payload after the first comma. Malformed base64 is rejected, never truncated.
pub fn decode_data_uri(uri: &str) -> Result<ResolvedImage, Rejection> {
    let declared = data_uri_media_type(uri).ok_or(Rejection::InvalidDataUri)?;
    let (_, payload) = uri.split_once(',').ok_or(Rejection::InvalidDataUri)?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| Rejection::InvalidBase64)?;
    let media_type = MediaType::sniff(&bytes).or(Some(declared));
    Ok(ResolvedImage {
        bytes: Bytes::from(bytes),
        media_type,
    })
}

/// Resolves sources into bytes. Holds the shared HTTP client for remote fetches.
#[derive(Clone)]
pub struct SourceResolver {
    http: Client,
}

impl SourceResolver {
    pub fn new(fetch_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(fetch_timeout).build()?;
        Ok(Self { http })
    }

    pub async fn resolve(&self, source: &ImageSource) -> Result<ResolvedImage, Rejection> {
        match source {
            ImageSource::Upload { bytes, .. } if is_supported_file_type(bytes) => {
                Ok(ResolvedImage {
                    bytes: bytes.clone(),
                    media_type: MediaType::sniff(bytes),
                })
            }
            ImageSource::Upload { .. } => Err(Rejection::InvalidFileType),
            ImageSource::RemoteUrl(url) => self.fetch(url).await,
            ImageSource::DataUri(uri) => decode_data_uri(uri),
            ImageSource::Unknown(_) => Err(Rejection::UnknownSource),
        }
    }

    /// Accepts by extension without a round trip, otherwise asks the server via HEAD
    async fn image_type_of_url(&self, url: &Url) -> Result<MediaType, Rejection> {
        if let Some(ext) = url_path_extension(url) {
            return ext.ok_or(Rejection::NotAnImage);
        }

        let response = self
            .http
            .head(url.clone())
            .send()
            .await
            .map_err(|e| Rejection::FetchFailed(e.to_string()))?;

        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(media_type_from_content_type)
            .ok_or(Rejection::NotAnImage)
    }

    async fn fetch(&self, source: &str) -> Result<ResolvedImage, Rejection> {
        if !is_valid_url(source) {
            return Err(Rejection::InvalidUrl);
        }
        let url = Url::parse(source).map_err(|_| Rejection::InvalidUrl)?;
        let declared = self.image_type_of_url(&url).await?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Rejection::FetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Rejection::FetchFailed(format!("status {}", status)));
        }

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(media_type_from_content_type);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Rejection::FetchFailed(e.to_string()))?;

        let media_type = MediaType::sniff(&bytes).or(header_type).or(Some(declared));
        log::debug!(
            "[source] Fetched {} bytes from {} ({:?})",
            bytes.len(),
            source,
            media_type
        );

        Ok(ResolvedImage { bytes, media_type })
    }
}
