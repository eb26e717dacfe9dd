//! Artifact publishing: names censored images and writes them to GCS or a
//! local directory, returning a public URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use google_cloud_storage::client::Storage;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use std::path::{Path, PathBuf};

use crate::services::error::ModerationError;

/// How the published object is named. Uploads keep their original filename,
/// URL and data URI sources only carry the sniffed extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingHint {
    Filename(String),
    Extension,
}

/// Everything but RFC 3986 unreserved characters is escaped in URLs
const OBJECT_NAME_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, OBJECT_NAME_SET).to_string()
}

/// 128 random bits, URL-safe
fn random_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Unique object name: a random token, then the original filename or the extension
pub fn object_name(hint: &NamingHint, suffix: &str) -> String {
    let token = random_token();
    match hint {
        NamingHint::Filename(name) => {
            // Only the final path component, never a directory
            let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
            if base.is_empty() {
                format!("{}.{}", token, suffix)
            } else {
                format!("{}-{}", token, base)
            }
        }
        NamingHint::Extension => format!("{}.{}", token, suffix),
    }
}

/// `https://<host>/<bucket>/<name>`
fn gcs_public_url(public_host: &str, bucket: &str, name: &str) -> String {
    format!("https://{}/{}/{}", public_host, bucket, name)
}

/// Where artifacts are written
pub enum ArtifactStore {
    Gcs {
        client: Storage,
        bucket: String,
        public_host: String,
    },
    Local {
        root: PathBuf,
        public_base: String,
    },
}

impl ArtifactStore {
    fn public_url(&self, name: &str) -> String {
        let name = percent_encode(name);
        let name = name.as_str();
        match self {
            ArtifactStore::Gcs {
                bucket, public_host, ..
            } => gcs_public_url(public_host, bucket, name),
            ArtifactStore::Local { public_base, .. } => {
                format!("{}/{}", public_base.trim_end_matches('/'), name)
            }
        }
    }

    async fn put(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match self {
            ArtifactStore::Gcs { client, bucket, .. } => {
                let bucket = format!("projects/_/buckets/{}", bucket);
                client
                    .write_object(&bucket, name, data)
                    .set_content_type(content_type)
                    .send_buffered()
                    .await?;
            }
            ArtifactStore::Local { root, .. } => {
                let full_path = root.join(name);
                if let Some(parent) = full_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&full_path, &data).await?;
            }
        }
        Ok(())
    }

    /// Local root directory, if this store writes to disk
    pub fn local_root(&self) -> Option<&Path> {
        match self {
            ArtifactStore::Local { root, .. } => Some(root),
            ArtifactStore::Gcs { .. } => None,
        }
    }
}

pub struct Publisher {
    store: ArtifactStore,
}

impl Publisher {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Store `data` as `image/<suffix>` and return its public URL.
    /// A storage failure is returned as `PublishFailed`, never as an empty URL.
    pub async fn publish(
        &self,
        data: Vec<u8>,
        suffix: &str,
        hint: &NamingHint,
    ) -> Result<String, ModerationError> {
        let name = object_name(hint, suffix);
        let content_type = format!("image/{}", suffix);

        self.store
            .put(&name, Bytes::from(data), &content_type)
            .await
            .map_err(|e| ModerationError::PublishFailed(e.to_string()))?;

        log::info!("[publish] Stored {} as {}", name, content_type);
        Ok(self.store.public_url(&name))
    }
}
