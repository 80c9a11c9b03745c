use std::fs;

use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::domain::{DestinationPath, PublishedAsset};
use crate::error::ArchiveError;

#[derive(Debug, Clone)]
pub struct ObjectUpload {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub original_filename: String,
    pub public: bool,
}

pub trait ObjectStore: Send + Sync {
    /// Writes (or overwrites) the object and returns its public URL.
    fn put(&self, upload: &ObjectUpload) -> Result<String, ArchiveError>;
    fn exists(&self, key: &str) -> Result<bool, ArchiveError>;
    fn url_for(&self, key: &str) -> String;
}

pub struct Publisher<O: ObjectStore> {
    store: O,
    key_prefix: Option<String>,
}

impl<O: ObjectStore> Publisher<O> {
    pub fn new(store: O, key_prefix: Option<String>) -> Self {
        Self { store, key_prefix }
    }

    pub fn object_key(&self, destination: &DestinationPath) -> String {
        destination.object_key(self.key_prefix.as_deref())
    }

    pub fn publish(
        &self,
        destination: &DestinationPath,
        original_filename: &str,
    ) -> Result<PublishedAsset, ArchiveError> {
        let path = destination.full();
        let bytes = fs::read(path.as_std_path())
            .map_err(|err| ArchiveError::Io(format!("read {path}: {err}")))?;
        let upload = ObjectUpload {
            key: self.object_key(destination),
            bytes,
            content_type: content_type_for(&destination.file_name),
            original_filename: ascii_header_value(original_filename),
            public: true,
        };
        let url = self.store.put(&upload)?;
        Ok(PublishedAsset {
            archive_path: path.to_string(),
            object_key: upload.key,
            url,
            uploaded_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        })
    }

    /// Reuses an object a previous run already uploaded for this destination.
    pub fn publish_if_missing(
        &self,
        destination: &DestinationPath,
        original_filename: &str,
    ) -> Result<PublishedAsset, ArchiveError> {
        let key = self.object_key(destination);
        if self.store.exists(&key)? {
            debug!(%key, "object already published");
            return Ok(PublishedAsset {
                archive_path: destination.full().to_string(),
                url: self.store.url_for(&key),
                object_key: key,
                uploaded_at: None,
            });
        }
        self.publish(destination, original_filename)
    }
}

pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn ascii_header_value(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_ascii_graphic() || ch == ' ' { ch } else { '_' })
        .collect()
}
