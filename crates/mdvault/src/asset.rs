//! Resolution of image references embedded in documents.

use chrono::Local;
use dashmap::DashMap;
use mdvault_core::{path, FileRef, StorageError, StorageLocation};
use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::file_service::UnifiedFileService;
use crate::settings::ImagePathType;

const ASSET_ORIGIN: &str = "asset://localhost/";
const BLOB_PREFIX: &str = "blob:mdvault/";
const FILE_SCHEME: &str = "file://";

/// Where an image reference can be loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Reference used as written
    Unchanged(String),
    /// Local file served through the restricted asset scheme
    Asset(String),
    /// Bytes fetched into memory, valid until revoked
    Blob(String),
}

impl AssetSource {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unchanged(s) | Self::Asset(s) | Self::Blob(s) => s,
        }
    }
}

/// Turns document-relative references into loadable addresses and owns the
/// in-memory blobs created for remote images.
pub struct AssetResolver {
    files: UnifiedFileService,
    blobs: DashMap<String, Vec<u8>>,
}

impl AssetResolver {
    pub fn new(files: UnifiedFileService) -> Self {
        Self {
            files,
            blobs: DashMap::new(),
        }
    }

    /// Resolve `reference` as it appears in `document`.
    pub async fn resolve(
        &self,
        document: &FileRef,
        reference: &str,
    ) -> Result<AssetSource, StorageError> {
        if reference.is_empty() {
            return Ok(AssetSource::Unchanged(String::new()));
        }
        match document.storage_location {
            StorageLocation::Local => Ok(self.resolve_local(document, reference)),
            StorageLocation::Remote => self.resolve_remote(document, reference).await,
        }
    }

    fn resolve_local(&self, document: &FileRef, reference: &str) -> AssetSource {
        let mut target = reference
            .strip_prefix(FILE_SCHEME)
            .unwrap_or(reference)
            .to_string();
        if path::is_relative_path(&target) {
            let decoded = urlencoding::decode(&target)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| target.clone());
            target = path::join(&[&path::dirname(&document.path), &decoded]);
        }
        if path::is_absolute(&target) {
            return AssetSource::Asset(asset_url(&target));
        }
        AssetSource::Unchanged(reference.to_string())
    }

    async fn resolve_remote(
        &self,
        document: &FileRef,
        reference: &str,
    ) -> Result<AssetSource, StorageError> {
        let target = if path::is_relative_path(reference) && path::is_url(&document.path) {
            path::join(&[&path::dirname(&document.path), reference])
        } else {
            reference.to_string()
        };
        if !path::is_same_origin(&document.path, &target) {
            return Ok(AssetSource::Unchanged(reference.to_string()));
        }
        let handle = self.fetch(&document.with_path(target)).await?;
        Ok(AssetSource::Blob(handle))
    }

    /// Loadable address of a whole file, used to preview an image opened on
    /// its own.
    pub async fn file_source(&self, file: &FileRef) -> Result<AssetSource, StorageError> {
        match file.storage_location {
            StorageLocation::Local if path::is_absolute(&file.path) => {
                Ok(AssetSource::Asset(asset_url(&file.path)))
            }
            StorageLocation::Local => Ok(AssetSource::Unchanged(file.path.clone())),
            StorageLocation::Remote => Ok(AssetSource::Blob(self.fetch(file).await?)),
        }
    }

    async fn fetch(&self, file: &FileRef) -> Result<String, StorageError> {
        let bytes = self.files.read_file(file).await?;
        let handle = format!("{}{}", BLOB_PREFIX, Uuid::new_v4());
        debug!("Created {} ({} bytes) for {}", handle, bytes.len(), file.path);
        self.blobs.insert(handle.clone(), bytes);
        Ok(handle)
    }

    /// Bytes behind a blob handle.
    pub fn blob(&self, handle: &str) -> Option<Vec<u8>> {
        self.blobs.get(handle).map(|b| b.value().clone())
    }

    /// Free a blob. Non-blob sources are ignored.
    pub fn revoke(&self, handle: &str) -> bool {
        handle.starts_with(BLOB_PREFIX) && self.blobs.remove(handle).is_some()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Store pasted image bytes next to `document` and return the new path.
    ///
    /// Images go to the document's asset directory, named by timestamp plus
    /// a short random suffix.
    pub async fn upload_image(
        &self,
        document: &FileRef,
        data: &[u8],
        mime: &str,
    ) -> Result<String, StorageError> {
        let dir = FileRef {
            path: default_asset_dir(&document.path),
            storage_location: document.storage_location,
            is_dir: true,
        };
        if !self.files.exists(&dir).await {
            self.files.create_directory(&dir, true).await?;
        }

        let name = format!(
            "{}-{}.{}",
            Local::now().format("%Y%m%d%H%M%S"),
            random_suffix(),
            image_extension(mime)
        );
        let target = FileRef {
            path: path::join(&[&dir.path, &name]),
            storage_location: document.storage_location,
            is_dir: false,
        };
        self.files.write_file(&target, data).await?;
        info!("Stored image {} ({} bytes)", target.path, data.len());
        Ok(target.path)
    }
}

/// Text to embed for `asset` inside `document`.
///
/// Relative references fall back to the absolute address when the two live
/// in different places (different origins, or a URL and a plain path).
pub fn asset_reference(document: &str, asset: &str, path_type: ImagePathType) -> String {
    let reference = match path_type {
        ImagePathType::Absolute => asset.to_string(),
        ImagePathType::Relative => path::relative(&path::dirname(document), asset)
            .unwrap_or_else(|_| asset.to_string()),
    };
    reference.replace(' ', "%20")
}

/// `<dir>/<stem>.assets` beside the document.
pub fn default_asset_dir(document: &str) -> String {
    path::join(&[
        &path::dirname(document),
        &format!("{}.assets", path::stem(document)),
    ])
}

fn asset_url(path: &str) -> String {
    format!("{}{}", ASSET_ORIGIN, urlencoding::encode(path))
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..4)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

fn image_extension(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or_default().trim() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/avif" => "avif",
        _ => "png",
    }
}
