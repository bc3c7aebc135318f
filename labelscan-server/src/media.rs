use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use tokio::io::AsyncWriteExt;

/// Largest payload we are willing to decode.
pub const MAX_MEDIA_BYTES: usize = 20_000_000;

/// Largest side of a stored image; anything bigger is scaled down.
const MAX_IMAGE_SIDE: u32 = 2048;

/// Largest side we will decode at all. A tiny PNG can claim enormous dimensions.
const MAX_DECODE_SIDE: u32 = 8192;

/// What kind of media is being stored. The string form is the directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
pub enum MediaKind {
    #[strum(serialize = "uploads")]
    Image,
    #[strum(serialize = "audio")]
    Audio,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Image => "webp",
            MediaKind::Audio => "mp3",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            MediaKind::Image => "image/webp",
            MediaKind::Audio => "audio/mpeg",
        }
    }

    pub fn dir_name(self) -> &'static str {
        self.into()
    }
}

/// The name of a stored file, `<uuid>.<ext>`. Only the store creates these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    fn generate(kind: MediaKind) -> Self {
        Self(format!("{}.{}", uuid::Uuid::new_v4(), kind.extension()))
    }

    /// Accept a name from a URL only if it is something the store could have produced.
    pub fn parse(kind: MediaKind, name: &str) -> Option<Self> {
        let (stem, ext) = name.split_once('.')?;
        (ext == kind.extension() && uuid::Uuid::parse_str(stem).is_ok()).then(|| Self(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("No data provided")]
    Empty,
    #[error("Payload is too large")]
    TooLarge,
    #[error("Not a readable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("WebP encoding error: {0}")]
    Encode(String),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl StorageError {
    /// Whether the caller sent something unusable, as opposed to us failing to write it.
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            StorageError::Empty | StorageError::TooLarge | StorageError::Decode(_)
        )
    }
}

/// Files on local disk, one directory per [`MediaKind`].
#[derive(Clone, Debug)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, kind: MediaKind, media_ref: &MediaRef) -> PathBuf {
        self.root.join(kind.dir_name()).join(media_ref.as_str())
    }

    /// Store a payload under a fresh name.
    ///
    /// Images are validated and re-encoded before anything touches the disk,
    /// so a rejected payload never leaves a file behind.
    pub async fn store(&self, bytes: &[u8], kind: MediaKind) -> Result<MediaRef, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        if bytes.len() > MAX_MEDIA_BYTES {
            return Err(StorageError::TooLarge);
        }
        let content = match kind {
            MediaKind::Image => {
                // Decoding and re-encoding take seconds for big photos
                let bytes = bytes.to_vec();
                tokio::task::spawn_blocking(move || encode_image(&bytes)).await??
            }
            MediaKind::Audio => bytes.to_vec(),
        };
        tokio::fs::create_dir_all(self.root.join(kind.dir_name())).await?;
        let media_ref = MediaRef::generate(kind);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_of(kind, &media_ref))
            .await?;
        file.write_all(&content).await?;
        file.flush().await?;
        tracing::info!(
            kind = kind.dir_name(),
            name = media_ref.as_str(),
            bytes = content.len(),
            "Stored media"
        );
        Ok(media_ref)
    }

    /// Read back a stored file. Unknown or malformed names are `None`.
    pub async fn open(&self, kind: MediaKind, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(media_ref) = MediaRef::parse(kind, name) else {
            return Ok(None);
        };
        match tokio::fs::read(self.path_of(kind, &media_ref)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Decode any supported image format and re-encode it as lossy webp.
fn encode_image(bytes: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut limits = image::Limits::default();
    limits.max_image_width = Some(MAX_DECODE_SIDE);
    limits.max_image_height = Some(MAX_DECODE_SIDE);
    let mut reader = image::ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(limits);
    let mut img = match reader.decode() {
        Ok(img) => img,
        Err(image::ImageError::Limits(_)) => return Err(StorageError::TooLarge),
        Err(e) => return Err(e.into()),
    };
    if img.width() > MAX_IMAGE_SIDE || img.height() > MAX_IMAGE_SIDE {
        img = img.resize(
            MAX_IMAGE_SIDE,
            MAX_IMAGE_SIDE,
            image::imageops::FilterType::Lanczos3,
        );
    }
    // The webp encoder only takes 8-bit RGB(A)
    let img = if img.color().has_alpha() {
        image::DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        image::DynamicImage::ImageRgb8(img.to_rgb8())
    };
    // image::DynamicImage doesn't offer lossy webp, but "webp" does.
    let encoded = webp::Encoder::from_image(&img)
        .map_err(|e| StorageError::Encode(e.to_string()))?
        .encode(75.0);
    Ok(encoded.to_vec())
}
