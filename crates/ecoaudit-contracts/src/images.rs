use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Most images one audit may carry. Extra additions are truncated.
pub const MAX_IMAGES: usize = 3;

/// Session-unique handle assigned at insertion. Independent of the file
/// name, so two uploads named `photo.jpg` stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(u64);

impl ImageId {
    pub fn get(self) -> u64 {
        self.0
    }

    /// Accepts `3` or `#3`.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim()
            .trim_start_matches('#')
            .parse::<u64>()
            .ok()
            .map(ImageId)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// An image picked by the user but not yet in the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub source: ImageSource,
}

impl NewImage {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            file_name,
            mime_type: mime_for_path(&path).map(str::to_string),
            source: ImageSource::Path(path),
        }
    }

    pub fn from_bytes(
        file_name: impl Into<String>,
        mime_type: Option<&str>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| mime_for_path(Path::new(&file_name)).map(str::to_string));
        Self {
            file_name,
            mime_type,
            source: ImageSource::Bytes(bytes.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub id: ImageId,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub source: ImageSource,
}

impl UploadedImage {
    /// Display-only reference for the presentation layer.
    pub fn preview(&self) -> String {
        match &self.source {
            ImageSource::Path(path) => path.to_string_lossy().to_string(),
            ImageSource::Bytes(bytes) => format!("{} ({} bytes in memory)", self.file_name, bytes.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddOutcome {
    pub added: Vec<ImageId>,
    pub dropped: usize,
}

impl AddOutcome {
    pub fn notice(&self) -> Option<String> {
        if self.dropped == 0 {
            return None;
        }
        let noun = if self.dropped == 1 { "image" } else { "images" };
        Some(format!(
            "Only {MAX_IMAGES} images can be audited at once; {} extra {noun} ignored.",
            self.dropped
        ))
    }
}

/// Ordered, capped image collection.
#[derive(Debug, Clone, Default)]
pub struct ImageSet {
    images: Vec<UploadedImage>,
    next_id: u64,
}

impl ImageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends in order until the cap is hit; the rest are dropped, not
    /// rejected.
    pub fn add(&mut self, batch: impl IntoIterator<Item = NewImage>) -> AddOutcome {
        let mut outcome = AddOutcome::default();
        for image in batch {
            if self.images.len() >= MAX_IMAGES {
                outcome.dropped += 1;
                continue;
            }
            self.next_id += 1;
            let id = ImageId(self.next_id);
            self.images.push(UploadedImage {
                id,
                file_name: image.file_name,
                mime_type: image.mime_type,
                source: image.source,
            });
            outcome.added.push(id);
        }
        outcome
    }

    /// Returns whether anything was removed. Unknown ids are a no-op.
    pub fn remove(&mut self, id: ImageId) -> bool {
        let before = self.images.len();
        self.images.retain(|image| image.id != id);
        self.images.len() != before
    }

    /// Empties the collection. Ids keep counting up so stale handles from
    /// before the clear never match a new image.
    pub fn clear(&mut self) {
        self.images.clear();
    }

    pub fn get(&self, id: ImageId) -> Option<&UploadedImage> {
        self.images.iter().find(|image| image.id == id)
    }

    pub fn as_slice(&self) -> &[UploadedImage] {
        &self.images
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadedImage> {
        self.images.iter()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn remaining(&self) -> usize {
        MAX_IMAGES.saturating_sub(self.images.len())
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}
