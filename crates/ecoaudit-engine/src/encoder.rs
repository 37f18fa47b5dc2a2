use std::borrow::Cow;
use std::fs;
use std::thread;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ecoaudit_contracts::images::{ImageSource, UploadedImage};
use ecoaudit_contracts::receipts::ImageDigest;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::error::AuditError;

/// Transport-ready form of one image. Lives only while a request is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImagePart {
    pub data: String,
    pub mime_type: String,
    pub sha256: String,
    pub byte_len: u64,
}

impl EncodedImagePart {
    pub fn to_part(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.mime_type,
                "data": self.data,
            }
        })
    }

    pub fn digest(&self) -> ImageDigest {
        ImageDigest {
            mime_type: self.mime_type.clone(),
            sha256: self.sha256.clone(),
            bytes: self.byte_len,
        }
    }
}

pub fn encode_image(image: &UploadedImage) -> Result<EncodedImagePart, AuditError> {
    let encoding_error = |reason: String| AuditError::Encoding {
        file_name: image.file_name.clone(),
        reason,
    };

    let bytes: Cow<'_, [u8]> = match &image.source {
        ImageSource::Path(path) => Cow::Owned(
            fs::read(path)
                .map_err(|err| encoding_error(format!("failed reading {}: {err}", path.display())))?,
        ),
        ImageSource::Bytes(bytes) => Cow::Borrowed(&bytes[..]),
    };
    if bytes.is_empty() {
        return Err(encoding_error("image has no content".to_string()));
    }

    let mime_type = image
        .mime_type
        .clone()
        .or_else(|| {
            image::guess_format(&bytes)
                .ok()
                .map(|format| format.to_mime_type().to_string())
        })
        .ok_or_else(|| encoding_error("unrecognized image format".to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);

    Ok(EncodedImagePart {
        data: BASE64.encode(&bytes),
        mime_type,
        sha256: hex::encode(hasher.finalize()),
        byte_len: bytes.len() as u64,
    })
}

/// Encodes every image in parallel and joins before returning. Output order
/// matches input order; the first failure in that order aborts the batch.
pub fn encode_images(
    images: &[UploadedImage],
    cancel: &CancelToken,
) -> Result<Vec<EncodedImagePart>, AuditError> {
    cancel.check()?;
    let results = if images.len() <= 1 {
        images.iter().map(encode_image).collect::<Vec<_>>()
    } else {
        thread::scope(|scope| {
            let handles = images
                .iter()
                .map(|image| (image, scope.spawn(move || encode_image(image))))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|(image, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(AuditError::Encoding {
                            file_name: image.file_name.clone(),
                            reason: "encoder thread panicked".to_string(),
                        })
                    })
                })
                .collect::<Vec<_>>()
        })
    };
    cancel.check()?;
    results.into_iter().collect()
}
