//! Multipart upload validation.
//!
//! Reads a `multipart/form-data` body into one [`UploadedAsset`] plus the
//! text fields that carry operation parameters. The file's declared
//! content-type is checked against the allow-list before any of its bytes
//! are buffered, and the size ceiling is enforced chunk by chunk.

use std::collections::HashMap;

use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};

use crate::error::{ServiceError, UploadError};
use crate::transform::ALLOWED_MIME_TYPES;

/// Default upload ceiling (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Field name the image must be uploaded under.
pub const FILE_FIELD: &str = "image";

/// Cap on each non-file field.
pub const MAX_TEXT_FIELD: usize = 4 * 1024;

/// Upload limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    /// Largest accepted file, inclusive.
    pub max_file_size: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// A validated upload, held in memory for the length of one request.
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub bytes: Bytes,
    pub declared_mime_type: String,
    pub size_bytes: usize,
}

/// A parsed form: the file and its text fields.
#[derive(Debug, Clone)]
pub struct UploadForm {
    pub asset: UploadedAsset,
    pub fields: HashMap<String, String>,
}

/// Read and validate the whole multipart body.
pub async fn read_upload(
    mut multipart: Multipart,
    limits: &UploadLimits,
) -> Result<UploadForm, ServiceError> {
    let mut asset: Option<UploadedAsset> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let is_file = field.file_name().is_some() || name == FILE_FIELD;

        if is_file {
            if name != FILE_FIELD {
                return Err(UploadError::UnexpectedFileField {
                    field: name,
                    expected: FILE_FIELD,
                }
                .into());
            }
            if asset.is_some() {
                return Err(UploadError::TooManyFiles.into());
            }
            asset = Some(read_file(field, limits).await?);
        } else {
            let value = read_text(field, &name, limits).await?;
            fields.insert(name, value);
        }
    }

    let asset = asset.ok_or(UploadError::NoFile { field: FILE_FIELD })?;
    Ok(UploadForm { asset, fields })
}

/// Lowercased MIME type without parameters.
pub fn normalize_mime(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

async fn read_file(
    mut field: Field<'_>,
    limits: &UploadLimits,
) -> Result<UploadedAsset, ServiceError> {
    let mime = normalize_mime(field.content_type().unwrap_or("application/octet-stream"));
    if !is_allowed_mime(&mime) {
        return Err(UploadError::InvalidFileType { mime_type: mime }.into());
    }

    let mut buffer = BytesMut::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, limits))?
    {
        if buffer.len() + chunk.len() > limits.max_file_size {
            return Err(UploadError::FileTooLarge {
                limit: limits.max_file_size,
            }
            .into());
        }
        buffer.extend_from_slice(&chunk);
    }

    let bytes = buffer.freeze();
    Ok(UploadedAsset {
        size_bytes: bytes.len(),
        bytes,
        declared_mime_type: mime,
    })
}

async fn read_text(
    mut field: Field<'_>,
    name: &str,
    limits: &UploadLimits,
) -> Result<String, ServiceError> {
    let mut buffer = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, limits))?
    {
        if buffer.len() + chunk.len() > MAX_TEXT_FIELD {
            return Err(UploadError::FieldTooLong {
                field: name.to_string(),
                limit: MAX_TEXT_FIELD,
            }
            .into());
        }
        buffer.extend_from_slice(&chunk);
    }

    String::from_utf8(buffer).map_err(|_| {
        UploadError::Malformed {
            message: format!("field '{}' is not valid UTF-8", name),
        }
        .into()
    })
}

/// A stream error means either the body limit tripped or the framing is bad.
fn multipart_error(err: MultipartError, limits: &UploadLimits) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::FileTooLarge {
            limit: limits.max_file_size,
        }
        .into()
    } else {
        UploadError::Malformed {
            message: err.body_text(),
        }
        .into()
    }
}
