//! Conversion requests
//!
//! Turns a multipart upload into a validated [`ConversionRequest`]. Nothing
//! here touches the filesystem: a request that fails validation leaves no
//! trace on disk and never reaches the converter.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::formats::{mimetype_extension, normalize_mimetype, ExportFormat, FileName, UnsupportedFormat};

/// Name of the form field carrying the export type
pub const FORMAT_FIELD: &str = "format";

/// One validated conversion, owned by its handler
#[derive(Debug)]
pub struct ConversionRequest {
    /// Correlates log lines of one conversion
    pub id: Uuid,
    pub data: Bytes,
    /// Normalized declared MIME type
    pub mime_type: String,
    /// Upload name, with an extension derived from the MIME type if it had none
    pub file_name: FileName,
    pub format: ExportFormat,
    pub timeout: Duration,
}

/// First file part of the form
struct UploadedFile {
    data: Bytes,
    file_name: FileName,
    mime_type: String,
}

impl ConversionRequest {
    /// Read the form and validate it.
    ///
    /// Only the first file part is used; later ones are skipped. The format
    /// is checked before the file so an unsupported format wins over a
    /// missing upload.
    pub async fn from_multipart(mut multipart: Multipart, timeout: Duration) -> Result<Self> {
        let mut format: Option<String> = None;
        let mut upload: Option<UploadedFile> = None;
        let mut skipped = 0usize;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(multipart_error)?
        {
            // Only parts with a filename are uploads, whatever their content type
            if field.file_name().is_some() {
                if upload.is_some() {
                    skipped += 1;
                    continue;
                }

                let file_name = FileName::parse(field.file_name());
                let mime_type = normalize_mimetype(field.content_type());
                let data = field
                    .bytes()
                    .await
                    .map_err(multipart_error)?;

                upload = Some(UploadedFile {
                    data,
                    file_name,
                    mime_type,
                });
            } else if field.name() == Some(FORMAT_FIELD) {
                let value = field
                    .text()
                    .await
                    .map_err(multipart_error)?;
                format = Some(value);
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, "Ignoring additional uploaded files");
        }

        let format: ExportFormat = match format {
            Some(value) => value.parse()?,
            None => return Err(UnsupportedFormat("(missing)".to_string()).into()),
        };

        let UploadedFile {
            data,
            mut file_name,
            mime_type,
        } = upload.ok_or(AppError::NoFileUploaded)?;

        // The converter picks its import filter from the extension
        if !file_name.has_extension() {
            file_name.set_extension(mimetype_extension(&mime_type));
        }
        if !file_name.has_extension() {
            tracing::warn!(mime_type = %mime_type, "No extension known for upload");
        }

        Ok(Self {
            id: Uuid::new_v4(),
            data,
            mime_type,
            file_name,
            format,
            timeout,
        })
    }
}

/// Malformed forms are client errors; a form over the body limit gets its own status
fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(e.body_text())
    }
}
