//! Format tables
//!
//! The export types the converter can produce, the MIME type each one is
//! served with, and the lookup used to give extension-less uploads an
//! extension the converter can dispatch on.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// MIME type used when an upload declares nothing usable
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// ============================================================================
// Export Types
// ============================================================================

/// Output formats accepted by `POST /convert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Odt,
    Docx,
    Doc,
    Rtf,
    Txt,
    Html,
    Ods,
    Xlsx,
    Xls,
    Csv,
    Odp,
    Pptx,
    Ppt,
    Png,
}

impl ExportFormat {
    /// Every supported export type
    pub const ALL: [ExportFormat; 15] = [
        Self::Pdf,
        Self::Odt,
        Self::Docx,
        Self::Doc,
        Self::Rtf,
        Self::Txt,
        Self::Html,
        Self::Ods,
        Self::Xlsx,
        Self::Xls,
        Self::Csv,
        Self::Odp,
        Self::Pptx,
        Self::Ppt,
        Self::Png,
    ];

    /// File extension (also the token clients send in the `format` field)
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Odt => "odt",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Rtf => "rtf",
            Self::Txt => "txt",
            Self::Html => "html",
            Self::Ods => "ods",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
            Self::Csv => "csv",
            Self::Odp => "odp",
            Self::Pptx => "pptx",
            Self::Ppt => "ppt",
            Self::Png => "png",
        }
    }

    /// Registered MIME type of the produced document
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Odt => "application/vnd.oasis.opendocument.text",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Doc => "application/msword",
            Self::Rtf => "application/rtf",
            Self::Txt => "text/plain",
            Self::Html => "text/html",
            Self::Ods => "application/vnd.oasis.opendocument.spreadsheet",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Xls => "application/vnd.ms-excel",
            Self::Csv => "text/csv",
            Self::Odp => "application/vnd.oasis.opendocument.presentation",
            Self::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            Self::Ppt => "application/vnd.ms-powerpoint",
            Self::Png => "image/png",
        }
    }

    /// Filter argument for `soffice --convert-to`
    pub fn soffice_filter(self) -> &'static str {
        match self {
            // Plain "txt" picks the encoded-text dialog filter on some builds
            Self::Txt => "txt:Text",
            Self::Csv => "csv:Text - txt - csv (StarCalc)",
            other => other.extension(),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Returned when a `format` token is not an export type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} format is not supported")]
pub struct UnsupportedFormat(pub String);

impl FromStr for ExportFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.extension() == s)
            .ok_or_else(|| UnsupportedFormat(s.to_string()))
    }
}

// ============================================================================
// MIME Handling
// ============================================================================

/// Office types the converter recognises, with the extension it expects.
/// Consulted before the generic table so e.g. `text/plain` maps to `txt`
/// rather than whatever `mime_guess` lists first.
const PREFERRED_EXTENSIONS: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("application/msword", "doc"),
    ("application/rtf", "rtf"),
    ("text/rtf", "rtf"),
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/csv", "csv"),
    ("application/vnd.ms-excel", "xls"),
    ("application/vnd.ms-powerpoint", "ppt"),
    ("application/vnd.ms-word", "doc"),
    ("application/vnd.oasis.opendocument.text", "odt"),
    ("application/vnd.oasis.opendocument.spreadsheet", "ods"),
    ("application/vnd.oasis.opendocument.presentation", "odp"),
    ("application/vnd.oasis.opendocument.graphics", "odg"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("application/vnd.wordperfect", "wpd"),
    ("application/x-hwp", "hwp"),
    ("application/vnd.visio", "vsd"),
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/svg+xml", "svg"),
];

/// Normalize a declared MIME type: lowercase, parameters stripped
pub fn normalize_mimetype(raw: Option<&str>) -> String {
    let essence = raw
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if essence.is_empty() || !essence.contains('/') {
        DEFAULT_MIME_TYPE.to_string()
    } else {
        essence
    }
}

/// Extension for a normalized MIME type, if one is known
pub fn mimetype_extension(mime_type: &str) -> Option<&'static str> {
    PREFERRED_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, ext)| *ext)
        .or_else(|| {
            if mime_type == DEFAULT_MIME_TYPE {
                return None;
            }
            mime_guess::get_mime_extensions_str(mime_type)
                .and_then(|extensions| extensions.first().copied())
        })
}

// ============================================================================
// Upload File Names
// ============================================================================

/// Longest extension still treated as an extension
const MAX_EXTENSION_LEN: usize = 10;

/// Client-supplied file name, reduced to something safe to put on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    stem: String,
    extension: Option<String>,
}

impl FileName {
    /// Parse a client file name; directories and unsafe characters are dropped
    pub fn parse(raw: Option<&str>) -> Self {
        let base = raw
            .unwrap_or_default()
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();

        let (stem, extension) = match base.rsplit_once('.') {
            Some((stem, ext))
                if !stem.is_empty()
                    && !ext.is_empty()
                    && ext.len() <= MAX_EXTENSION_LEN
                    && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                (stem, Some(ext.to_ascii_lowercase()))
            }
            _ => (base, None),
        };

        let stem: String = stem
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
            .take(64)
            .collect();

        Self { stem, extension }
    }

    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn set_extension(&mut self, extension: Option<&str>) {
        self.extension = extension.map(|ext| ext.to_ascii_lowercase());
    }

    /// Scratch-file suffix preserving the extension, e.g. `-report.docx`
    pub fn scratch_suffix(&self) -> String {
        let mut suffix = String::new();
        if !self.stem.is_empty() {
            suffix.push('-');
            suffix.push_str(&self.stem);
        }
        if let Some(ext) = &self.extension {
            suffix.push('.');
            suffix.push_str(ext);
        }
        suffix
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_format() {
        assert_eq!("pdf".parse::<ExportFormat>(), Ok(ExportFormat::Pdf));
        assert_eq!("docx".parse::<ExportFormat>(), Ok(ExportFormat::Docx));

        let err = "PDF".parse::<ExportFormat>().unwrap_err();
        assert_eq!(err.to_string(), "PDF format is not supported");
        assert!("exe".parse::<ExportFormat>().is_err());
        assert!("".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_every_format_round_trips_its_token() {
        for format in ExportFormat::ALL {
            assert_eq!(format.extension().parse::<ExportFormat>(), Ok(format));
            assert!(format.mime_type().contains('/'));
        }
    }

    #[test]
    fn test_normalize_mimetype() {
        assert_eq!(
            normalize_mimetype(Some("Text/Plain; charset=UTF-8")),
            "text/plain"
        );
        assert_eq!(normalize_mimetype(Some("  ")), DEFAULT_MIME_TYPE);
        assert_eq!(normalize_mimetype(Some("garbage")), DEFAULT_MIME_TYPE);
        assert_eq!(normalize_mimetype(None), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_mimetype_extension_prefers_office_table() {
        assert_eq!(mimetype_extension("text/plain"), Some("txt"));
        assert_eq!(mimetype_extension("application/msword"), Some("doc"));
        assert_eq!(mimetype_extension(DEFAULT_MIME_TYPE), None);
        assert_eq!(mimetype_extension("application/x-made-up"), None);
    }

    #[test]
    fn test_mimetype_extension_falls_back_to_generic_table() {
        assert!(mimetype_extension("image/gif").is_some());
    }

    #[test]
    fn test_file_name_parse() {
        let name = FileName::parse(Some("../../etc/Quarterly Report.DOCX"));
        assert_eq!(name.extension(), Some("docx"));
        assert_eq!(name.scratch_suffix(), "-QuarterlyReport.docx");

        let bare = FileName::parse(Some("README"));
        assert!(!bare.has_extension());
        assert_eq!(bare.scratch_suffix(), "-README");

        let hidden = FileName::parse(Some(".bashrc"));
        assert!(!hidden.has_extension());

        let none = FileName::parse(None);
        assert!(!none.has_extension());
        assert_eq!(none.scratch_suffix(), "");
    }

    #[test]
    fn test_file_name_set_extension() {
        let mut name = FileName::parse(Some("upload"));
        name.set_extension(Some("TXT"));
        assert_eq!(name.scratch_suffix(), "-upload.txt");
    }
}
