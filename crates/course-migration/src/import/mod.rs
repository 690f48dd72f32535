//! Bulk import of backup jobs from an uploaded course list.
//!
//! The list is delimited text with a header row. Each data row names a
//! source course (by id or by course URL) and a destination category and
//! becomes one `NotStarted` backup job.

pub mod columns;
pub mod importer;

pub use columns::{ColumnGroup, HeaderMap, COLUMN_GROUPS};
pub use importer::{BulkImporter, UploadResults};

use serde::{Deserialize, Serialize};

/// Field separator chosen by the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    #[default]
    Comma,
    Semicolon,
    Colon,
    Tab,
}

impl Delimiter {
    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Semicolon => b';',
            Delimiter::Colon => b':',
            Delimiter::Tab => b'\t',
        }
    }
}

/// Text encoding of the uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl Encoding {
    /// Decodes `bytes` into text. A leading UTF-8 byte order mark is dropped.
    pub fn decode(self, bytes: &[u8]) -> Result<String, std::str::Utf8Error> {
        match self {
            Encoding::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                std::str::from_utf8(bytes).map(str::to_owned)
            }
            // Every Latin-1 byte is the code point of the same value.
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_bom_is_stripped() {
        let text = Encoding::Utf8.decode(b"\xEF\xBB\xBFcourseid").unwrap();
        assert_eq!(text, "courseid");
    }

    #[test]
    fn test_latin1_decodes_high_bytes() {
        let text = Encoding::Latin1.decode(b"caf\xE9").unwrap();
        assert_eq!(text, "café");
        assert!(Encoding::Utf8.decode(b"caf\xE9").is_err());
    }

    #[test]
    fn test_delimiter_bytes() {
        assert_eq!(Delimiter::default().as_byte(), b',');
        assert_eq!(Delimiter::Tab.as_byte(), b'\t');
    }
}
