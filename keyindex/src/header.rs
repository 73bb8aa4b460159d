//! File header stored in page 0.
//!
//! Only the first eight bytes are meaningful; the rest of the page is zero.

use crate::page::{MAX_KEY_SIZE, PAGE_SIZE};

/// Magic number identifying an index file: "KIDX".
pub const MAGIC: i32 = 0x4B49_4458;

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const KEY_SIZE: usize = 4;
}

/// Decoded contents of the header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Width of every key in bytes.
    pub key_size: usize,
}

impl Header {
    /// Number of header bytes that carry data.
    pub const SIZE: usize = 8;

    /// Create a header for a new file, validating the key size.
    pub fn new(key_size: usize) -> Result<Self, FormatError> {
        if key_size == 0 || key_size > MAX_KEY_SIZE {
            return Err(FormatError::InvalidKeySize(
                i64::try_from(key_size).unwrap_or(i64::MAX),
            ));
        }
        Ok(Self { key_size })
    }

    /// Serialize the header into a full, zero-filled page.
    #[must_use]
    pub fn to_page(self) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[offsets::MAGIC..offsets::MAGIC + 4].copy_from_slice(&MAGIC.to_be_bytes());
        // key_size <= MAX_KEY_SIZE, which fits in i32
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let key_size = self.key_size as i32;
        page[offsets::KEY_SIZE..offsets::KEY_SIZE + 4].copy_from_slice(&key_size.to_be_bytes());
        page
    }

    /// Parse and validate the leading bytes of page 0.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, FormatError> {
        let magic = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC {
            return Err(FormatError::BadMagic { found: magic });
        }

        let raw = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let key_size = usize::try_from(raw).map_err(|_| FormatError::InvalidKeySize(raw.into()))?;
        Self::new(key_size)
    }
}

/// Errors found while validating the structure of an index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Page 0 does not start with the index magic number.
    BadMagic { found: i32 },
    /// Stored or requested key size leaves no room for a usable page.
    InvalidKeySize(i64),
    /// File length is not a whole number of pages, or has no root page.
    Truncated { len: u64 },
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadMagic { found } => write!(
                f,
                "not an index file: magic 0x{found:08x} (expected 0x{MAGIC:08x})"
            ),
            Self::InvalidKeySize(size) => {
                write!(f, "invalid key size {size} (must be 1..={MAX_KEY_SIZE})")
            }
            Self::Truncated { len } => {
                write!(f, "file length {len} is not a valid index file length")
            }
        }
    }
}

impl std::error::Error for FormatError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn leading_bytes(page: &[u8]) -> [u8; Header::SIZE] {
        let mut bytes = [0u8; Header::SIZE];
        bytes.copy_from_slice(&page[..Header::SIZE]);
        bytes
    }

    #[test]
    fn test_header_layout() {
        let page = Header::new(4).expect("valid key size").to_page();
        assert_eq!(page.len(), PAGE_SIZE);
        assert_eq!(&page[..8], &[0x4B, 0x49, 0x44, 0x58, 0, 0, 0, 4]);
        assert!(page[8..].iter().all(|&b| b == 0));

        let restored = Header::from_bytes(leading_bytes(&page)).expect("should parse");
        assert_eq!(restored.key_size, 4);
    }

    #[test]
    fn test_bad_magic() {
        let result = Header::from_bytes(*b"SQLite f");
        assert!(matches!(result, Err(FormatError::BadMagic { .. })));
    }

    #[test]
    fn test_invalid_key_sizes() {
        assert_eq!(Header::new(0), Err(FormatError::InvalidKeySize(0)));
        assert!(Header::new(MAX_KEY_SIZE).is_ok());
        assert!(Header::new(MAX_KEY_SIZE + 1).is_err());

        let mut bytes = leading_bytes(&Header::new(4).expect("valid").to_page());
        bytes[4..8].copy_from_slice(&(-1i32).to_be_bytes());
        assert_eq!(
            Header::from_bytes(bytes),
            Err(FormatError::InvalidKeySize(-1))
        );
    }

    #[test]
    fn test_format_error_display() {
        let error = FormatError::BadMagic { found: 0 };
        assert_eq!(
            error.to_string(),
            "not an index file: magic 0x00000000 (expected 0x4b494458)"
        );
    }
}
