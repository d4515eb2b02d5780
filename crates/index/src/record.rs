//! Forward records and the storage level that gates their fields.
//!
//! Wire layout (little endian):
//!
//! ```text
//! u8   version
//! u8   flags         bit0 fingerprint, bit1 exact_part, bit2 document, bit3 data
//! [fingerprint]      u32 count, count * u32
//! [exact_part]       u32 len, utf-8 bytes
//! [document]         u32 len, utf-8 bytes
//! [data]             u32 len, bytes
//! ```
//!
//! Only present fields are written. A record with no flags is a presence
//! marker.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DocumentId;

/// Bump this value whenever the record layout changes.
pub const RECORD_VERSION: u8 = 1;

const FLAG_FINGERPRINT: u8 = 0b0001;
const FLAG_EXACT_PART: u8 = 0b0010;
const FLAG_DOCUMENT: u8 = 0b0100;
const FLAG_DATA: u8 = 0b1000;
const KNOWN_FLAGS: u8 = FLAG_FINGERPRINT | FLAG_EXACT_PART | FLAG_DOCUMENT | FLAG_DATA;

/// How much of each document is persisted.
///
/// Levels are cumulative: every level keeps everything the previous one
/// keeps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StorageLevel {
    /// Only the bucket links and an empty presence record.
    #[default]
    Minimal,
    /// Adds the signature and exact part, enabling ranking and removal.
    Fingerprint,
    /// Adds the document text.
    Document,
    /// Adds the opaque data payload.
    Full,
}

impl StorageLevel {
    pub const ALL: [StorageLevel; 4] = [
        StorageLevel::Minimal,
        StorageLevel::Fingerprint,
        StorageLevel::Document,
        StorageLevel::Full,
    ];

    /// Stable identifier persisted in store settings.
    pub fn id(self) -> &'static str {
        match self {
            StorageLevel::Minimal => "minimal",
            StorageLevel::Fingerprint => "fingerprint",
            StorageLevel::Document => "document",
            StorageLevel::Full => "full",
        }
    }

    pub fn keeps_fingerprint(self) -> bool {
        self >= StorageLevel::Fingerprint
    }

    pub fn keeps_document(self) -> bool {
        self >= StorageLevel::Document
    }

    pub fn keeps_data(self) -> bool {
        self >= StorageLevel::Full
    }

    fn allowed_flags(self) -> u8 {
        match self {
            StorageLevel::Minimal => 0,
            StorageLevel::Fingerprint => FLAG_FINGERPRINT | FLAG_EXACT_PART,
            StorageLevel::Document => FLAG_FINGERPRINT | FLAG_EXACT_PART | FLAG_DOCUMENT,
            StorageLevel::Full => KNOWN_FLAGS,
        }
    }
}

impl fmt::Display for StorageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for StorageLevel {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageLevel::ALL
            .into_iter()
            .find(|level| level.id() == s)
            .ok_or_else(|| RecordError::UnknownLevel(s.to_string()))
    }
}

/// Errors raised while building, encoding or decoding a [`StoredDocument`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown record flags {0:#04x}")]
    UnknownFlags(u8),
    #[error("record carries {field}, which storage level '{level}' does not keep")]
    FieldAboveLevel {
        field: &'static str,
        level: StorageLevel,
    },
    #[error("record truncated while reading {0}")]
    Truncated(&'static str),
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
    #[error("{0} is longer than a record can hold")]
    TooLarge(&'static str),
    #[error("{0} is not valid utf-8")]
    InvalidUtf8(&'static str),
    #[error("unknown storage level '{0}'")]
    UnknownLevel(String),
    #[error("record has no fingerprint")]
    MissingFingerprint,
}

/// The forward record of one document.
///
/// Build with the `with_*` methods, then call [`StoredDocument::at_level`]
/// to drop everything the level does not keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    id: DocumentId,
    fingerprint: Option<Vec<u32>>,
    exact_part: Option<String>,
    document: Option<String>,
    data: Option<Vec<u8>>,
}

impl StoredDocument {
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            fingerprint: None,
            exact_part: None,
            document: None,
            data: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Vec<u32>) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_exact_part(mut self, exact_part: Option<String>) -> Self {
        self.exact_part = exact_part;
        self
    }

    pub fn with_document(mut self, document: String) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_data(mut self, data: Option<Vec<u8>>) -> Self {
        self.data = data;
        self
    }

    /// Drop every field `level` does not keep.
    pub fn at_level(mut self, level: StorageLevel) -> Self {
        if !level.keeps_fingerprint() {
            self.fingerprint = None;
            self.exact_part = None;
        }
        if !level.keeps_document() {
            self.document = None;
        }
        if !level.keeps_data() {
            self.data = None;
        }
        self
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn fingerprint(&self) -> Option<&[u32]> {
        self.fingerprint.as_deref()
    }

    pub fn exact_part(&self) -> Option<&str> {
        self.exact_part.as_deref()
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// The fingerprint, or [`RecordError::MissingFingerprint`].
    pub fn require_fingerprint(&self) -> Result<&[u32], RecordError> {
        self.fingerprint().ok_or(RecordError::MissingFingerprint)
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.fingerprint.is_some() {
            flags |= FLAG_FINGERPRINT;
        }
        if self.exact_part.is_some() {
            flags |= FLAG_EXACT_PART;
        }
        if self.document.is_some() {
            flags |= FLAG_DOCUMENT;
        }
        if self.data.is_some() {
            flags |= FLAG_DATA;
        }
        flags
    }

    /// Serialize for a store configured with `level`.
    ///
    /// Fails if the record holds a field above `level`; build it through
    /// [`StoredDocument::at_level`] first.
    pub fn encode(&self, level: StorageLevel) -> Result<Bytes, RecordError> {
        let flags = self.flags();
        check_level(flags, level)?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(RECORD_VERSION);
        buf.put_u8(flags);
        if let Some(fp) = &self.fingerprint {
            buf.put_u32_le(len_u32(fp.len(), "fingerprint")?);
            for &v in fp {
                buf.put_u32_le(v);
            }
        }
        if let Some(exact) = &self.exact_part {
            put_blob(&mut buf, exact.as_bytes(), "exact_part")?;
        }
        if let Some(doc) = &self.document {
            put_blob(&mut buf, doc.as_bytes(), "document")?;
        }
        if let Some(data) = &self.data {
            put_blob(&mut buf, data, "data")?;
        }
        Ok(buf.freeze())
    }

    /// Parse a record stored under `id` by a store configured with `level`.
    pub fn decode(id: DocumentId, bytes: &[u8], level: StorageLevel) -> Result<Self, RecordError> {
        let mut buf = bytes;
        if buf.remaining() < 2 {
            return Err(RecordError::Truncated("header"));
        }
        let version = buf.get_u8();
        if version != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }
        let flags = buf.get_u8();
        if flags & !KNOWN_FLAGS != 0 {
            return Err(RecordError::UnknownFlags(flags));
        }
        check_level(flags, level)?;

        let mut doc = StoredDocument::new(id);
        if flags & FLAG_FINGERPRINT != 0 {
            let count = get_u32(&mut buf, "fingerprint")? as usize;
            if buf.remaining() / 4 < count {
                return Err(RecordError::Truncated("fingerprint"));
            }
            let mut fp = Vec::with_capacity(count);
            for _ in 0..count {
                fp.push(buf.get_u32_le());
            }
            doc.fingerprint = Some(fp);
        }
        if flags & FLAG_EXACT_PART != 0 {
            doc.exact_part = Some(get_string(&mut buf, "exact_part")?);
        }
        if flags & FLAG_DOCUMENT != 0 {
            doc.document = Some(get_string(&mut buf, "document")?);
        }
        if flags & FLAG_DATA != 0 {
            doc.data = Some(get_blob(&mut buf, "data")?.to_vec());
        }
        if buf.has_remaining() {
            return Err(RecordError::TrailingBytes(buf.remaining()));
        }
        Ok(doc)
    }

    fn encoded_len(&self) -> usize {
        2 + self.fingerprint.as_ref().map_or(0, |fp| 4 + 4 * fp.len())
            + self.exact_part.as_ref().map_or(0, |s| 4 + s.len())
            + self.document.as_ref().map_or(0, |s| 4 + s.len())
            + self.data.as_ref().map_or(0, |d| 4 + d.len())
    }
}

fn check_level(flags: u8, level: StorageLevel) -> Result<(), RecordError> {
    let above = flags & !level.allowed_flags();
    if above == 0 {
        return Ok(());
    }
    let field = if above & FLAG_FINGERPRINT != 0 {
        "fingerprint"
    } else if above & FLAG_EXACT_PART != 0 {
        "exact_part"
    } else if above & FLAG_DOCUMENT != 0 {
        "document"
    } else {
        "data"
    };
    Err(RecordError::FieldAboveLevel { field, level })
}

fn len_u32(len: usize, field: &'static str) -> Result<u32, RecordError> {
    u32::try_from(len).map_err(|_| RecordError::TooLarge(field))
}

fn put_blob(buf: &mut BytesMut, bytes: &[u8], field: &'static str) -> Result<(), RecordError> {
    buf.put_u32_le(len_u32(bytes.len(), field)?);
    buf.put_slice(bytes);
    Ok(())
}

fn get_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, RecordError> {
    if buf.remaining() < 4 {
        return Err(RecordError::Truncated(field));
    }
    Ok(buf.get_u32_le())
}

fn get_blob<'a>(buf: &mut &'a [u8], field: &'static str) -> Result<&'a [u8], RecordError> {
    let len = get_u32(buf, field)? as usize;
    if buf.len() < len {
        return Err(RecordError::Truncated(field));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn get_string(buf: &mut &[u8], field: &'static str) -> Result<String, RecordError> {
    let bytes = get_blob(buf, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| RecordError::InvalidUtf8(field))
}
