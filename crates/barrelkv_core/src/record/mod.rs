//! Record codec: the on-disk format of every persisted entry.
//!
//! ## Record Format
//!
//! ```text
//! | crc32 (4, LE) | kind (1) | key_len (varint) | val_len (varint) | key | value |
//! ```
//!
//! The CRC32-IEEE checksum covers every byte after itself. Lengths are
//! signed varints (zigzag, base-128), so the header is variable-length with
//! a fixed upper bound of [`MAX_HEADER_SIZE`] bytes.
//!
//! Every key written through the engine carries a leading unsigned-varint
//! sequence number ([`NON_TRANSACTION_SEQ`] today); [`split_key_seq`]
//! strips it back off before the key reaches the index.
//!
//! Location pointers are encoded as two signed varints and appear only as
//! hint-file values.

mod varint;

pub use varint::{put_uvarint, put_varint, uvarint, varint, MAX_VARINT_LEN};

use crate::error::{EngineError, EngineResult};

/// Sequence number written in front of every key. Reserved for a future
/// transaction layer; all current writes use this constant.
pub const NON_TRANSACTION_SEQ: u64 = 1;

/// Maximum encoded header size: crc (4) + kind (1) + two varint lengths.
pub const MAX_HEADER_SIZE: usize = 4 + 1 + 2 * MAX_VARINT_LEN;

/// What a record on disk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A live key-value pair.
    Normal,
    /// A tombstone marking a key as deleted.
    Deleted,
    /// A merge-completion marker.
    Finished,
}

impl RecordKind {
    /// Returns the wire byte for this kind.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Deleted => 1,
            Self::Finished => 2,
        }
    }

    /// Decodes a wire byte.
    ///
    /// # Errors
    ///
    /// Returns `CorruptHeader` for an unknown kind byte.
    pub fn from_byte(b: u8) -> EngineResult<Self> {
        match b {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Deleted),
            2 => Ok(Self::Finished),
            other => Err(EngineError::corrupt_header(format!(
                "unknown record kind {other}"
            ))),
        }
    }
}

/// The atomic unit of persistence.
///
/// Records are immutable once written. A logical key may have many records
/// on disk; the newest one is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Sequence-tagged key bytes as stored on disk.
    pub key: Vec<u8>,
    /// Value bytes (empty for tombstones).
    pub value: Vec<u8>,
    /// What this record represents.
    pub kind: RecordKind,
}

impl Record {
    /// Creates a live key-value record.
    #[must_use]
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            kind: RecordKind::Normal,
        }
    }

    /// Creates a tombstone record.
    #[must_use]
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            kind: RecordKind::Deleted,
        }
    }

    /// Returns whether this record is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.kind == RecordKind::Deleted
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    /// Checksum stored in front of the record.
    pub crc: u32,
    /// Record kind byte.
    pub kind: RecordKind,
    /// Length of the key in bytes.
    pub key_len: u32,
    /// Length of the value in bytes.
    pub value_len: u32,
}

impl RecordHeader {
    /// Returns whether every field is zero.
    ///
    /// A header read out of a zero-filled region (the unwritten tail of a
    /// memory-mapped segment that was never closed cleanly) decodes to all
    /// zeroes; it marks the end of the readable data, not a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.crc == 0 && self.key_len == 0 && self.value_len == 0
    }
}

/// The in-memory index payload: where one record starts on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// Which segment file the record is stored in.
    pub file_id: u32,
    /// Byte offset of the record within that file.
    pub offset: i64,
}

/// Encodes a record into its on-disk byte form.
///
/// Returns the encoded bytes and their total length.
#[must_use]
pub fn encode_record(record: &Record) -> (Vec<u8>, i64) {
    let mut header = [0u8; MAX_HEADER_SIZE];
    header[4] = record.kind.as_byte();

    let mut offset = 5;
    offset += put_varint(&mut header[offset..], record.key.len() as i64);
    offset += put_varint(&mut header[offset..], record.value.len() as i64);

    let size = offset + record.key.len() + record.value.len();
    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&header[..offset]);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[4..]);
    let crc = hasher.finalize();
    buf[..4].copy_from_slice(&crc.to_le_bytes());

    (buf, size as i64)
}

/// Decodes a record header from the front of `buf`.
///
/// Returns the header and its encoded length (the offset where the key
/// bytes begin).
///
/// # Errors
///
/// Returns `CorruptHeader` if the buffer is too short, a varint is
/// malformed, a length is negative, or the kind byte is unknown.
pub fn decode_header(buf: &[u8]) -> EngineResult<(RecordHeader, usize)> {
    if buf.len() <= 4 {
        return Err(EngineError::corrupt_header("record header truncated"));
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = RecordKind::from_byte(buf[4])?;

    let mut offset = 5;
    let (key_len, n) = varint(&buf[offset..])
        .ok_or_else(|| EngineError::corrupt_header("malformed key length"))?;
    offset += n;
    let (value_len, n) = varint(&buf[offset..])
        .ok_or_else(|| EngineError::corrupt_header("malformed value length"))?;
    offset += n;

    if key_len < 0 || value_len < 0 {
        return Err(EngineError::corrupt_header("negative record length"));
    }

    Ok((
        RecordHeader {
            crc,
            kind,
            key_len: key_len as u32,
            value_len: value_len as u32,
        },
        offset,
    ))
}

/// Computes the checksum of a decoded record.
///
/// `header_post_crc` must be the header bytes after the checksum field,
/// i.e. `kind ‖ key_len_varint ‖ val_len_varint`.
#[must_use]
pub fn record_crc(record: &Record, header_post_crc: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_post_crc);
    hasher.update(&record.key);
    hasher.update(&record.value);
    hasher.finalize()
}

/// Encodes a location pointer as two signed varints. Used only as the
/// value of hint-file records.
#[must_use]
pub fn encode_location(loc: &RecordLocation) -> Vec<u8> {
    let mut buf = [0u8; 2 * MAX_VARINT_LEN];
    let mut offset = put_varint(&mut buf, i64::from(loc.file_id));
    offset += put_varint(&mut buf[offset..], loc.offset);
    buf[..offset].to_vec()
}

/// Decodes a location pointer produced by [`encode_location`].
///
/// # Errors
///
/// Returns `CorruptHeader` if either varint is malformed.
pub fn decode_location(buf: &[u8]) -> EngineResult<RecordLocation> {
    let (file_id, n) =
        varint(buf).ok_or_else(|| EngineError::corrupt_header("malformed location file id"))?;
    let (offset, _) = varint(&buf[n..])
        .ok_or_else(|| EngineError::corrupt_header("malformed location offset"))?;

    Ok(RecordLocation {
        file_id: file_id as u32,
        offset,
    })
}

/// Prefixes `key` with an unsigned-varint sequence number, producing the
/// key as it is stored on disk.
#[must_use]
pub fn encode_key_with_seq(key: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = put_uvarint(&mut buf, seq);

    let mut encoded = Vec::with_capacity(n + key.len());
    encoded.extend_from_slice(&buf[..n]);
    encoded.extend_from_slice(key);
    encoded
}

/// Splits a sequence-tagged on-disk key into the real key and its
/// sequence number.
#[must_use]
pub fn split_key_seq(key: &[u8]) -> Option<(&[u8], u64)> {
    let (seq, n) = uvarint(key)?;
    Some((&key[n..], seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_record_roundtrip() {
        let record = Record::normal(b"name".to_vec(), b"barrelkv".to_vec());
        let (encoded, size) = encode_record(&record);
        assert_eq!(encoded.len() as i64, size);

        let (header, header_len) = decode_header(&encoded).unwrap();
        assert_eq!(header.kind, RecordKind::Normal);
        assert_eq!(header.key_len, 4);
        assert_eq!(header.value_len, 8);

        let key = &encoded[header_len..header_len + 4];
        let value = &encoded[header_len + 4..];
        assert_eq!(key, b"name");
        assert_eq!(value, b"barrelkv");

        let decoded = Record {
            key: key.to_vec(),
            value: value.to_vec(),
            kind: header.kind,
        };
        assert_eq!(record_crc(&decoded, &encoded[4..header_len]), header.crc);
    }

    #[test]
    fn tombstone_has_empty_value() {
        let record = Record::tombstone(b"gone".to_vec());
        assert!(record.is_tombstone());

        let (encoded, _) = encode_record(&record);
        let (header, _) = decode_header(&encoded).unwrap();
        assert_eq!(header.kind, RecordKind::Deleted);
        assert_eq!(header.value_len, 0);
    }

    #[test]
    fn crc_detects_any_flipped_byte() {
        let record = Record::normal(b"key".to_vec(), b"value".to_vec());
        let (encoded, _) = encode_record(&record);

        for i in 0..encoded.len() {
            let mut corrupted = encoded.clone();
            corrupted[i] ^= 0x01;

            let verified = decode_header(&corrupted).and_then(|(header, header_len)| {
                let key_end = header_len + header.key_len as usize;
                let value_end = key_end + header.value_len as usize;
                if value_end != corrupted.len() {
                    // A flipped length byte no longer matches the data.
                    return Err(EngineError::corrupt_header("length mismatch"));
                }
                let rec = Record {
                    key: corrupted[header_len..key_end].to_vec(),
                    value: corrupted[key_end..value_end].to_vec(),
                    kind: header.kind,
                };
                if record_crc(&rec, &corrupted[4..header_len]) != header.crc {
                    return Err(EngineError::ChecksumMismatch {
                        expected: header.crc,
                        actual: 0,
                    });
                }
                Ok(())
            });
            assert!(verified.is_err(), "flip of byte {i} went undetected");
        }
    }

    #[test]
    fn header_layout_is_stable() {
        // crc (4) | kind (1) | varint(3) | varint(5) for short lengths.
        let record = Record::normal(b"abc".to_vec(), b"hello".to_vec());
        let (encoded, size) = encode_record(&record);

        assert_eq!(size, 4 + 1 + 1 + 1 + 3 + 5);
        assert_eq!(encoded[4], 0); // Normal
        assert_eq!(encoded[5], 6); // zigzag(3)
        assert_eq!(encoded[6], 10); // zigzag(5)
    }

    #[test]
    fn empty_header_detection() {
        let zeroes = [0u8; MAX_HEADER_SIZE];
        let (header, _) = decode_header(&zeroes).unwrap();
        assert!(header.is_empty());

        let record = Record::normal(b"k".to_vec(), b"v".to_vec());
        let (encoded, _) = encode_record(&record);
        let (header, _) = decode_header(&encoded).unwrap();
        assert!(!header.is_empty());
    }

    #[test]
    fn short_buffer_is_corrupt() {
        assert!(decode_header(&[1, 2, 3]).is_err());
        assert!(decode_header(&[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        let record = Record::normal(b"k".to_vec(), b"v".to_vec());
        let (mut encoded, _) = encode_record(&record);
        encoded[4] = 9;
        assert!(decode_header(&encoded).is_err());
    }

    #[test]
    fn location_roundtrip() {
        let loc = RecordLocation {
            file_id: 7,
            offset: 123_456,
        };
        let encoded = encode_location(&loc);
        assert_eq!(decode_location(&encoded).unwrap(), loc);
    }

    #[test]
    fn location_roundtrip_extremes() {
        for loc in [
            RecordLocation {
                file_id: 0,
                offset: 0,
            },
            RecordLocation {
                file_id: u32::MAX,
                offset: i64::MAX,
            },
        ] {
            let encoded = encode_location(&loc);
            assert_eq!(decode_location(&encoded).unwrap(), loc);
        }
    }

    #[test]
    fn key_seq_roundtrip() {
        let tagged = encode_key_with_seq(b"user:1", NON_TRANSACTION_SEQ);
        assert_eq!(tagged.len(), 7);

        let (real, seq) = split_key_seq(&tagged).unwrap();
        assert_eq!(real, b"user:1");
        assert_eq!(seq, NON_TRANSACTION_SEQ);
    }

    #[test]
    fn key_seq_with_multibyte_seq() {
        let tagged = encode_key_with_seq(b"k", 300);
        let (real, seq) = split_key_seq(&tagged).unwrap();
        assert_eq!(real, b"k");
        assert_eq!(seq, 300);
    }
}
