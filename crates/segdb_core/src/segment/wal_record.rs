//! Record framing for the writable segment's write-ahead log.
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! - `Insert` payload: the row as CBOR
//! - `Delete` payload: logical id, u64 little endian
//!
//! The CRC covers everything before it.

use crate::error::{from_cbor, to_cbor, CoreError, CoreResult};
use crate::schema::{Row, Value};

/// Magic bytes opening every record.
pub const WAL_MAGIC: [u8; 4] = *b"SGWL";

/// Current record format version.
pub const WAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type byte of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// A row appended to the segment.
    Insert = 1,
    /// A row marked deleted.
    Delete = 2,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Insert),
            2 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One logged mutation of a writable segment.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    /// Row appended; its logical id is its position among inserts.
    Insert {
        /// The row.
        row: Row,
    },
    /// Row soft-deleted.
    Delete {
        /// Logical id of the row.
        logical_id: u64,
    },
}

impl WalRecord {
    /// Record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Insert { .. } => WalRecordType::Insert,
            Self::Delete { .. } => WalRecordType::Delete,
        }
    }

    /// Encodes the full framed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be encoded or the payload
    /// exceeds the 4-byte length field.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        match self {
            Self::Insert { row } => encode_insert(row),
            Self::Delete { logical_id } => {
                frame(WalRecordType::Delete, &logical_id.to_le_bytes())
            }
        }
    }

    /// Decodes the record starting at `bytes[0]`.
    ///
    /// Returns the record and its framed length, or `Ok(None)` if `bytes`
    /// ends before the record does (a torn tail).
    ///
    /// # Errors
    ///
    /// - [`CoreError::WalCorruption`] for bad magic, an unsupported
    ///   version, an unknown type, or an undecodable payload
    /// - [`CoreError::ChecksumMismatch`] if the CRC does not match
    pub fn decode(bytes: &[u8]) -> CoreResult<Option<(Self, usize)>> {
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }
        if bytes[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption("invalid magic bytes"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported record version {version}"
            )));
        }
        let record_type = WalRecordType::from_byte(bytes[6]).ok_or_else(|| {
            CoreError::wal_corruption(format!("unknown record type {}", bytes[6]))
        })?;
        let len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if bytes.len() < total {
            return Ok(None);
        }
        let body_end = HEADER_SIZE + len;
        let expected = compute_crc32(&bytes[..body_end]);
        let actual = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let payload = &bytes[HEADER_SIZE..body_end];
        let record = match record_type {
            WalRecordType::Insert => Self::Insert {
                row: from_cbor(payload)
                    .map_err(|e| CoreError::wal_corruption(format!("bad insert payload: {e}")))?,
            },
            WalRecordType::Delete => {
                let id: [u8; 8] = payload.try_into().map_err(|_| {
                    CoreError::wal_corruption(format!(
                        "delete payload is {} bytes, expected 8",
                        payload.len()
                    ))
                })?;
                Self::Delete {
                    logical_id: u64::from_le_bytes(id),
                }
            }
        };
        Ok(Some((record, total)))
    }
}

/// Frames an insert of `row` without taking ownership of it.
pub(crate) fn encode_insert(row: &[Value]) -> CoreResult<Vec<u8>> {
    frame(WalRecordType::Insert, &to_cbor(&row)?)
}

fn frame(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&WAL_MAGIC);
    data.extend_from_slice(&WAL_VERSION.to_le_bytes());
    data.push(record_type.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// CRC-32 (IEEE polynomial) of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
