//! Side index file: one 8-byte `(offset, size)` record per written frame.
//!
//! Records are appended while recording and replayed into the `idx1` chunk at
//! finalize time, so the index never has to live in memory.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{AviError, AviResult};

pub const INDEX_RECORD_SIZE: u64 = 8;

/// Location of one frame chunk inside `movi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Offset of the `00dc` header relative to the `movi` list type.
    pub offset: u32,
    /// Unpadded payload size.
    pub size: u32,
}

impl IndexRecord {
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&self.offset.to_le_bytes());
        buf[4..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; 8]) -> Self {
        Self {
            offset: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Append-only writer over the side index file.
pub struct IndexWriter<I> {
    inner: I,
    records: u32,
}

impl<I: Read + Write + Seek> IndexWriter<I> {
    pub fn new(inner: I) -> Self {
        Self { inner, records: 0 }
    }

    pub fn len(&self) -> u32 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Append one record. A failed write leaves the record count untouched and
    /// the next append overwrites the partial bytes.
    pub fn append(&mut self, record: IndexRecord) -> AviResult<()> {
        self.inner
            .seek(SeekFrom::Start(self.records as u64 * INDEX_RECORD_SIZE))?;
        self.inner.write_all(&record.to_bytes())?;
        self.records += 1;
        Ok(())
    }

    /// Stream every committed record, in write order, to `visit`.
    pub fn replay<F>(&mut self, mut visit: F) -> AviResult<()>
    where
        F: FnMut(IndexRecord) -> AviResult<()>,
    {
        self.inner.flush()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        let expected = self.records as u64 * INDEX_RECORD_SIZE;
        if end < expected {
            return Err(AviError::CorruptIndex {
                records: self.records,
                expected,
                found: end,
            });
        }

        self.inner.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; 8];
        for _ in 0..self.records {
            self.inner.read_exact(&mut buf)?;
            visit(IndexRecord::from_bytes(&buf))?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> I {
        self.inner
    }
}
