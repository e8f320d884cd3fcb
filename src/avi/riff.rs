//! RIFF writer primitives
//!
//! Fields are always emitted little-endian. Chunks and lists whose size is not
//! known up front are opened with a zero placeholder; the returned [`SizeSlot`]
//! remembers where the size field lives so it can be patched later without
//! disturbing the write cursor.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Seek, SeekFrom, Write};

use crate::error::{AviError, AviResult};

/// `FOURCC` + size
pub const CHUNK_HEADER_SIZE: u64 = 8;
/// `LIST`/`RIFF` + size + list type
pub const LIST_HEADER_SIZE: u64 = 12;

/// Four ASCII bytes identifying a chunk or list.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// The code read as a little-endian integer, as it appears inside header records.
    pub const fn as_u32(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({:?})", self.as_str())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod ids {
    use super::FourCC;

    pub const RIFF: FourCC = FourCC::new(b"RIFF");
    pub const LIST: FourCC = FourCC::new(b"LIST");
    pub const AVI: FourCC = FourCC::new(b"AVI ");
    pub const HDRL: FourCC = FourCC::new(b"hdrl");
    pub const AVIH: FourCC = FourCC::new(b"avih");
    pub const STRL: FourCC = FourCC::new(b"strl");
    pub const STRH: FourCC = FourCC::new(b"strh");
    pub const STRF: FourCC = FourCC::new(b"strf");
    pub const MOVI: FourCC = FourCC::new(b"movi");
    pub const IDX1: FourCC = FourCC::new(b"idx1");
    /// Compressed video frame of stream 0
    pub const FRAME: FourCC = FourCC::new(b"00dc");
    pub const VIDS: FourCC = FourCC::new(b"vids");
    pub const MJPG: FourCC = FourCC::new(b"MJPG");
}

/// File offset of a size field that still has to be patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSlot {
    offset: u64,
}

impl SizeSlot {
    pub fn at(offset: u64) -> Self {
        Self { offset }
    }

    /// Offset of the 4-byte size field itself.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// First byte counted by the size field.
    pub fn data_start(&self) -> u64 {
        self.offset + 4
    }

    /// Size value covering everything from the slot up to `end`.
    pub fn size_until(&self, end: u64) -> AviResult<u32> {
        let size = end.saturating_sub(self.data_start());
        to_u32("block", size)
    }
}

pub(crate) fn to_u32(what: &'static str, size: u64) -> AviResult<u32> {
    u32::try_from(size).map_err(|_| AviError::TooLarge { what, size })
}

/// Number of padding bytes needed after `len` data bytes.
pub fn padding_for(len: u64) -> u64 {
    len & 1
}

/// Storage that can drop bytes past a given length.
pub trait Truncate {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(|_| io::ErrorKind::InvalidInput)?;
        self.get_mut().truncate(len);
        Ok(())
    }
}

/// Streaming RIFF writer that tracks its own write cursor.
///
/// `position` is authoritative. Whenever the underlying cursor may have
/// drifted (a patch, or a write that failed halfway) the writer marks itself
/// detached and seeks back to `position` before the next sequential write.
pub struct RiffWriter<W> {
    inner: W,
    position: u64,
    detached: bool,
}

impl<W: Write + Seek> RiffWriter<W> {
    /// Wrap a writer positioned at the start of an empty file.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            position: 0,
            detached: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn reattach(&mut self) -> AviResult<()> {
        if self.detached {
            self.inner.seek(SeekFrom::Start(self.position))?;
            self.detached = false;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> AviResult<()> {
        self.reattach()?;
        if let Err(err) = self.inner.write_all(bytes) {
            self.detached = true;
            return Err(err.into());
        }
        self.position += bytes.len() as u64;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> AviResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_fourcc(&mut self, code: FourCC) -> AviResult<()> {
        self.write_bytes(code.as_bytes())
    }

    /// Chunk header with a known data size.
    pub fn write_chunk_header(&mut self, id: FourCC, size: u32) -> AviResult<()> {
        self.write_fourcc(id)?;
        self.write_u32(size)
    }

    /// Chunk header whose size is patched later.
    pub fn begin_chunk(&mut self, id: FourCC) -> AviResult<SizeSlot> {
        self.write_fourcc(id)?;
        let slot = SizeSlot::at(self.position);
        self.write_u32(0)?;
        Ok(slot)
    }

    /// `RIFF`/`LIST` header with a placeholder size followed by the nested type.
    pub fn begin_list(&mut self, kind: FourCC, list_type: FourCC) -> AviResult<SizeSlot> {
        let slot = self.begin_chunk(kind)?;
        self.write_fourcc(list_type)?;
        Ok(slot)
    }

    /// Write chunk data followed by the even-alignment pad byte when needed.
    /// Returns the number of bytes the cursor advanced.
    pub fn write_padded(&mut self, data: &[u8]) -> AviResult<u64> {
        self.write_bytes(data)?;
        let pad = padding_for(data.len() as u64);
        if pad != 0 {
            self.write_bytes(&[0u8])?;
        }
        Ok(data.len() as u64 + pad)
    }

    /// Overwrite bytes at `offset` and return to the write cursor, also when
    /// the overwrite fails.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> AviResult<()> {
        self.detached = true;
        let written = self
            .inner
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.inner.write_all(bytes));
        let restored = self.reattach();
        written?;
        restored
    }

    pub fn patch(&mut self, slot: SizeSlot, size: u32) -> AviResult<()> {
        self.write_at(slot.offset(), &size.to_le_bytes())
    }

    /// Patch `slot` so it covers everything written up to `end`.
    pub fn patch_until(&mut self, slot: SizeSlot, end: u64) -> AviResult<u32> {
        let size = slot.size_until(end)?;
        self.patch(slot, size)?;
        Ok(size)
    }

    /// Patch `slot` so it covers everything written so far.
    pub fn close(&mut self, slot: SizeSlot) -> AviResult<u32> {
        self.patch_until(slot, self.position)
    }

    /// Move the cursor back to an earlier offset, discarding a partial write.
    pub fn rewind_to(&mut self, offset: u64) -> AviResult<()> {
        self.position = offset;
        self.detached = true;
        self.reattach()
    }

    pub fn flush(&mut self) -> AviResult<()> {
        self.inner.flush()?;
        Ok(())
    }
}

impl<W: Write + Seek + Truncate> RiffWriter<W> {
    /// Drop everything past the write cursor.
    pub fn truncate(&mut self) -> AviResult<()> {
        self.inner.truncate(self.position)?;
        Ok(())
    }
}
