//! Minimal RIFF/AVI reader used to verify recorded containers.
//!
//! Works on an in-memory copy of the file and checks every size field against
//! the bytes actually present, so a muxer bug shows up as a parse error rather
//! than a silently wrong summary.

use super::header::{MainHeader, StreamFormat, StreamHeader};
use super::riff::{ids, padding_for, FourCC, CHUNK_HEADER_SIZE};
use crate::error::{AviError, AviResult};

/// One `idx1` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub chunk_id: FourCC,
    pub flags: u32,
    pub offset: u32,
    pub size: u32,
}

/// One chunk found inside `movi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoviChunk {
    pub id: FourCC,
    pub header_offset: u64,
    pub size: u32,
}

impl MoviChunk {
    pub fn data_offset(&self) -> u64 {
        self.header_offset + CHUNK_HEADER_SIZE
    }
}

#[derive(Debug, Clone)]
pub struct AviSummary {
    pub riff_size: u32,
    pub main: MainHeader,
    pub stream: StreamHeader,
    pub format: StreamFormat,
    /// Absolute offset of the `movi` list type, the base of `idx1` offsets
    pub movi_offset: u64,
    pub movi_size: u32,
    pub chunks: Vec<MoviChunk>,
    /// `None` when the file carries no `idx1` chunk
    pub index: Option<Vec<IndexEntry>>,
}

fn malformed(offset: u64, reason: impl Into<String>) -> AviError {
    AviError::Malformed {
        offset,
        reason: reason.into(),
    }
}

fn fourcc_at(bytes: &[u8], at: u64) -> AviResult<FourCC> {
    let at = at as usize;
    bytes
        .get(at..at + 4)
        .map(|b| FourCC([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| malformed(at as u64, "truncated FOURCC"))
}

fn u32_at(bytes: &[u8], at: u64) -> AviResult<u32> {
    let at = at as usize;
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| malformed(at as u64, "truncated size field"))
}

/// Visit every chunk between `start` and `end` as `(id, data offset, size)`.
fn walk<F>(bytes: &[u8], start: u64, end: u64, mut visit: F) -> AviResult<()>
where
    F: FnMut(FourCC, u64, u32) -> AviResult<()>,
{
    let mut pos = start;
    while pos + CHUNK_HEADER_SIZE <= end {
        let id = fourcc_at(bytes, pos)?;
        let size = u32_at(bytes, pos + 4)?;
        let data = pos + CHUNK_HEADER_SIZE;
        let data_end = data + size as u64;
        if data_end > end {
            return Err(malformed(
                pos,
                format!("{} chunk of {} bytes overruns its parent ending at {}", id, size, end),
            ));
        }
        visit(id, data, size)?;
        pos = data_end + padding_for(size as u64);
    }
    Ok(())
}

fn slice(bytes: &[u8], data: u64, size: u32) -> &[u8] {
    &bytes[data as usize..data as usize + size as usize]
}

impl AviSummary {
    pub fn parse(bytes: &[u8]) -> AviResult<Self> {
        if fourcc_at(bytes, 0)? != ids::RIFF {
            return Err(malformed(0, "missing RIFF header"));
        }
        let riff_size = u32_at(bytes, 4)?;
        if fourcc_at(bytes, 8)? != ids::AVI {
            return Err(malformed(8, "RIFF form type is not 'AVI '"));
        }
        let end = CHUNK_HEADER_SIZE + riff_size as u64;
        if end > bytes.len() as u64 {
            return Err(malformed(
                4,
                format!("RIFF size {} exceeds file length {}", riff_size, bytes.len()),
            ));
        }

        let mut main = None;
        let mut stream = None;
        let mut format = None;
        let mut movi = None;
        let mut chunks = Vec::new();
        let mut index = None;

        walk(bytes, 12, end, |id, data, size| {
            let data_end = data + size as u64;
            if id == ids::IDX1 {
                let mut entries = Vec::with_capacity(size as usize / 16);
                let mut at = data;
                while at + 16 <= data_end {
                    entries.push(IndexEntry {
                        chunk_id: fourcc_at(bytes, at)?,
                        flags: u32_at(bytes, at + 4)?,
                        offset: u32_at(bytes, at + 8)?,
                        size: u32_at(bytes, at + 12)?,
                    });
                    at += 16;
                }
                index = Some(entries);
                return Ok(());
            }
            if id != ids::LIST {
                return Ok(());
            }

            let list_type = fourcc_at(bytes, data)?;
            if list_type == ids::HDRL {
                walk(bytes, data + 4, data_end, |id, data, size| {
                    if id == ids::AVIH {
                        main = Some(MainHeader::parse(slice(bytes, data, size))?);
                    } else if id == ids::LIST && fourcc_at(bytes, data)? == ids::STRL {
                        walk(bytes, data + 4, data + size as u64, |id, data, size| {
                            if id == ids::STRH {
                                stream = Some(StreamHeader::parse(slice(bytes, data, size))?);
                            } else if id == ids::STRF {
                                format = Some(StreamFormat::parse(slice(bytes, data, size))?);
                            }
                            Ok(())
                        })?;
                    }
                    Ok(())
                })?;
            } else if list_type == ids::MOVI {
                movi = Some((data, size));
                walk(bytes, data + 4, data_end, |id, data, size| {
                    chunks.push(MoviChunk {
                        id,
                        header_offset: data - CHUNK_HEADER_SIZE,
                        size,
                    });
                    Ok(())
                })?;
            }
            Ok(())
        })?;

        let (movi_offset, movi_size) = movi.ok_or_else(|| malformed(12, "no movi list"))?;
        Ok(Self {
            riff_size,
            main: main.ok_or_else(|| malformed(12, "no avih chunk"))?,
            stream: stream.ok_or_else(|| malformed(12, "no strh chunk"))?,
            format: format.ok_or_else(|| malformed(12, "no strf chunk"))?,
            movi_offset,
            movi_size,
            chunks,
            index,
        })
    }

    /// Payload an `idx1` entry points at.
    pub fn payload<'a>(&self, bytes: &'a [u8], entry: &IndexEntry) -> AviResult<&'a [u8]> {
        let header = self.movi_offset + entry.offset as u64;
        if fourcc_at(bytes, header)? != entry.chunk_id {
            return Err(malformed(header, "index entry does not point at its chunk id"));
        }
        if u32_at(bytes, header + 4)? != entry.size {
            return Err(malformed(header, "index entry size differs from chunk size"));
        }
        let start = (header + CHUNK_HEADER_SIZE) as usize;
        bytes
            .get(start..start + entry.size as usize)
            .ok_or_else(|| malformed(header, "index entry points past end of file"))
    }

    /// Every payload referenced by `idx1`, in index order.
    pub fn indexed_payloads<'a>(&self, bytes: &'a [u8]) -> AviResult<Vec<&'a [u8]>> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| malformed(0, "no idx1 chunk"))?;
        index.iter().map(|entry| self.payload(bytes, entry)).collect()
    }

    /// Frame chunks (`00dc`) found by walking `movi`.
    pub fn frame_chunks(&self) -> impl Iterator<Item = &MoviChunk> {
        self.chunks.iter().filter(|chunk| chunk.id == ids::FRAME)
    }

    pub fn fps(&self) -> f64 {
        self.stream.fps()
    }
}
