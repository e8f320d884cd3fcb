//! Streaming MJPEG AVI muxer
//!
//! The container is valid on disk after every call: the skeleton is written
//! with patched sizes, and each appended frame re-patches the `RIFF` and
//! `movi` sizes. Frame locations go to a side index file which is folded into
//! an `idx1` chunk by [`AviMuxer::finalize`].

use std::io::{Read, Seek, Write};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::header::{MainHeader, StreamFormat, StreamHeader};
use super::index::{IndexRecord, IndexWriter};
use super::riff::{ids, padding_for, to_u32, RiffWriter, SizeSlot, Truncate, CHUNK_HEADER_SIZE};
use crate::error::{AviError, AviResult};

/// Video parameters fixed when the container is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxerConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    /// Skeleton written, no frames yet
    HeaderWritten,
    /// At least one frame appended
    Appending,
}

/// Where an appended frame landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    pub record: IndexRecord,
    /// Absolute file offset of the payload
    pub data_offset: u64,
    /// Write cursor after the frame and its padding
    pub cursor: u64,
}

/// Summary of a finalized container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub frames: u32,
    pub max_frame_bytes: u32,
    pub riff_size: u32,
    pub movi_size: u32,
    pub idx1_size: u32,
    pub file_size: u64,
}

pub struct AviMuxer<F, I> {
    writer: RiffWriter<F>,
    index: IndexWriter<I>,
    config: MuxerConfig,
    main: MainHeader,
    stream: StreamHeader,
    main_header_at: u64,
    stream_header_at: u64,
    riff: SizeSlot,
    movi: SizeSlot,
    max_frame_bytes: u32,
    state: MuxState,
}

impl<F, I> AviMuxer<F, I>
where
    F: Write + Seek + Truncate,
    I: Read + Write + Seek,
{
    /// Write the container skeleton into an empty `file`.
    #[instrument(skip_all, fields(width = config.width, height = config.height, fps = config.fps))]
    pub fn create(file: F, index: I, config: MuxerConfig) -> AviResult<Self> {
        let mut writer = RiffWriter::new(file);
        let main = MainHeader::new(config.width, config.height, config.fps);
        let stream = StreamHeader::new(config.fps);
        let format = StreamFormat::new(config.width, config.height);

        let riff = writer.begin_list(ids::RIFF, ids::AVI)?;
        let hdrl = writer.begin_list(ids::LIST, ids::HDRL)?;

        writer.write_chunk_header(ids::AVIH, MainHeader::SIZE as u32)?;
        let main_header_at = writer.position();
        writer.write_bytes(&main.to_bytes())?;

        let strl = writer.begin_list(ids::LIST, ids::STRL)?;
        writer.write_chunk_header(ids::STRH, StreamHeader::SIZE as u32)?;
        let stream_header_at = writer.position();
        writer.write_bytes(&stream.to_bytes())?;
        writer.write_chunk_header(ids::STRF, StreamFormat::SIZE as u32)?;
        writer.write_bytes(&format.to_bytes())?;
        writer.close(strl)?;
        writer.close(hdrl)?;

        let movi = writer.begin_list(ids::LIST, ids::MOVI)?;

        // Empty but playable from here on
        writer.close(movi)?;
        writer.close(riff)?;
        writer.flush()?;

        debug!("AVI skeleton written, frame data starts at {}", writer.position());

        Ok(Self {
            writer,
            index: IndexWriter::new(index),
            config,
            main,
            stream,
            main_header_at,
            stream_header_at,
            riff,
            movi,
            max_frame_bytes: 0,
            state: MuxState::HeaderWritten,
        })
    }

    pub fn config(&self) -> MuxerConfig {
        self.config
    }

    pub fn state(&self) -> MuxState {
        self.state
    }

    /// Byte offset where the next frame chunk will be written.
    pub fn cursor(&self) -> u64 {
        self.writer.position()
    }

    pub fn frames(&self) -> u32 {
        self.index.len()
    }

    pub fn max_frame_bytes(&self) -> u32 {
        self.max_frame_bytes
    }

    /// Append one JPEG frame as a `00dc` chunk and record it in the side index.
    pub fn append_frame(&mut self, jpeg: &[u8]) -> AviResult<FrameEntry> {
        if jpeg.is_empty() {
            return Err(AviError::EmptyFrame);
        }
        let size = to_u32("frame", jpeg.len() as u64)?;
        let chunk_at = self.writer.position();
        let end = chunk_at + CHUNK_HEADER_SIZE + jpeg.len() as u64 + padding_for(jpeg.len() as u64);
        self.riff.size_until(end)?;

        let record = IndexRecord {
            offset: to_u32("movi offset", chunk_at - self.movi.data_start())?,
            size,
        };

        if let Err(err) = self.write_frame(jpeg, size, record) {
            // Nothing was indexed; the next frame overwrites the partial chunk
            let _ = self.writer.rewind_to(chunk_at);
            return Err(err);
        }

        self.max_frame_bytes = self.max_frame_bytes.max(size);
        self.state = MuxState::Appending;

        // The frame is committed; stale sizes are patched again by the next
        // append or by finalize
        if let Err(err) = self.patch_sizes() {
            warn!("Size patch after frame {} failed: {}", self.index.len(), err);
        }

        Ok(FrameEntry {
            record,
            data_offset: chunk_at + CHUNK_HEADER_SIZE,
            cursor: self.writer.position(),
        })
    }

    /// Keep the file valid in case recording never reaches finalize.
    fn patch_sizes(&mut self) -> AviResult<()> {
        self.writer.close(self.riff)?;
        self.writer.close(self.movi)?;
        Ok(())
    }

    fn write_frame(&mut self, jpeg: &[u8], size: u32, record: IndexRecord) -> AviResult<()> {
        self.writer.write_chunk_header(ids::FRAME, size)?;
        self.writer.write_padded(jpeg)?;
        self.index.append(record)
    }

    /// Fold the side index into `idx1`, patch every size and the header totals.
    ///
    /// Always emits an `idx1` chunk, empty when no frame was appended.
    #[instrument(skip_all, fields(frames = self.index.len()))]
    pub fn finalize(mut self) -> AviResult<(FinalizeReport, F, I)> {
        let movi_end = self.writer.position();
        let idx1 = self.writer.begin_chunk(ids::IDX1)?;

        let writer = &mut self.writer;
        self.index.replay(|record| {
            let mut entry = [0u8; 16];
            entry[0..4].copy_from_slice(ids::FRAME.as_bytes());
            // flags stay zero
            entry[8..12].copy_from_slice(&record.offset.to_le_bytes());
            entry[12..16].copy_from_slice(&record.size.to_le_bytes());
            writer.write_bytes(&entry)
        })?;

        let idx1_size = self.writer.close(idx1)?;
        let movi_size = self.writer.patch_until(self.movi, movi_end)?;
        let riff_size = self.writer.close(self.riff)?;

        let frames = self.index.len();
        let buffer_size = self.max_frame_bytes.saturating_add(self.max_frame_bytes & 1);

        self.main.total_frames = frames;
        self.main.max_bytes_per_sec = self.max_frame_bytes.saturating_mul(self.stream.rate);
        self.main.suggested_buffer_size = buffer_size;
        self.writer
            .write_at(self.main_header_at, &self.main.to_bytes())?;

        self.stream.length = frames;
        self.stream.suggested_buffer_size = buffer_size;
        self.writer
            .write_at(self.stream_header_at, &self.stream.to_bytes())?;
        // Drop leftovers of failed appends beyond the RIFF end
        self.writer.truncate()?;
        self.writer.flush()?;

        let report = FinalizeReport {
            frames,
            max_frame_bytes: self.max_frame_bytes,
            riff_size,
            movi_size,
            idx1_size,
            file_size: self.writer.position(),
        };
        info!(
            "AVI finalized: {} frames, {} bytes, largest frame {} bytes",
            report.frames, report.file_size, report.max_frame_bytes
        );

        Ok((report, self.writer.into_inner(), self.index.into_inner()))
    }
}
