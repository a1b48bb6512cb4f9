use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use ltctools_macros::{ToBytes, w64_chunk};

use crate::byteorder::WriteBytesLe;

// W64 GUIDs as defined in Sony Wave64 specification
pub const W64_RIFF_GUID: [u8; 16] = [
    0x72, 0x69, 0x66, 0x66, 0x2E, 0x91, 0xCF, 0x11, 0xA5, 0xD6, 0x28, 0xDB, 0x04, 0xC1, 0x00, 0x00,
];
pub const W64_WAVE_GUID: [u8; 16] = [
    0x77, 0x61, 0x76, 0x65, 0xF3, 0xAC, 0xD3, 0x11, 0x8C, 0xD1, 0x00, 0xC0, 0x4F, 0x8E, 0xDB, 0x8A,
];
pub const W64_DATA_GUID: [u8; 16] = [
    0x64, 0x61, 0x74, 0x61, 0xF3, 0xAC, 0xD3, 0x11, 0x8C, 0xD1, 0x00, 0xC0, 0x4F, 0x8E, 0xDB, 0x8A,
];

/// GUID plus 64-bit size.
const CHUNK_HEADER_LEN: u64 = 24;

const BITS_PER_SAMPLE: u16 = 24;

/// Full scale of a signed 24-bit sample.
const FULL_SCALE_24: f32 = 8_388_607.0;

pub trait W64Chunk {
    fn chunk_guid(&self) -> &[u8; 16];
    fn chunk_data(&self) -> Vec<u8>;
}

#[w64_chunk(b"fmt ")]
#[derive(ToBytes)]
struct FormatChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
}

/// Sony Wave64 writer for 24-bit PCM, used for generated LTC.
pub struct W64Writer<W: Write + Seek> {
    writer: BufWriter<W>,
    sample_rate: u32,
    channels: u16,
    file_size_position: u64,
    data_size_position: u64,
    data_written: u64,
}

impl<W: Write + Seek> W64Writer<W> {
    pub fn new(writer: W, sample_rate: u32, channels: u16) -> Self {
        Self {
            writer: BufWriter::new(writer),
            sample_rate,
            channels: channels.max(1),
            file_size_position: 0,
            data_size_position: 0,
            data_written: 0,
        }
    }

    /// Writes the RIFF, format and data chunk headers. Sizes are patched by
    /// [`finish`](Self::finish).
    pub fn write_header(&mut self) -> io::Result<()> {
        self.writer.write_all(&W64_RIFF_GUID)?;
        self.file_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u64.to_le_bytes())?;
        self.writer.write_all(&W64_WAVE_GUID)?;

        let block_align = self.channels * (BITS_PER_SAMPLE / 8);
        self.write_chunk(&FormatChunk {
            format_tag: 1,
            channels: self.channels,
            sample_rate: self.sample_rate,
            byte_rate: self.sample_rate * block_align as u32,
            block_align,
            bits_per_sample: BITS_PER_SAMPLE,
        })?;

        self.writer.write_all(&W64_DATA_GUID)?;
        self.data_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u64.to_le_bytes())?;
        Ok(())
    }

    /// Writes a complete chunk, padded to 8 bytes.
    pub fn write_chunk(&mut self, chunk: &dyn W64Chunk) -> io::Result<()> {
        let data = chunk.chunk_data();
        self.writer.write_all(chunk.chunk_guid())?;
        self.writer
            .write_all(&(CHUNK_HEADER_LEN + data.len() as u64).to_le_bytes())?;
        self.writer.write_all(&data)?;
        let pad = (8 - data.len() % 8) % 8;
        self.writer.write_all(&[0u8; 8][..pad])?;
        Ok(())
    }

    /// Writes interleaved samples in `[-1, 1]` as packed 24-bit PCM.
    pub fn write_samples(&mut self, samples: &[f32]) -> io::Result<()> {
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * FULL_SCALE_24).round() as i32;
            self.writer.write_all(&value.to_le_bytes()[0..3])?;
            self.data_written += 3;
        }
        Ok(())
    }

    /// Patches the chunk sizes.
    pub fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()?;

        let current_pos = self.writer.stream_position()?;

        self.writer.seek(SeekFrom::Start(self.data_size_position))?;
        let data_chunk_size = self.data_written + CHUNK_HEADER_LEN;
        self.writer.write_all(&data_chunk_size.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(self.file_size_position))?;
        self.writer.write_all(&current_pos.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(current_pos))?;
        self.writer.flush()?;

        Ok(())
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }

    /// Sample frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.data_written / (3 * self.channels as u64)
    }
}
