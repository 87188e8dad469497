// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! IVF container helpers for demo and test streams.

use bytes::Buf;

/// One IVF frame: its presentation timestamp and its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfFrame<'a> {
    pub timestamp: u64,
    pub data: &'a [u8],
}

/// Iterator over IVF packets.
pub struct IvfIterator<'a> {
    remaining: &'a [u8],
}

impl<'a> IvfIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        // Skip the IVF file header entirely.
        Self {
            remaining: data.get(32..).unwrap_or(&[]),
        }
    }
}

impl<'a> Iterator for IvfIterator<'a> {
    type Item = IvfFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut cursor = self.remaining;

        // Make sure we have a frame header.
        if cursor.remaining() < 12 {
            return None;
        }
        let len = cursor.get_u32_le() as usize;
        let timestamp = cursor.get_u64_le();

        if cursor.remaining() < len {
            return None;
        }
        let data = &cursor[..len];
        self.remaining = &cursor[len..];

        Some(IvfFrame { timestamp, data })
    }
}

/// Helper struct for synthesizing an IVF file header.
pub struct IvfFileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub header_size: u16,
    pub codec: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub framerate: u32,
    pub timescale: u32,
    pub frame_count: u32,
    pub unused: u32,
}

impl IvfFileHeader {
    pub const MAGIC: [u8; 4] = *b"DKIF";
    pub const CODEC_VP8: [u8; 4] = *b"VP80";
    pub const CODEC_VP9: [u8; 4] = *b"VP90";
    pub const CODEC_AV1: [u8; 4] = *b"AV01";

    pub fn new(codec: [u8; 4], width: u16, height: u16, frame_count: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: 0,
            header_size: 32,
            codec,
            width,
            height,
            framerate: 30_000,
            timescale: 1000,
            frame_count,
            unused: 0,
        }
    }

    /// Writes the header into `writer`.
    pub fn write_into(&self, writer: &mut impl std::io::Write) -> std::io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.header_size.to_le_bytes())?;
        writer.write_all(&self.codec)?;
        writer.write_all(&self.width.to_le_bytes())?;
        writer.write_all(&self.height.to_le_bytes())?;
        writer.write_all(&self.framerate.to_le_bytes())?;
        writer.write_all(&self.timescale.to_le_bytes())?;
        writer.write_all(&self.frame_count.to_le_bytes())?;
        writer.write_all(&self.unused.to_le_bytes())?;
        Ok(())
    }
}

/// Helper struct for synthesizing an IVF frame header.
pub struct IvfFrameHeader {
    pub frame_size: u32,
    pub timestamp: u64,
}

impl IvfFrameHeader {
    /// Writes the header into `writer`.
    pub fn write_into(&self, writer: &mut impl std::io::Write) -> std::io::Result<()> {
        writer.write_all(&self.frame_size.to_le_bytes())?;
        writer.write_all(&self.timestamp.to_le_bytes())?;
        Ok(())
    }
}
