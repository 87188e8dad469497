// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Contract consumed from the upstream source of encoded access units.

use thiserror::Error;

use crate::MediaFormat;

/// Error returned by source methods.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("the source is not started")]
    NotStarted,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One encoded access unit pulled from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
    /// Whether the unit starts at a sync point and decoding can resume here
    /// after a seek.
    pub key_frame: bool,
}

/// Directive asking the source to reposition before the next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTarget {
    pub position_us: i64,
}

/// Synchronous pull source of encoded access units.
pub trait MediaSource {
    fn start(&mut self) -> Result<(), SourceError>;

    fn stop(&mut self) -> Result<(), SourceError>;

    /// Pulls the next encoded unit, honoring `seek` first if given. Returns
    /// `Ok(None)` at the end of the stream.
    fn read(&mut self, seek: Option<SeekTarget>) -> Result<Option<EncodedChunk>, SourceError>;

    /// Describes the encoded stream. Queried once when the adapter is
    /// created.
    fn format(&self) -> MediaFormat;
}

/// Boxed source, the form consumed by the adapter.
pub type DynMediaSource = Box<dyn MediaSource + Send>;

/// A [`MediaSource`] over an in-memory list of chunks.
///
/// Seeking repositions to the latest key frame at or before the target
/// timestamp, falling back to the start of the list.
pub struct ChunkSource {
    format: MediaFormat,
    chunks: Vec<EncodedChunk>,
    pos: usize,
    started: bool,
}

impl ChunkSource {
    pub fn new(format: MediaFormat, chunks: Vec<EncodedChunk>) -> Self {
        Self {
            format,
            chunks,
            pos: 0,
            started: false,
        }
    }

    fn seek_pos(&self, target: SeekTarget) -> usize {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.key_frame && c.timestamp_us <= target.position_us)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0)
    }
}

impl MediaSource for ChunkSource {
    fn start(&mut self) -> Result<(), SourceError> {
        self.started = true;
        self.pos = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.started = false;
        Ok(())
    }

    fn read(&mut self, seek: Option<SeekTarget>) -> Result<Option<EncodedChunk>, SourceError> {
        if !self.started {
            return Err(SourceError::NotStarted);
        }
        if let Some(target) = seek {
            self.pos = self.seek_pos(target);
        }
        let chunk = self.chunks.get(self.pos).cloned();
        if chunk.is_some() {
            self.pos += 1;
        }
        Ok(chunk)
    }

    fn format(&self) -> MediaFormat {
        self.format.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resolution;

    fn chunk(timestamp_us: i64, key_frame: bool) -> EncodedChunk {
        EncodedChunk {
            data: vec![0u8; 4],
            timestamp_us,
            key_frame,
        }
    }

    fn source() -> ChunkSource {
        let format = MediaFormat {
            media_type: "video/vp9".into(),
            resolution: Resolution::from((320, 240)),
            format: None,
        };
        ChunkSource::new(
            format,
            vec![
                chunk(0, true),
                chunk(1000, false),
                chunk(2000, true),
                chunk(3000, false),
            ],
        )
    }

    #[test]
    fn reads_in_order_then_eos() {
        let mut source = source();
        source.start().unwrap();
        for expected in [0, 1000, 2000, 3000] {
            assert_eq!(source.read(None).unwrap().unwrap().timestamp_us, expected);
        }
        assert!(source.read(None).unwrap().is_none());
        // The end of the stream repeats.
        assert!(source.read(None).unwrap().is_none());
    }

    #[test]
    fn seek_lands_on_preceding_key_frame() {
        let mut source = source();
        source.start().unwrap();
        let seek = Some(SeekTarget { position_us: 3000 });
        assert_eq!(source.read(seek).unwrap().unwrap().timestamp_us, 2000);
        assert_eq!(source.read(None).unwrap().unwrap().timestamp_us, 3000);
    }

    #[test]
    fn seek_before_first_key_frame_restarts() {
        let mut source = source();
        source.start().unwrap();
        source.read(None).unwrap();
        source.read(None).unwrap();
        let seek = Some(SeekTarget { position_us: -1 });
        assert_eq!(source.read(seek).unwrap().unwrap().timestamp_us, 0);
    }

    #[test]
    fn read_before_start_fails() {
        let mut source = source();
        assert!(matches!(source.read(None), Err(SourceError::NotStarted)));
    }
}
