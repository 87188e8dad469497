// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Synchronous pull adapter for asynchronous buffer-queue decoders.
//!
//! A codec device exposes indexed input and output buffer queues that progress
//! on independent timelines. The [`adapter::SyncDecoder`] in this crate sits
//! between such a device and a blocking pull source of encoded access units,
//! and turns the pair into a simple synchronous "read the next decoded unit"
//! call for a single downstream consumer.

pub mod adapter;
pub mod backend;
pub mod bitstream_utils;
pub mod device;
pub mod source;

use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DecodedFormat {
    NV12,
    I420,
}

impl FromStr for DecodedFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nv12" | "NV12" => Ok(DecodedFormat::NV12),
            "i420" | "I420" => Ok(DecodedFormat::I420),
            _ => Err("unrecognized output format. Valid values: nv12, i420"),
        }
    }
}

/// Format descriptor exchanged with the codec device and the upstream source.
///
/// The upstream source describes its stream with one of these (decoded pixel
/// format unset); the codec device reports the negotiated output format with
/// the pixel format filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    /// Media type of the stream, e.g. `video/vp9`.
    pub media_type: String,
    /// Coded or display resolution, depending on which side reports it.
    pub resolution: Resolution,
    /// Pixel format of decoded frames, if known.
    pub format: Option<DecodedFormat>,
}
