// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Contract consumed from the codec device.
//!
//! A codec device is an asynchronous decoder exposing indexed input and
//! output buffer queues. Input buffers are dequeued, filled with encoded data
//! and queued back; output buffers are dequeued once decoded and either read
//! out or rendered straight to a display surface. The two queues progress on
//! independent timelines, which is why both dequeue operations take a
//! timeout.

use std::time::Duration;

use thiserror::Error;

use crate::MediaFormat;

/// Error returned by codec device methods.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("buffer index {0} is not valid")]
    InvalidBufferIndex(usize),
    #[error("the device is in an invalid state for this operation")]
    InvalidState,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-buffer flags carried alongside encoded and decoded payloads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferFlags {
    /// The buffer marks the end of the stream. An empty buffer with this flag
    /// set carries no data at all.
    pub end_of_stream: bool,
    /// The buffer starts at a sync point.
    pub key_frame: bool,
}

impl BufferFlags {
    /// Flags for an empty buffer that only marks the end of the stream.
    pub fn eos() -> Self {
        Self {
            end_of_stream: true,
            key_frame: false,
        }
    }
}

/// Opaque handle to a display surface owned by the embedder's presentation
/// layer. A device configured with one supports the zero-copy render path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);

/// Metadata of a dequeued output buffer. The payload itself stays inside the
/// device until it is read out with [`CodecDevice::output_buffer`] or pushed
/// to the surface with [`CodecDevice::render_output_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBuffer {
    pub index: usize,
    pub offset: usize,
    pub size: usize,
    pub timestamp_us: i64,
    pub flags: BufferFlags,
}

/// Non-fatal outcomes of polling the output queue.
#[derive(Debug)]
pub enum DequeueOutput {
    /// A decoded buffer is ready.
    Buffer(OutputBuffer),
    /// Nothing was produced within the timeout.
    TryAgainLater,
    /// The output format changed; query it again with
    /// [`CodecDevice::output_format`]. No buffer is returned.
    FormatChanged,
    /// The set of output buffers changed. Informational only.
    BuffersChanged,
}

/// Interface to an asynchronous buffer-queue codec device.
///
/// Releasing the device is RAII: dropping the handle releases all of its
/// resources, so there is no explicit `release()`.
pub trait CodecDevice {
    /// Binds the device to the stream format, and optionally to a display
    /// surface enabling the zero-copy render path.
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<SurfaceHandle>,
    ) -> Result<(), DeviceError>;

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Discards all buffered encoded and decoded data. Buffers previously
    /// dequeued by the client return to the device.
    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Dequeues a free input buffer, waiting up to `timeout`. Returns
    /// `Ok(None)` when the input queue is full, which is the expected steady
    /// state of a busy pipeline rather than an error.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>, DeviceError>;

    /// Gives write access to a previously dequeued input buffer.
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], DeviceError>;

    /// Submits `size` bytes of the input buffer for decoding, tagged with a
    /// presentation timestamp and flags.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<(), DeviceError>;

    /// Polls the output queue, waiting up to `timeout` for a decoded buffer
    /// or a queue event.
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<DequeueOutput, DeviceError>;

    /// Gives read access to a previously dequeued output buffer.
    fn output_buffer(&mut self, index: usize) -> Result<&[u8], DeviceError>;

    /// Returns an output buffer to the device without displaying it.
    fn release_output_buffer(&mut self, index: usize) -> Result<(), DeviceError>;

    /// Pushes an output buffer to the configured surface and returns it to
    /// the device. Only valid when a surface was bound at configure time.
    fn render_output_buffer(&mut self, index: usize) -> Result<(), DeviceError>;

    /// Returns the current output format. Valid once configured; refreshed by
    /// the device when it reports [`DequeueOutput::FormatChanged`].
    fn output_format(&self) -> Result<MediaFormat, DeviceError>;
}

/// Boxed codec device, the form consumed by the adapter.
pub type DynCodecDevice = Box<dyn CodecDevice + Send>;
