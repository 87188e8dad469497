// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A dummy device whose only purpose is to let the adapter run so we can
//! test it in isolation.
//!
//! Decoding is the identity transform: every queued input payload comes back
//! out unchanged, in order, with its timestamp. Queue mechanics are real
//! though: a fixed set of input and output slots, end-of-stream propagation
//! from the input queue to the output queue, and optional blocking in the
//! output poll. Notices and failures can be scripted ahead of the decoded
//! data to exercise the adapter's retry and error paths.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;

use crate::device::BufferFlags;
use crate::device::CodecDevice;
use crate::device::DequeueOutput;
use crate::device::DeviceError;
use crate::device::OutputBuffer;
use crate::device::SurfaceHandle;
use crate::MediaFormat;

/// Events reported from the output queue ahead of any decoded data.
#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    /// Report a format change and switch the device to the new format.
    FormatChanged(MediaFormat),
    /// Report that the output buffer set changed.
    BuffersChanged,
    /// Fail the output poll with the given message.
    Fail(String),
}

/// Observable counters, shared with clones handed out by
/// [`DummyDevice::stats`] so tests can inspect the device after boxing it.
#[derive(Debug, Default)]
pub struct DummyStats {
    pub input_polls: usize,
    pub output_polls: usize,
    pub queued_inputs: usize,
    pub flushes: usize,
    pub stopped: bool,
    /// The device received an end-of-stream input marker.
    pub input_eos: bool,
    /// Timestamps pushed to the surface, in render order.
    pub rendered: Vec<i64>,
}

struct PendingFrame {
    data: Vec<u8>,
    timestamp_us: i64,
    eos: bool,
}

pub struct DummyDevice {
    configured: bool,
    running: bool,
    fail_configure: bool,
    block_on_empty: bool,
    free_input_on_queue: bool,
    format: MediaFormat,
    surface: Option<SurfaceHandle>,
    input_bufs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    output_bufs: Vec<Vec<u8>>,
    output_timestamps: Vec<i64>,
    free_outputs: VecDeque<usize>,
    pending: VecDeque<PendingFrame>,
    script: VecDeque<ScriptedEvent>,
    stats: Arc<Mutex<DummyStats>>,
}

impl DummyDevice {
    /// A device reporting `format` as its output format, with four input
    /// slots of 4 KiB and four output slots.
    pub fn new(format: MediaFormat) -> Self {
        let mut device = Self {
            configured: false,
            running: false,
            fail_configure: false,
            block_on_empty: false,
            free_input_on_queue: true,
            format,
            surface: None,
            input_bufs: Vec::new(),
            free_inputs: VecDeque::new(),
            output_bufs: Vec::new(),
            output_timestamps: Vec::new(),
            free_outputs: VecDeque::new(),
            pending: VecDeque::new(),
            script: VecDeque::new(),
            stats: Default::default(),
        };
        device.resize_slots(4, 4096, 4);
        device
    }

    pub fn with_input_slots(mut self, count: usize, capacity: usize) -> Self {
        let outputs = self.output_bufs.len();
        self.resize_slots(count, capacity, outputs);
        self
    }

    pub fn with_output_slots(mut self, count: usize) -> Self {
        let inputs = self.input_bufs.len();
        let capacity = self.input_bufs.first().map(Vec::len).unwrap_or(4096);
        self.resize_slots(inputs, capacity, count);
        self
    }

    /// Rejects `configure`, for exercising candidate fallback.
    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Makes the output poll actually wait out its timeout when nothing is
    /// ready, like a real device would.
    pub fn blocking_on_empty(mut self) -> Self {
        self.block_on_empty = true;
        self
    }

    /// Keeps input slots out of the free list once queued, so the input
    /// queue eventually runs full.
    pub fn retaining_input_slots(mut self) -> Self {
        self.free_input_on_queue = false;
        self
    }

    /// Queues events to report from the output queue before any decoded
    /// data.
    pub fn script(mut self, events: impl IntoIterator<Item = ScriptedEvent>) -> Self {
        self.script.extend(events);
        self
    }

    /// Handle for inspecting the device after it has been boxed away.
    pub fn stats(&self) -> Arc<Mutex<DummyStats>> {
        Arc::clone(&self.stats)
    }

    fn resize_slots(&mut self, inputs: usize, capacity: usize, outputs: usize) {
        self.input_bufs = (0..inputs).map(|_| vec![0; capacity]).collect();
        self.free_inputs = (0..inputs).collect();
        self.output_bufs = (0..outputs).map(|_| Vec::new()).collect();
        self.output_timestamps = vec![0; outputs];
        self.free_outputs = (0..outputs).collect();
    }

    fn check_running(&self) -> Result<(), DeviceError> {
        if self.running {
            Ok(())
        } else {
            Err(DeviceError::InvalidState)
        }
    }
}

impl CodecDevice for DummyDevice {
    fn configure(
        &mut self,
        _format: &MediaFormat,
        surface: Option<SurfaceHandle>,
    ) -> Result<(), DeviceError> {
        if self.fail_configure {
            return Err(DeviceError::Other(anyhow!("configure rejected by script")));
        }
        self.configured = true;
        self.surface = surface;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.configured || self.running {
            return Err(DeviceError::InvalidState);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.check_running()?;
        self.running = false;
        self.pending.clear();
        self.free_inputs = (0..self.input_bufs.len()).collect();
        self.free_outputs = (0..self.output_bufs.len()).collect();
        self.stats.lock().unwrap().stopped = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.check_running()?;
        self.pending.clear();
        self.free_inputs = (0..self.input_bufs.len()).collect();
        self.free_outputs = (0..self.output_bufs.len()).collect();
        self.stats.lock().unwrap().flushes += 1;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>, DeviceError> {
        self.check_running()?;
        self.stats.lock().unwrap().input_polls += 1;
        Ok(self.free_inputs.pop_front())
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], DeviceError> {
        if index >= self.input_bufs.len() || self.free_inputs.contains(&index) {
            return Err(DeviceError::InvalidBufferIndex(index));
        }
        Ok(&mut self.input_bufs[index])
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<(), DeviceError> {
        self.check_running()?;
        if index >= self.input_bufs.len() || self.free_inputs.contains(&index) {
            return Err(DeviceError::InvalidBufferIndex(index));
        }
        if size > self.input_bufs[index].len() {
            return Err(DeviceError::Other(anyhow!(
                "queued {} bytes into a {} byte buffer",
                size,
                self.input_bufs[index].len()
            )));
        }
        self.pending.push_back(PendingFrame {
            data: self.input_bufs[index][..size].to_vec(),
            timestamp_us,
            eos: flags.end_of_stream,
        });
        let mut stats = self.stats.lock().unwrap();
        if flags.end_of_stream {
            stats.input_eos = true;
        } else {
            stats.queued_inputs += 1;
        }
        drop(stats);
        if self.free_input_on_queue {
            self.free_inputs.push_back(index);
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<DequeueOutput, DeviceError> {
        self.check_running()?;
        self.stats.lock().unwrap().output_polls += 1;
        if let Some(event) = self.script.pop_front() {
            return match event {
                ScriptedEvent::FormatChanged(format) => {
                    self.format = format;
                    Ok(DequeueOutput::FormatChanged)
                }
                ScriptedEvent::BuffersChanged => Ok(DequeueOutput::BuffersChanged),
                ScriptedEvent::Fail(reason) => Err(DeviceError::Other(anyhow!(reason))),
            };
        }
        if !self.pending.is_empty() {
            let Some(index) = self.free_outputs.pop_front() else {
                // The client is sitting on every output slot.
                return Ok(DequeueOutput::TryAgainLater);
            };
            let frame = self.pending.pop_front().unwrap();
            let size = frame.data.len();
            self.output_bufs[index].clear();
            self.output_bufs[index].extend_from_slice(&frame.data);
            self.output_timestamps[index] = frame.timestamp_us;
            return Ok(DequeueOutput::Buffer(OutputBuffer {
                index,
                offset: 0,
                size,
                timestamp_us: frame.timestamp_us,
                flags: BufferFlags {
                    end_of_stream: frame.eos,
                    key_frame: false,
                },
            }));
        }
        if self.block_on_empty {
            std::thread::sleep(timeout);
        }
        Ok(DequeueOutput::TryAgainLater)
    }

    fn output_buffer(&mut self, index: usize) -> Result<&[u8], DeviceError> {
        if index >= self.output_bufs.len() || self.free_outputs.contains(&index) {
            return Err(DeviceError::InvalidBufferIndex(index));
        }
        Ok(&self.output_bufs[index])
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<(), DeviceError> {
        if index >= self.output_bufs.len() || self.free_outputs.contains(&index) {
            return Err(DeviceError::InvalidBufferIndex(index));
        }
        self.free_outputs.push_back(index);
        Ok(())
    }

    fn render_output_buffer(&mut self, index: usize) -> Result<(), DeviceError> {
        if self.surface.is_none() {
            return Err(DeviceError::InvalidState);
        }
        if index >= self.output_bufs.len() || self.free_outputs.contains(&index) {
            return Err(DeviceError::InvalidBufferIndex(index));
        }
        self.stats.lock().unwrap().rendered.push(self.output_timestamps[index]);
        self.free_outputs.push_back(index);
        Ok(())
    }

    fn output_format(&self) -> Result<MediaFormat, DeviceError> {
        if !self.configured {
            return Err(DeviceError::InvalidState);
        }
        Ok(self.format.clone())
    }
}
