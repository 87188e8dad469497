// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The feed-and-drain pump behind [`SyncDecoder::read`].
//!
//! Each invocation alternates between feeding encoded units into the
//! device's input queue and polling its output queue for one decoded unit.
//! The state mutex is released only around the two blocking calls (pulling
//! the source, polling the device), and the lifecycle is re-validated after
//! every re-acquisition so a concurrent `stop` is observed promptly.

use crate::adapter::AdapterError;
use crate::adapter::DecodedFrame;
use crate::adapter::DecoderState;
use crate::adapter::ReadEvent;
use crate::adapter::SyncDecoder;
use crate::device::BufferFlags;
use crate::device::DequeueOutput;
use crate::source::SeekTarget;

impl SyncDecoder {
    /// Produces the next [`ReadEvent`].
    ///
    /// Entered only from `Started`; `read` has already set the `reading`
    /// flag and clears it when this returns.
    pub(super) fn pump(&self, seek: Option<SeekTarget>) -> Result<ReadEvent, AdapterError> {
        let mut st = self.state.lock().unwrap();

        // A seek invalidates everything buffered on both sides of the device
        // and re-arms both EOS edges. Must precede any queue interaction.
        if seek.is_some() {
            st.queued_input_eos = false;
            st.got_output_eos = false;
            if let Err(err) = self.codec.lock().unwrap().flush() {
                st.state = DecoderState::Error;
                return Err(err.into());
            }
        }

        if st.got_output_eos {
            return Ok(ReadEvent::EndOfStream);
        }

        // Handed to the source on the first pull after the flush above.
        let mut pending_seek = seek;

        for _attempt in 0..self.tunings.max_drain_attempts {
            // Feed until the input queue is full or input EOS is queued.
            while !st.queued_input_eos {
                drop(st);
                let slot = self
                    .codec
                    .lock()
                    .unwrap()
                    .dequeue_input_buffer(self.tunings.input_dequeue_timeout);
                st = self.state.lock().unwrap();
                if st.state != DecoderState::Started {
                    return Ok(ReadEvent::EndOfStream);
                }
                let index = match slot {
                    Ok(Some(index)) => index,
                    // Input queue full: switch to draining.
                    Ok(None) => break,
                    Err(err) => {
                        st.state = DecoderState::Error;
                        return Err(err.into());
                    }
                };

                // Pull until the held slot is filled or the stream ends.
                loop {
                    drop(st);
                    let pulled = self.source.lock().unwrap().read(pending_seek.take());
                    st = self.state.lock().unwrap();
                    if st.state != DecoderState::Started {
                        return Ok(ReadEvent::EndOfStream);
                    }
                    match pulled {
                        Ok(Some(chunk)) => {
                            if chunk.data.is_empty() {
                                // Nothing to submit; re-pull into the same slot.
                                continue;
                            }
                            let mut codec = self.codec.lock().unwrap();
                            let buffer = match codec.input_buffer(index) {
                                Ok(buffer) => buffer,
                                Err(err) => {
                                    st.state = DecoderState::Error;
                                    return Err(err.into());
                                }
                            };
                            let len = chunk.data.len().min(buffer.len());
                            if len < chunk.data.len() {
                                log::debug!(
                                    "input unit of {} bytes truncated to buffer capacity {}",
                                    chunk.data.len(),
                                    len
                                );
                            }
                            buffer[..len].copy_from_slice(&chunk.data[..len]);
                            let flags = BufferFlags {
                                end_of_stream: false,
                                key_frame: chunk.key_frame,
                            };
                            if let Err(err) =
                                codec.queue_input_buffer(index, len, chunk.timestamp_us, flags)
                            {
                                st.state = DecoderState::Error;
                                return Err(err.into());
                            }
                            break;
                        }
                        Ok(None) => {
                            if let Err(err) = self
                                .codec
                                .lock()
                                .unwrap()
                                .queue_input_buffer(index, 0, 0, BufferFlags::eos())
                            {
                                st.state = DecoderState::Error;
                                return Err(err.into());
                            }
                            st.queued_input_eos = true;
                            break;
                        }
                        Err(err) => {
                            // The device still needs its EOS marker so it can
                            // drain what it already has.
                            if let Err(queue_err) = self
                                .codec
                                .lock()
                                .unwrap()
                                .queue_input_buffer(index, 0, 0, BufferFlags::eos())
                            {
                                log::debug!(
                                    "queueing EOS after source failure also failed: {}",
                                    queue_err
                                );
                            }
                            st.queued_input_eos = true;
                            st.state = DecoderState::Error;
                            return Err(err.into());
                        }
                    }
                }
            }

            // Drain one decoded unit.
            drop(st);
            let polled = self
                .codec
                .lock()
                .unwrap()
                .dequeue_output_buffer(self.tunings.output_dequeue_timeout);
            st = self.state.lock().unwrap();
            if st.state != DecoderState::Started {
                // Abort-on-stop wins over delivering data.
                if let Ok(DequeueOutput::Buffer(buffer)) = polled {
                    if let Err(err) = self.codec.lock().unwrap().release_output_buffer(buffer.index)
                    {
                        log::debug!(
                            "releasing output buffer {} after stop failed: {}",
                            buffer.index,
                            err
                        );
                    }
                }
                return Ok(ReadEvent::EndOfStream);
            }

            match polled {
                Ok(DequeueOutput::TryAgainLater) => {
                    log::debug!(
                        "no output within {:?}, retrying",
                        self.tunings.output_dequeue_timeout
                    );
                }
                Ok(DequeueOutput::BuffersChanged) => {
                    log::debug!("output buffer set changed");
                }
                Ok(DequeueOutput::FormatChanged) => {
                    let format = match self.codec.lock().unwrap().output_format() {
                        Ok(format) => format,
                        Err(err) => {
                            st.state = DecoderState::Error;
                            return Err(err.into());
                        }
                    };
                    st.format = format.clone();
                    return Ok(ReadEvent::FormatChanged(format));
                }
                Ok(DequeueOutput::Buffer(buffer)) => {
                    if buffer.flags.end_of_stream {
                        st.got_output_eos = true;
                    }
                    if buffer.size == 0 && buffer.flags.end_of_stream {
                        // A bare EOS marker is not delivered as a unit.
                        if let Err(err) =
                            self.codec.lock().unwrap().release_output_buffer(buffer.index)
                        {
                            st.state = DecoderState::Error;
                            return Err(err.into());
                        }
                        return Ok(ReadEvent::EndOfStream);
                    }

                    let mut codec = self.codec.lock().unwrap();
                    if self.surface.is_some() && buffer.size > 0 {
                        if let Err(err) = codec.render_output_buffer(buffer.index) {
                            st.state = DecoderState::Error;
                            return Err(err.into());
                        }
                        return Ok(ReadEvent::Frame(DecodedFrame {
                            data: Vec::new(),
                            timestamp_us: buffer.timestamp_us,
                            rendered: true,
                        }));
                    }
                    let data = match codec.output_buffer(buffer.index) {
                        Ok(payload) => payload[buffer.offset..buffer.offset + buffer.size].to_vec(),
                        Err(err) => {
                            st.state = DecoderState::Error;
                            return Err(err.into());
                        }
                    };
                    if let Err(err) = codec.release_output_buffer(buffer.index) {
                        st.state = DecoderState::Error;
                        return Err(err.into());
                    }
                    return Ok(ReadEvent::Frame(DecodedFrame {
                        data,
                        timestamp_us: buffer.timestamp_us,
                        rendered: false,
                    }));
                }
                Err(err) => {
                    st.state = DecoderState::Error;
                    return Err(err.into());
                }
            }
        }

        Err(AdapterError::Stalled(self.tunings.max_drain_attempts))
    }
}
