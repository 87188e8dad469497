// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Synchronous decoding adapter.
//!
//! [`SyncDecoder`] wraps one codec device and one upstream source and exposes
//! a blocking [`read`](SyncDecoder::read) that yields decoded units one at a
//! time. All public operations may be called from different threads; in
//! particular [`stop`](SyncDecoder::stop) is safe to call while a `read` is
//! blocked inside the device, and makes that `read` return end-of-stream
//! promptly. `read` itself is single-consumer: callers are expected to
//! serialize their read calls.

mod pump;

use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceError;
use crate::device::DynCodecDevice;
use crate::device::SurfaceHandle;
use crate::source::DynMediaSource;
use crate::source::SeekTarget;
use crate::source::SourceError;
use crate::MediaFormat;

/// Lifecycle of the adapter.
///
/// `Error` is absorbing: once entered, reads report end-of-stream without
/// touching the device or the source again, and the adapter must be torn
/// down and recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Init,
    Started,
    Stopping,
    Stopped,
    Error,
}

/// Error returned by the adapter's public operations.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("operation is not valid in state {0:?}")]
    InvalidState(DecoderState),
    #[error("no candidate codec could be configured for {0}")]
    NoUsableCodec(String),
    #[error("no decoded unit produced after {0} drain attempts")]
    Stalled(usize),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// One decoded unit handed to the consumer.
///
/// On the zero-copy render path the payload already went to the display
/// surface, so `data` is empty and `rendered` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
    pub rendered: bool,
}

/// Outcome of a successful [`SyncDecoder::read`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// The next decoded unit, in presentation order.
    Frame(DecodedFrame),
    /// The output format changed. No unit is delivered; call `read` again to
    /// continue.
    FormatChanged(MediaFormat),
    /// No further units will be produced in this session.
    EndOfStream,
}

/// Constructor for one codec device candidate.
///
/// Enumeration and ranking of candidates is the embedder's policy; the
/// adapter only walks the list it is given, in order.
pub struct CodecCandidate {
    pub name: String,
    /// Media types this codec can decode.
    pub media_types: Vec<String>,
    pub factory: Box<dyn FnMut() -> Result<DynCodecDevice, DeviceError> + Send>,
}

/// Timing knobs of the read loop.
///
/// The input dequeue timeout is short: a full input queue is the expected
/// steady state of a busy pipeline. The output dequeue timeout is materially
/// larger, since the device may need to consume several input units before
/// producing one output unit. The two are retried independently and never
/// summed into a per-call deadline; only `max_drain_attempts` bounds the
/// total latency of a stalled read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTunings {
    pub input_dequeue_timeout: Duration,
    pub output_dequeue_timeout: Duration,
    pub max_drain_attempts: usize,
}

impl Default for ReadTunings {
    fn default() -> Self {
        Self {
            input_dequeue_timeout: Duration::from_millis(10),
            output_dequeue_timeout: Duration::from_millis(400),
            max_drain_attempts: 50,
        }
    }
}

/// Options for [`SyncDecoder::create`].
#[derive(Default)]
pub struct AdapterOptions {
    /// Display surface to render to. When set, delivered units carry no
    /// payload; the decoded data goes straight to the surface.
    pub surface: Option<SurfaceHandle>,
    /// Candidate with this name is tried first.
    pub preferred_codec: Option<String>,
    pub tunings: ReadTunings,
}

/// Shared record mutated by every public operation and by the pump.
struct AdapterState {
    state: DecoderState,
    /// True while a `read` call is executing the pump. `stop` waits on
    /// `read_done` until this clears.
    reading: bool,
    /// An end-of-stream marker has been pushed into the input queue; the
    /// source will not be pulled again this session.
    queued_input_eos: bool,
    /// The device emitted its end-of-stream marker; every further read
    /// reports end-of-stream without touching the queues.
    got_output_eos: bool,
    format: MediaFormat,
}

/// Synchronous pull-mode decoder.
pub struct SyncDecoder {
    state: Mutex<AdapterState>,
    read_done: Condvar,
    codec: Mutex<DynCodecDevice>,
    source: Mutex<DynMediaSource>,
    surface: Option<SurfaceHandle>,
    tunings: ReadTunings,
}

impl SyncDecoder {
    /// Creates an adapter over `source`, trying each matching codec candidate
    /// in order until one configures successfully.
    ///
    /// A candidate that fails to allocate or configure is fully released
    /// before the next one is tried; on exhaustion no partial adapter is
    /// returned.
    pub fn create(
        source: DynMediaSource,
        candidates: Vec<CodecCandidate>,
        options: AdapterOptions,
    ) -> Result<Self, AdapterError> {
        let format = source.format();
        let mut matching: Vec<CodecCandidate> = candidates
            .into_iter()
            .filter(|c| c.media_types.iter().any(|t| *t == format.media_type))
            .collect();
        if let Some(name) = &options.preferred_codec {
            if let Some(idx) = matching.iter().position(|c| c.name == *name) {
                let preferred = matching.remove(idx);
                matching.insert(0, preferred);
            }
        }

        for mut candidate in matching {
            let mut codec = match (candidate.factory)() {
                Ok(codec) => codec,
                Err(err) => {
                    log::debug!("allocating codec {} failed: {}", candidate.name, err);
                    continue;
                }
            };
            if let Err(err) = codec.configure(&format, options.surface) {
                log::debug!("configuring codec {} failed: {}", candidate.name, err);
                continue;
            }
            let negotiated = match codec.output_format() {
                Ok(negotiated) => negotiated,
                Err(err) => {
                    log::debug!("querying format of codec {} failed: {}", candidate.name, err);
                    continue;
                }
            };
            log::debug!("selected codec {} for {}", candidate.name, format.media_type);
            return Ok(Self {
                state: Mutex::new(AdapterState {
                    state: DecoderState::Init,
                    reading: false,
                    queued_input_eos: false,
                    got_output_eos: false,
                    format: negotiated,
                }),
                read_done: Condvar::new(),
                codec: Mutex::new(codec),
                source: Mutex::new(source),
                surface: options.surface,
                tunings: options.tunings,
            });
        }

        Err(AdapterError::NoUsableCodec(format.media_type))
    }

    /// Starts the device, then the source. Valid only in `Init`.
    pub fn start(&self) -> Result<(), AdapterError> {
        let mut st = self.state.lock().unwrap();
        if st.state != DecoderState::Init {
            return Err(AdapterError::InvalidState(st.state));
        }
        if let Err(err) = self.codec.lock().unwrap().start() {
            st.state = DecoderState::Error;
            return Err(err.into());
        }
        if let Err(err) = self.source.lock().unwrap().start() {
            st.state = DecoderState::Error;
            return Err(err.into());
        }
        st.state = DecoderState::Started;
        st.queued_input_eos = false;
        st.got_output_eos = false;
        Ok(())
    }

    /// Stops the adapter. Valid only in `Started`.
    ///
    /// The state moves to `Stopping` first, which any in-flight read observes
    /// at its next lock acquisition and aborts on; only once that read has
    /// returned are the device and the source actually stopped.
    pub fn stop(&self) -> Result<(), AdapterError> {
        let mut st = self.state.lock().unwrap();
        if st.state != DecoderState::Started {
            return Err(AdapterError::InvalidState(st.state));
        }
        st.state = DecoderState::Stopping;
        while st.reading {
            st = self.read_done.wait(st).unwrap();
        }

        let mut result = Ok(());
        if let Err(err) = self.codec.lock().unwrap().stop() {
            result = Err(AdapterError::Device(err));
        }
        if let Err(err) = self.source.lock().unwrap().stop() {
            if result.is_ok() {
                result = Err(AdapterError::Source(err));
            }
        }
        st.state = if result.is_ok() {
            DecoderState::Stopped
        } else {
            DecoderState::Error
        };
        result
    }

    /// Produces the next decoded unit, blocking while the device works.
    ///
    /// Outside `Started` this reports end-of-stream without touching the
    /// device or the source.
    pub fn read(&self, seek: Option<SeekTarget>) -> Result<ReadEvent, AdapterError> {
        {
            let mut st = self.state.lock().unwrap();
            if st.state != DecoderState::Started {
                return Ok(ReadEvent::EndOfStream);
            }
            st.reading = true;
        }

        let result = self.pump(seek);

        let mut st = self.state.lock().unwrap();
        st.reading = false;
        if st.state != DecoderState::Started {
            // A stop is waiting for us to get out of the way.
            self.read_done.notify_all();
        }
        result
    }

    /// Returns the current output format, or `None` once the session is past
    /// its useful life.
    pub fn get_format(&self) -> Option<MediaFormat> {
        let st = self.state.lock().unwrap();
        match st.state {
            DecoderState::Init | DecoderState::Started => Some(st.format.clone()),
            _ => None,
        }
    }
}

impl Drop for SyncDecoder {
    fn drop(&mut self) {
        let started = self.state.lock().unwrap().state == DecoderState::Started;
        if started {
            if let Err(err) = self.stop() {
                log::debug!("stopping decoder on drop failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::backend::dummy::DummyStats;
    use crate::source::ChunkSource;
    use crate::source::EncodedChunk;
    use crate::source::MediaSource;
    use crate::DecodedFormat;
    use crate::Resolution;

    pub(crate) fn stream_format() -> MediaFormat {
        MediaFormat {
            media_type: "video/vp9".into(),
            resolution: Resolution::from((320, 240)),
            format: None,
        }
    }

    pub(crate) fn decoded_format() -> MediaFormat {
        MediaFormat {
            format: Some(DecodedFormat::NV12),
            ..stream_format()
        }
    }

    /// Chunks with distinct payloads, 33ms apart, key frame first.
    pub(crate) fn stream_chunks(count: usize) -> Vec<EncodedChunk> {
        (0..count)
            .map(|i| EncodedChunk {
                data: vec![i as u8 + 1; 8 + i],
                timestamp_us: i as i64 * 33_000,
                key_frame: i == 0,
            })
            .collect()
    }

    pub(crate) fn dummy_candidate(device: DummyDevice) -> CodecCandidate {
        let mut slot = Some(device);
        CodecCandidate {
            name: "dummy.sw".into(),
            media_types: vec!["video/vp9".into()],
            factory: Box::new(move || {
                slot.take()
                    .map(|device| Box::new(device) as DynCodecDevice)
                    .ok_or(DeviceError::InvalidState)
            }),
        }
    }

    /// Tunings small enough that exhausting the retry loop is cheap.
    pub(crate) fn fast_options() -> AdapterOptions {
        AdapterOptions {
            surface: None,
            preferred_codec: None,
            tunings: ReadTunings {
                input_dequeue_timeout: Duration::from_millis(1),
                output_dequeue_timeout: Duration::from_millis(5),
                max_drain_attempts: 8,
            },
        }
    }

    pub(crate) fn decoder_over(
        device: DummyDevice,
        source: impl MediaSource + Send + 'static,
        options: AdapterOptions,
    ) -> (SyncDecoder, Arc<Mutex<DummyStats>>) {
        let stats = device.stats();
        let decoder =
            SyncDecoder::create(Box::new(source), vec![dummy_candidate(device)], options)
                .expect("no usable codec");
        (decoder, stats)
    }

    /// Source driven by a canned list of read outcomes.
    pub(crate) struct ScriptedSource {
        pub format: MediaFormat,
        pub reads: VecDeque<Result<Option<EncodedChunk>, SourceError>>,
        pub fail_start: bool,
    }

    impl ScriptedSource {
        pub(crate) fn new(
            reads: impl IntoIterator<Item = Result<Option<EncodedChunk>, SourceError>>,
        ) -> Self {
            Self {
                format: stream_format(),
                reads: reads.into_iter().collect(),
                fail_start: false,
            }
        }
    }

    impl MediaSource for ScriptedSource {
        fn start(&mut self) -> Result<(), SourceError> {
            if self.fail_start {
                Err(SourceError::Other(anyhow::anyhow!("scripted start failure")))
            } else {
                Ok(())
            }
        }

        fn stop(&mut self) -> Result<(), SourceError> {
            Ok(())
        }

        fn read(&mut self, _seek: Option<SeekTarget>) -> Result<Option<EncodedChunk>, SourceError> {
            self.reads.pop_front().unwrap_or(Ok(None))
        }

        fn format(&self) -> MediaFormat {
            self.format.clone()
        }
    }

    #[test]
    fn create_falls_back_to_second_candidate() {
        let allocations = Arc::new(AtomicUsize::new(0));

        let failing = DummyDevice::new(decoded_format()).failing_configure();
        let failing_stats = failing.stats();
        let mut failing_slot = Some(failing);
        let failing_allocs = Arc::clone(&allocations);
        let first = CodecCandidate {
            name: "dummy.hw".into(),
            media_types: vec!["video/vp9".into()],
            factory: Box::new(move || {
                failing_allocs.fetch_add(1, Ordering::SeqCst);
                failing_slot
                    .take()
                    .map(|device| Box::new(device) as DynCodecDevice)
                    .ok_or(DeviceError::InvalidState)
            }),
        };

        let winner_format = MediaFormat {
            resolution: Resolution::from((640, 480)),
            ..decoded_format()
        };
        let second = dummy_candidate(DummyDevice::new(winner_format.clone()));

        let source = ChunkSource::new(stream_format(), stream_chunks(1));
        let decoder = SyncDecoder::create(
            Box::new(source),
            vec![first, second],
            AdapterOptions::default(),
        )
        .expect("second candidate should configure");

        assert_eq!(allocations.load(Ordering::SeqCst), 1);
        // The failed candidate was released before the next was tried.
        assert_eq!(Arc::strong_count(&failing_stats), 1);
        assert_eq!(decoder.get_format(), Some(winner_format));
    }

    #[test]
    fn create_skips_candidates_of_other_media_types() {
        let allocations = Arc::new(AtomicUsize::new(0));
        let device = DummyDevice::new(decoded_format());
        let mut slot = Some(device);
        let allocs = Arc::clone(&allocations);
        let audio_only = CodecCandidate {
            name: "dummy.aac".into(),
            media_types: vec!["audio/aac".into()],
            factory: Box::new(move || {
                allocs.fetch_add(1, Ordering::SeqCst);
                slot.take()
                    .map(|device| Box::new(device) as DynCodecDevice)
                    .ok_or(DeviceError::InvalidState)
            }),
        };

        let source = ChunkSource::new(stream_format(), stream_chunks(1));
        let result = SyncDecoder::create(
            Box::new(source),
            vec![audio_only],
            AdapterOptions::default(),
        );

        assert!(matches!(result, Err(AdapterError::NoUsableCodec(t)) if t == "video/vp9"));
        assert_eq!(allocations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn preferred_candidate_is_tried_first() {
        let first = dummy_candidate(DummyDevice::new(decoded_format()));
        let preferred_format = MediaFormat {
            resolution: Resolution::from((1920, 1080)),
            ..decoded_format()
        };
        let mut second = dummy_candidate(DummyDevice::new(preferred_format.clone()));
        second.name = "dummy.preferred".into();

        let source = ChunkSource::new(stream_format(), stream_chunks(1));
        let decoder = SyncDecoder::create(
            Box::new(source),
            vec![first, second],
            AdapterOptions {
                preferred_codec: Some("dummy.preferred".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(decoder.get_format(), Some(preferred_format));
    }

    #[test]
    fn stop_from_init_is_invalid_and_harmless() {
        let source = ChunkSource::new(stream_format(), stream_chunks(1));
        let (decoder, _stats) =
            decoder_over(DummyDevice::new(decoded_format()), source, fast_options());

        assert!(matches!(
            decoder.stop(),
            Err(AdapterError::InvalidState(DecoderState::Init))
        ));
        // The failed stop left the state machine untouched.
        assert_eq!(decoder.get_format(), Some(decoded_format()));
        decoder.start().unwrap();
        decoder.stop().unwrap();
    }

    #[test]
    fn start_is_valid_only_once() {
        let source = ChunkSource::new(stream_format(), stream_chunks(1));
        let (decoder, _stats) =
            decoder_over(DummyDevice::new(decoded_format()), source, fast_options());

        decoder.start().unwrap();
        assert!(matches!(
            decoder.start(),
            Err(AdapterError::InvalidState(DecoderState::Started))
        ));
        decoder.stop().unwrap();
        assert!(matches!(
            decoder.start(),
            Err(AdapterError::InvalidState(DecoderState::Stopped))
        ));
        assert_eq!(decoder.get_format(), None);
    }

    #[test]
    fn source_start_failure_enters_error() {
        let mut source = ScriptedSource::new([]);
        source.fail_start = true;
        let (decoder, stats) =
            decoder_over(DummyDevice::new(decoded_format()), source, fast_options());

        assert!(matches!(decoder.start(), Err(AdapterError::Source(_))));
        assert_eq!(decoder.get_format(), None);
        // Error is absorbing: reads are inert and stop is out of contract.
        let polls = stats.lock().unwrap().output_polls;
        assert_eq!(decoder.read(None).unwrap(), ReadEvent::EndOfStream);
        assert_eq!(stats.lock().unwrap().output_polls, polls);
        assert!(matches!(
            decoder.stop(),
            Err(AdapterError::InvalidState(DecoderState::Error))
        ));
    }

    #[test]
    fn read_before_start_reports_end_of_stream() {
        let source = ChunkSource::new(stream_format(), stream_chunks(1));
        let (decoder, stats) =
            decoder_over(DummyDevice::new(decoded_format()), source, fast_options());

        assert_eq!(decoder.read(None).unwrap(), ReadEvent::EndOfStream);
        assert_eq!(stats.lock().unwrap().output_polls, 0);
    }

    #[test]
    fn stop_waits_for_a_blocked_read() {
        // No input slots and no pending output: the pump can only poll the
        // output queue, where the device waits out its timeout each time.
        let device = DummyDevice::new(decoded_format())
            .with_input_slots(0, 0)
            .blocking_on_empty();
        let source = ChunkSource::new(stream_format(), stream_chunks(1));
        let options = AdapterOptions {
            tunings: ReadTunings {
                input_dequeue_timeout: Duration::from_millis(1),
                output_dequeue_timeout: Duration::from_millis(50),
                max_drain_attempts: 1000,
            },
            ..Default::default()
        };
        let (decoder, stats) = decoder_over(device, source, options);
        decoder.start().unwrap();

        let decoder = Arc::new(decoder);
        let reader = {
            let decoder = Arc::clone(&decoder);
            std::thread::spawn(move || decoder.read(None))
        };
        std::thread::sleep(Duration::from_millis(100));
        decoder.stop().unwrap();

        // stop() only returned once the in-flight read had bailed out.
        let read_result = reader.join().unwrap();
        assert_eq!(read_result.unwrap(), ReadEvent::EndOfStream);
        assert!(stats.lock().unwrap().stopped);
        assert_eq!(decoder.get_format(), None);
    }
}
