// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::Write;
/// Simple pull-mode player that can write decoded payloads into a file.
///
/// Decoding goes through the software dummy device, so the "decoded" payloads
/// are the encoded ones; the point is to exercise the adapter end to end.
use std::path::PathBuf;

use argh::FromArgs;
use pulldec::adapter::AdapterOptions;
use pulldec::adapter::CodecCandidate;
use pulldec::adapter::ReadEvent;
use pulldec::adapter::SyncDecoder;
use pulldec::backend::dummy::DummyDevice;
use pulldec::bitstream_utils::IvfIterator;
use pulldec::device::DeviceError;
use pulldec::device::DynCodecDevice;
use pulldec::source::ChunkSource;
use pulldec::source::EncodedChunk;
use pulldec::DecodedFormat;
use pulldec::MediaFormat;
use pulldec::Resolution;

/// Simple pull-mode player using pulldec
#[derive(Debug, FromArgs)]
struct Args {
    /// input IVF file
    #[argh(positional)]
    input: PathBuf,

    /// output file to write the decoded payloads to
    #[argh(option)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args: Args = argh::from_env();

    let input = std::fs::read(args.input).expect("error reading input file");
    let media_type = match input.get(8..12) {
        Some(codec) if codec == b"VP80" => "video/vp8",
        Some(codec) if codec == b"AV01" => "video/av1",
        _ => "video/vp9",
    };

    let chunks = IvfIterator::new(&input)
        .map(|frame| EncodedChunk {
            data: frame.data.to_vec(),
            timestamp_us: frame.timestamp as i64,
            key_frame: true,
        })
        .collect::<Vec<_>>();

    let stream_format = MediaFormat {
        media_type: media_type.to_string(),
        resolution: Resolution::from((320, 240)),
        format: None,
    };
    let output_format = MediaFormat {
        format: Some(DecodedFormat::NV12),
        ..stream_format.clone()
    };

    let mut device = Some(DummyDevice::new(output_format));
    let candidates = vec![CodecCandidate {
        name: "dummy.passthrough".into(),
        media_types: vec![
            "video/vp8".into(),
            "video/vp9".into(),
            "video/av1".into(),
        ],
        factory: Box::new(move || {
            device
                .take()
                .map(|device| Box::new(device) as DynCodecDevice)
                .ok_or(DeviceError::InvalidState)
        }),
    }];

    let source = Box::new(ChunkSource::new(stream_format, chunks));
    let decoder = SyncDecoder::create(source, candidates, AdapterOptions::default())
        .expect("failed to create decoder");
    decoder.start().expect("failed to start decoder");

    let mut output = args
        .output
        .map(|p| File::create(p).expect("error creating output file"));

    let mut frames = 0u32;
    loop {
        match decoder.read(None) {
            Ok(ReadEvent::Frame(frame)) => {
                frames += 1;
                if let Some(output) = &mut output {
                    output
                        .write_all(&frame.data)
                        .expect("failed to write to output file");
                }
            }
            Ok(ReadEvent::FormatChanged(format)) => {
                log::info!("output format changed: {:?}", format);
            }
            Ok(ReadEvent::EndOfStream) => break,
            Err(err) => panic!("read failed: {}", err),
        }
    }

    decoder.stop().expect("failed to stop decoder");
    println!("decoded {} frames", frames);
}
