//! Structural check of encoded artifacts.

use anyhow::{Context, Result};
use std::io::Cursor;
use symphonia::core::codecs::CODEC_TYPE_MP3;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Stream parameters of an MP3 payload
#[derive(Debug, Clone, PartialEq)]
pub struct Mp3Info {
    pub sample_rate: Option<u32>,
    pub channels: Option<usize>,
    /// Number of decoded packets available in the stream
    pub packets: usize,
}

/// Probe an in-memory MP3 (tags included) and count its packets
pub fn probe_mp3(bytes: Vec<u8>) -> Result<Mp3Info> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Payload is not a recognizable audio stream")?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec == CODEC_TYPE_MP3)
        .context("No MP3 stream found")?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate;
    let channels = track.codec_params.channels.map(|c| c.count());

    let mut packets = 0;
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() == track_id {
            packets += 1;
        }
    }

    Ok(Mp3Info {
        sample_rate,
        channels,
        packets,
    })
}
