use mp3lame_encoder::{Bitrate, Builder, Encoder, FlushNoGap, InterleavedPcm};
use tracing::debug;

use crate::audio::AudioFrame;
use crate::error::{CaptureError, CaptureResult};

/// Samples per channel in one MPEG-1 Layer III frame
const MPEG_FRAME_SAMPLES: usize = 1152;

/// Worst-case size of the bytes LAME emits on flush
const FLUSH_BUFFER_SIZE: usize = 7200;

/// Streaming compressor fed one PCM frame at a time
pub trait FrameEncoder {
    /// Encode one interleaved frame; frames must arrive in playback order
    fn encode(&mut self, frame: &AudioFrame) -> CaptureResult<()>;

    /// Flush the encoder and return the complete compressed payload
    fn finish(self: Box<Self>) -> CaptureResult<Vec<u8>>;
}

/// Builds a fresh encoder for every finished track
pub trait EncoderFactory: Send + Sync {
    fn create(&self, sample_rate: u32, channels: u16, kbps: u16) -> CaptureResult<Box<dyn FrameEncoder>>;
}

/// Snap a requested bitrate down to the nearest LAME constant
pub fn bitrate_for(kbps: u16) -> Bitrate {
    match kbps {
        320.. => Bitrate::Kbps320,
        256..=319 => Bitrate::Kbps256,
        224..=255 => Bitrate::Kbps224,
        192..=223 => Bitrate::Kbps192,
        160..=191 => Bitrate::Kbps160,
        128..=159 => Bitrate::Kbps128,
        112..=127 => Bitrate::Kbps112,
        96..=111 => Bitrate::Kbps96,
        80..=95 => Bitrate::Kbps80,
        _ => Bitrate::Kbps64,
    }
}

/// LAME-backed MP3 encoder
pub struct LameEncoder {
    encoder: Encoder,
    channels: u16,
    output: Vec<u8>,
    samples_encoded: usize,
}

impl LameEncoder {
    pub fn new(sample_rate: u32, channels: u16, kbps: u16) -> CaptureResult<Self> {
        if channels != 2 {
            return Err(CaptureError::Configuration(format!(
                "LAME encoder needs interleaved stereo, got {} channels",
                channels
            )));
        }

        let mut builder = Builder::new()
            .ok_or_else(|| CaptureError::Encoding("Failed to allocate LAME encoder".to_string()))?;

        builder
            .set_num_channels(channels as u8)
            .map_err(|e| CaptureError::Encoding(format!("Failed to set channels: {:?}", e)))?;
        builder
            .set_sample_rate(sample_rate)
            .map_err(|e| CaptureError::Encoding(format!("Failed to set sample rate {}: {:?}", sample_rate, e)))?;
        builder
            .set_brate(bitrate_for(kbps))
            .map_err(|e| CaptureError::Encoding(format!("Failed to set bitrate {}: {:?}", kbps, e)))?;

        let encoder = builder
            .build()
            .map_err(|e| CaptureError::Encoding(format!("Failed to initialize LAME: {:?}", e)))?;

        debug!("LAME encoder ready: {}Hz, {} kbps", sample_rate, kbps);

        Ok(Self {
            encoder,
            channels,
            output: Vec::new(),
            samples_encoded: 0,
        })
    }

    fn encode_samples(&mut self, samples: &[i16]) -> CaptureResult<()> {
        let per_channel = samples.len() / self.channels as usize;
        self.output
            .reserve(mp3lame_encoder::max_required_buffer_size(per_channel));

        self.encoder
            .encode_to_vec(InterleavedPcm(samples), &mut self.output)
            .map_err(|e| CaptureError::Encoding(format!("LAME encode failed: {:?}", e)))?;

        self.samples_encoded += per_channel;
        Ok(())
    }
}

impl FrameEncoder for LameEncoder {
    fn encode(&mut self, frame: &AudioFrame) -> CaptureResult<()> {
        if frame.channels != self.channels {
            return Err(CaptureError::Encoding(format!(
                "Frame has {} channels, encoder expects {}",
                frame.channels, self.channels
            )));
        }

        if frame.samples.is_empty() {
            return Ok(());
        }

        self.encode_samples(&frame.samples)
    }

    fn finish(mut self: Box<Self>) -> CaptureResult<Vec<u8>> {
        // An empty track still becomes a playable file: one frame of silence
        if self.samples_encoded == 0 {
            let silence = vec![0i16; MPEG_FRAME_SAMPLES * self.channels as usize];
            self.encode_samples(&silence)?;
        }

        self.output.reserve(FLUSH_BUFFER_SIZE);
        self.encoder
            .flush_to_vec::<FlushNoGap>(&mut self.output)
            .map_err(|e| CaptureError::Encoding(format!("LAME flush failed: {:?}", e)))?;

        debug!(
            "LAME encoder finished: {} samples/channel -> {} bytes",
            self.samples_encoded,
            self.output.len()
        );

        Ok(self.output)
    }
}

/// Factory producing [`LameEncoder`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct LameEncoderFactory;

impl EncoderFactory for LameEncoderFactory {
    fn create(&self, sample_rate: u32, channels: u16, kbps: u16) -> CaptureResult<Box<dyn FrameEncoder>> {
        Ok(Box::new(LameEncoder::new(sample_rate, channels, kbps)?))
    }
}
