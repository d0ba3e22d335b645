use crate::error::{Result, SpeechError};
use std::path::Path;

/// Convert f32 samples in [-1.0, 1.0] to 16-bit little-endian PCM bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        pcm.extend_from_slice(&value.to_le_bytes());
    }
    pcm
}

/// Convert i16 samples to little-endian PCM bytes.
pub fn i16_to_pcm16(samples: &[i16]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    pcm
}

/// Read a 16 kHz mono WAV file into the raw PCM bytes the service expects.
///
/// Accepts 16-bit integer or 32-bit float samples. No resampling happens
/// here; files at other rates are rejected.
pub fn read_wav_pcm16(path: &Path) -> Result<Vec<u8>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| SpeechError::Audio(format!("Cannot open WAV file: {}", e)))?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(SpeechError::Audio(format!(
            "Expected mono audio, got {} channels",
            spec.channels
        )));
    }
    if spec.sample_rate != 16000 {
        return Err(SpeechError::Audio(format!(
            "Expected a 16000 Hz sample rate, got {}",
            spec.sample_rate
        )));
    }

    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let samples: std::result::Result<Vec<i16>, _> = reader.samples::<i16>().collect();
            let samples =
                samples.map_err(|e| SpeechError::Audio(format!("Bad WAV data: {}", e)))?;
            Ok(i16_to_pcm16(&samples))
        }
        (hound::SampleFormat::Float, 32) => {
            let samples: std::result::Result<Vec<f32>, _> = reader.samples::<f32>().collect();
            let samples =
                samples.map_err(|e| SpeechError::Audio(format!("Bad WAV data: {}", e)))?;
            Ok(f32_to_pcm16(&samples))
        }
        (format, bits) => Err(SpeechError::Audio(format!(
            "Unsupported sample format: {:?} {} bit",
            format, bits
        ))),
    }
}
