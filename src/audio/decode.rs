// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use super::pcm::PcmBuffer;

/// Error types for decoding an audio file into memory
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unable to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported audio file {0}")]
    Unsupported(String),

    #[error("Audio decode failed: {0}")]
    DecodeFailed(#[from] SymphoniaError),

    #[error("Audio file {0} contains no samples")]
    Empty(PathBuf),
}

/// Decodes the first audio track of the given file (WAV, MP3, FLAC, and anything else
/// symphonia understands) into memory at its native sample rate and channel count.
pub fn decode_file(path: &Path) -> Result<PcmBuffer, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // Create a hint to help the format registry guess the format
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Unsupported(format!("'{}': {}", path.display(), e)))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| {
            DecodeError::Unsupported(format!("'{}': no audio track found", path.display()))
        })?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params.sample_rate.ok_or_else(|| {
        DecodeError::Unsupported(format!("'{}': sample rate not specified", path.display()))
    })?;

    let mut decoder = get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(format!("'{}': {}", path.display(), e)))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(DecodeError::DecodeFailed(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => append_planar(decoded, &mut channels),
            Err(SymphoniaError::DecodeError(e)) => {
                // A single corrupt packet is skipped rather than failing the whole file.
                warn!(path = ?path, error = e, "Skipping undecodable packet");
            }
            Err(e) => return Err(DecodeError::DecodeFailed(e)),
        }
    }

    let buffer = PcmBuffer::new(channels, sample_rate);
    if buffer.is_empty() {
        return Err(DecodeError::Empty(path.to_path_buf()));
    }

    debug!(
        path = ?path,
        channels = buffer.channel_count(),
        sample_rate,
        frames = buffer.frame_length(),
        "Decoded audio file"
    );
    Ok(buffer)
}

/// Appends a decoded buffer to the planar channel storage, converting to f32.
fn append_planar(decoded: AudioBufferRef, channels: &mut Vec<Vec<f32>>) {
    match decoded {
        AudioBufferRef::F32(buf) => append_planes(&buf, channels, |sample| sample),
        AudioBufferRef::F64(buf) => append_planes(&buf, channels, |sample| sample as f32),
        AudioBufferRef::S8(buf) => append_planes(&buf, channels, scale_s8),
        AudioBufferRef::S16(buf) => append_planes(&buf, channels, scale_s16),
        AudioBufferRef::S24(buf) => append_planes(&buf, channels, |sample| {
            scale_s24(sample.inner())
        }),
        AudioBufferRef::S32(buf) => append_planes(&buf, channels, scale_s32),
        AudioBufferRef::U8(buf) => append_planes(&buf, channels, scale_u8),
        AudioBufferRef::U16(buf) => append_planes(&buf, channels, scale_u16),
        AudioBufferRef::U24(buf) => append_planes(&buf, channels, |sample| {
            scale_u24(sample.inner())
        }),
        AudioBufferRef::U32(buf) => append_planes(&buf, channels, scale_u32),
    }
}

fn append_planes<T, F>(buf: &AudioBuffer<T>, channels: &mut Vec<Vec<f32>>, convert: F)
where
    T: symphonia::core::sample::Sample,
    F: Fn(T) -> f32,
{
    let channel_count = buf.spec().channels.count();
    if channels.is_empty() {
        channels.resize(channel_count, Vec::new());
    }

    let planes = buf.planes();
    for (plane, channel) in planes.planes().iter().zip(channels.iter_mut()) {
        channel.extend(plane.iter().map(|sample| convert(*sample)));
    }
}

#[inline]
pub(crate) fn scale_s8(sample: i8) -> f32 {
    sample as f32 / (1i64 << 7) as f32
}

#[inline]
pub(crate) fn scale_s16(sample: i16) -> f32 {
    sample as f32 / (1i64 << 15) as f32
}

#[inline]
pub(crate) fn scale_s24(sample: i32) -> f32 {
    sample as f32 / (1i64 << 23) as f32
}

#[inline]
pub(crate) fn scale_s32(sample: i32) -> f32 {
    sample as f32 / (1i64 << 31) as f32
}

#[inline]
pub(crate) fn scale_u8(sample: u8) -> f32 {
    (sample as f32 / u8::MAX as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u16(sample: u16) -> f32 {
    (sample as f32 / u16::MAX as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u24(sample: u32) -> f32 {
    let max = (1u32 << 24) - 1;
    (sample as f32 / max as f32) * 2.0 - 1.0
}

#[inline]
pub(crate) fn scale_u32(sample: u32) -> f32 {
    (sample as f32 / u32::MAX as f32) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_wav;

    #[test]
    fn test_decode_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        write_wav(&path, &[vec![0.25f32, 0.5, -0.5], vec![-0.25, -0.5, 0.5]], 22050).unwrap();

        let buffer = decode_file(&path).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.sample_rate(), 22050);
        assert_eq!(buffer.frame_length(), 3);
        assert_eq!(buffer.channel(0), Some(&[0.25, 0.5, -0.5][..]));
        assert_eq!(buffer.channel(1), Some(&[-0.25, -0.5, 0.5][..]));
    }

    #[test]
    fn test_decode_int_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("int.wav");
        write_wav(&path, &[vec![i16::MAX, 0, i16::MIN]], 44100).unwrap();

        let buffer = decode_file(&path).unwrap();
        let channel = buffer.channel(0).unwrap();
        assert!((channel[0] - 1.0).abs() < 0.001);
        assert_eq!(channel[1], 0.0);
        assert_eq!(channel[2], -1.0);
    }

    #[test]
    fn test_decode_missing_file() {
        let result = decode_file(Path::new("/nonexistent/sample.wav"));
        assert!(matches!(result, Err(DecodeError::Unreadable { .. })));
    }

    #[test]
    fn test_decode_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        let result = decode_file(&path);
        assert!(result.is_err());
        assert!(!matches!(result, Err(DecodeError::Unreadable { .. })));
    }

    #[test]
    fn test_decode_empty_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_wav::<f32>(&path, &[Vec::new()], 44100).unwrap();

        let result = decode_file(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_scaling() {
        assert_eq!(scale_s16(0), 0.0);
        assert_eq!(scale_s16(i16::MIN), -1.0);
        assert_eq!(scale_u8(0), -1.0);
        assert_eq!(scale_u8(u8::MAX), 1.0);
        assert_eq!(scale_s8(i8::MIN), -1.0);
        assert_eq!(scale_s32(i32::MIN), -1.0);
        assert_eq!(scale_s24(-(1 << 23)), -1.0);
        assert_eq!(scale_u16(u16::MAX), 1.0);
        assert_eq!(scale_u24((1 << 24) - 1), 1.0);
        assert_eq!(scale_u32(0), -1.0);
    }
}
