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

//! In-memory PCM buffers at a file's native format.

use std::sync::Arc;
use std::time::Duration;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::format::BusFormat;

/// A fully decoded audio buffer, stored planar at the source's native sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct PcmBuffer {
    /// One Vec per channel, all the same length.
    channels: Vec<Vec<f32>>,
    /// Native sample rate of the data.
    sample_rate: u32,
}

impl PcmBuffer {
    /// Creates a buffer from planar channel data. Channels are truncated to the shortest one.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel.truncate(frames);
        }
        Self {
            channels,
            sample_rate,
        }
    }

    /// Creates a buffer from interleaved samples.
    pub fn from_interleaved(samples: &[f32], channel_count: u16, sample_rate: u32) -> Self {
        let num_channels = channel_count.max(1) as usize;
        let frames = samples.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(frames); num_channels];
        for frame in samples.chunks_exact(num_channels) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Returns the native sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of frames (samples per channel).
    pub fn frame_length(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Returns true if there is no audio in the buffer.
    pub fn is_empty(&self) -> bool {
        self.frame_length() == 0
    }

    /// Returns the playing time of the buffer.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_length() as f64 / self.sample_rate as f64)
    }

    /// Returns the samples for a single channel.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Returns a flat, read-only view of the first channel sized to the frame length. This
    /// is what waveform renderers draw.
    pub fn waveform(&self) -> Arc<[f32]> {
        Arc::from(self.channel(0).unwrap_or(&[]))
    }

    /// Converts the buffer into interleaved samples in the given bus format. The sample rate is
    /// converted with a sinc resampler. Narrower sources are duplicated across the bus channels
    /// and wider sources are folded down by averaging.
    pub fn to_bus(&self, format: BusFormat) -> Result<Vec<f32>, ResampleError> {
        if self.channels.is_empty() {
            return Ok(Vec::new());
        }

        let resampled = if self.sample_rate == format.sample_rate {
            self.channels.clone()
        } else {
            resample(&self.channels, self.sample_rate, format.sample_rate)?
        };
        Ok(map_channels(&resampled, format.channels as usize))
    }
}

/// Errors from converting a buffer to the bus rate.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResampleError {
    #[error("Unable to resample from {0}Hz to {1}Hz")]
    Failed(u32, u32),
}

/// Frames fed to the resampler per call.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Resamples planar channels, compensating for the resampler's delay so the output lines up
/// with the input and has exactly `ceil(frames * ratio)` frames.
fn resample(
    channels: &[Vec<f32>],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<Vec<f32>>, ResampleError> {
    let failed = |_| ResampleError::Failed(source_rate, target_rate);
    if source_rate == 0 || target_rate == 0 {
        return Err(ResampleError::Failed(source_rate, target_rate));
    }

    let frames = channels.first().map(Vec::len).unwrap_or(0);
    let ratio = target_rate as f64 / source_rate as f64;
    let expected = (frames as f64 * ratio).ceil() as usize;
    if frames == 0 {
        return Ok(vec![Vec::new(); channels.len()]);
    }

    let sinc_params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        1.0,
        sinc_params,
        RESAMPLE_CHUNK_FRAMES,
        channels.len(),
    )
    .map_err(|_e| ResampleError::Failed(source_rate, target_rate))?;

    let delay = resampler.output_delay();
    let mut output = vec![Vec::with_capacity(expected + delay); channels.len()];
    let append = |output: &mut Vec<Vec<f32>>, chunk: Vec<Vec<f32>>| {
        for (channel, samples) in output.iter_mut().zip(chunk) {
            channel.extend_from_slice(&samples);
        }
    };

    let mut position = 0;
    while position + resampler.input_frames_next() <= frames {
        let needed = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = channels
            .iter()
            .map(|channel| &channel[position..position + needed])
            .collect();
        append(&mut output, resampler.process(&chunk, None).map_err(failed)?);
        position += needed;
    }
    if position < frames {
        let chunk: Vec<&[f32]> = channels.iter().map(|channel| &channel[position..]).collect();
        append(
            &mut output,
            resampler.process_partial(Some(chunk.as_slice()), None).map_err(failed)?,
        );
    }

    // Flush the samples still held back by the filter.
    while output[0].len() < expected + delay {
        let flushed = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(failed)?;
        if flushed.first().map_or(true, Vec::is_empty) {
            break;
        }
        append(&mut output, flushed);
    }

    for channel in output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected, 0.0);
    }
    Ok(output)
}

/// Interleaves planar channels into `bus_channels` channels.
fn map_channels(channels: &[Vec<f32>], bus_channels: usize) -> Vec<f32> {
    let source_channels = channels.len();
    let frames = channels.first().map(Vec::len).unwrap_or(0);
    let mut output = Vec::with_capacity(frames * bus_channels);

    if source_channels <= bus_channels {
        for frame in 0..frames {
            for bus_channel in 0..bus_channels {
                output.push(channels[bus_channel % source_channels][frame]);
            }
        }
        return output;
    }

    // Bus channel n gets the average of source channels n, n + bus_channels, ...
    for frame in 0..frames {
        for bus_channel in 0..bus_channels {
            let (sum, count) = channels
                .iter()
                .skip(bus_channel)
                .step_by(bus_channels)
                .fold((0.0f32, 0usize), |(sum, count), channel| {
                    (sum + channel[frame], count + 1)
                });
            output.push(sum / count as f32);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved() {
        let buffer = PcmBuffer::from_interleaved(&[1.0, -1.0, 0.5, -0.5, 0.25], 2, 44100);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_length(), 2);
        assert_eq!(buffer.channel(0), Some(&[1.0, 0.5][..]));
        assert_eq!(buffer.channel(1), Some(&[-1.0, -0.5][..]));
    }

    #[test]
    fn test_waveform_is_first_channel() {
        let buffer = PcmBuffer::new(vec![vec![0.1, 0.2, 0.3], vec![0.9, 0.9, 0.9]], 8000);
        assert_eq!(&*buffer.waveform(), &[0.1, 0.2, 0.3]);
        assert_eq!(buffer.duration(), Duration::from_secs_f64(3.0 / 8000.0));
    }

    #[test]
    fn test_to_bus_mono_to_stereo() {
        let buffer = PcmBuffer::new(vec![vec![0.5, 0.8]], 1000);
        let bus = buffer.to_bus(BusFormat::new(1000, 2).unwrap()).unwrap();
        assert_eq!(bus, vec![0.5, 0.5, 0.8, 0.8]);
    }

    #[test]
    fn test_to_bus_folds_stereo_to_mono() {
        let buffer = PcmBuffer::new(vec![vec![1.0, 1.0], vec![0.0, 0.0]], 1000);
        let bus = buffer.to_bus(BusFormat::new(1000, 1).unwrap()).unwrap();
        assert_eq!(bus, vec![0.5, 0.5]);
    }

    #[test]
    fn test_to_bus_folds_quad_to_stereo() {
        let buffer = PcmBuffer::new(
            vec![vec![1.0], vec![0.5], vec![0.0], vec![0.0]],
            1000,
        );
        let bus = buffer.to_bus(BusFormat::new(1000, 2).unwrap()).unwrap();
        assert_eq!(bus, vec![0.5, 0.25]);
    }

    #[test]
    fn test_to_bus_resamples() {
        // Simple mono sine wave at 44100Hz
        let source_rate = 44100;
        let source: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / source_rate as f32).sin())
            .collect();
        let buffer = PcmBuffer::new(vec![source], source_rate);

        let bus = buffer.to_bus(BusFormat::new(48000, 1).unwrap()).unwrap();
        assert_eq!(bus.len(), 4800);

        // The resampled sine keeps its phase: compare against the ideal curve mid-buffer.
        for i in 1000..1010 {
            let expected = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin();
            assert!((bus[i] - expected).abs() < 0.1, "frame {}: {} vs {}", i, bus[i], expected);
        }
    }

    #[test]
    fn test_to_bus_stereo_preserves_channels() {
        let frames = 2048;
        let mut interleaved = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            interleaved.extend_from_slice(&[0.5, -0.5]);
        }
        let buffer = PcmBuffer::from_interleaved(&interleaved, 2, 44100);
        let bus = buffer.to_bus(BusFormat::new(48000, 2).unwrap()).unwrap();

        let bus_frames = (frames as f64 * 48000.0 / 44100.0).ceil() as usize;
        assert_eq!(bus.len(), bus_frames * 2);
        let middle = bus_frames / 2 * 2;
        assert!((bus[middle] - 0.5).abs() < 0.01);
        assert!((bus[middle + 1] + 0.5).abs() < 0.01);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = PcmBuffer::new(Vec::new(), 44100);
        assert!(buffer.is_empty());
        assert!(buffer.waveform().is_empty());
        assert!(buffer.to_bus(BusFormat::default()).unwrap().is_empty());
    }
}
