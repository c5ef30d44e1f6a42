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
use std::{
    collections::VecDeque,
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample as _;
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use super::{thread_priority, AudioMixer, BusFormat, Capture};

/// Bounded sample queue between the mixing thread and the cpal callback.
struct SampleRing {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Space available to write, in samples.
    fn space(&self) -> usize {
        self.capacity.saturating_sub(self.samples.lock().len())
    }

    /// Appends as many samples as fit. Returns the number written.
    fn write(&self, samples: &[f32]) -> usize {
        let mut queue = self.samples.lock();
        let to_write = self.capacity.saturating_sub(queue.len()).min(samples.len());
        queue.extend(&samples[..to_write]);
        to_write
    }

    /// Fills output from the front of the queue. Returns the number read.
    fn read(&self, output: &mut [f32]) -> usize {
        let mut queue = self.samples.lock();
        let to_read = queue.len().min(output.len());
        for (out, sample) in output.iter_mut().zip(queue.drain(..to_read)) {
            *out = sample;
        }
        to_read
    }
}

/// Threads backing a running output.
struct RunningOutput {
    running: Arc<AtomicBool>,
    producer_thread: Option<thread::JoinHandle<()>>,
    output_thread: Option<thread::JoinHandle<()>>,
}

impl RunningOutput {
    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.producer_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

/// A small wrapper around a cpal output device. The mix bus is pulled by a producer thread
/// into a ring buffer, and the cpal callback drains it. The stream itself lives on its own
/// thread because cpal streams are not Send.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The sample format of the device's default output config.
    sample_format: cpal::SampleFormat,
    /// The mix bus format.
    format: BusFormat,
    /// Frames per mixed block.
    block_frames: usize,
    /// The running output, if started.
    output: Mutex<Option<RunningOutput>>,
}

impl Device {
    /// Gets the given cpal output device. "default" selects the host's default output.
    pub fn get(name: &str, format: BusFormat, block_frames: usize) -> Result<Device, Box<dyn Error>> {
        let host = cpal::default_host();
        let device = if name == "default" {
            host.default_output_device()
        } else {
            host.output_devices()?
                .find(|device| device.name().map(|n| n.trim() == name).unwrap_or(false))
        }
        .ok_or_else(|| format!("no output device found with name {}", name))?;

        let sample_format = device.default_output_config()?.sample_format();
        Ok(Device {
            name: device.name()?,
            host_id: host.id(),
            device,
            sample_format,
            format,
            block_frames: block_frames.max(1),
            output: Mutex::new(None),
        })
    }

    fn build_stream(
        device: &cpal::Device,
        sample_format: cpal::SampleFormat,
        format: BusFormat,
        ring: Arc<SampleRing>,
    ) -> Result<cpal::Stream, Box<dyn Error>> {
        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let err_fn = |err: cpal::StreamError| error!("CPAL output stream error: {}", err);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let read = ring.read(data);
                    data[read..].fill(0.0);
                },
                err_fn,
                None,
            )?,
            cpal::SampleFormat::I16 => {
                device.build_output_stream(&config, converting_callback::<i16>(ring), err_fn, None)?
            }
            cpal::SampleFormat::I32 => {
                device.build_output_stream(&config, converting_callback::<i32>(ring), err_fn, None)?
            }
            cpal::SampleFormat::U16 => {
                device.build_output_stream(&config, converting_callback::<u16>(ring), err_fn, None)?
            }
            other => return Err(format!("unsupported output sample format {:?}", other).into()),
        };
        Ok(stream)
    }
}

/// Integer callback: read from the ring and convert.
fn converting_callback<T>(
    ring: Arc<SampleRing>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        scratch.resize(data.len(), 0.0f32);
        let read = ring.read(&mut scratch);
        scratch[read..].fill(0.0);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

impl super::Device for Device {
    fn start(&self, mixer: AudioMixer) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "start output (cpal)");
        let _enter = span.enter();

        let mut output = self.output.lock();
        if output.is_some() {
            return Ok(());
        }

        let channels = self.format.channels as usize;
        // Roughly 100ms of audio between the mixer and the callback.
        let capacity = (self.format.sample_rate as usize * channels / 10).max(1024);
        let ring = Arc::new(SampleRing::new(capacity));
        let running = Arc::new(AtomicBool::new(true));

        let producer_thread = {
            let ring = ring.clone();
            let running = running.clone();
            let block_frames = self.block_frames;
            thread::spawn(move || {
                thread_priority::configure_mix_thread_priority();
                let block_samples = block_frames * channels;
                let mut scratch = vec![0.0f32; block_samples];
                while running.load(Ordering::Acquire) {
                    if ring.space() >= block_samples {
                        mixer.process_into_output(&mut scratch, block_frames);
                        ring.write(&scratch);
                    } else {
                        thread::sleep(Duration::from_micros(500));
                    }
                }
            })
        };

        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let output_thread = {
            let device = self.device.clone();
            let sample_format = self.sample_format;
            let format = self.format;
            let running = running.clone();
            thread::spawn(move || {
                let stream = match Device::build_stream(&device, sample_format, format, ring)
                    .and_then(|stream| {
                        stream.play()?;
                        Ok(stream)
                    }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = started_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = started_tx.send(Ok(()));

                while running.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
            })
        };

        let mut running_output = RunningOutput {
            running,
            producer_thread: Some(producer_thread),
            output_thread: Some(output_thread),
        };

        match started_rx.recv() {
            Ok(Ok(())) => {
                info!(device = self.name, format = %self.format, "CPAL output stream started");
                *output = Some(running_output);
                Ok(())
            }
            Ok(Err(e)) => {
                running_output.shutdown();
                Err(format!("failed to start output stream on {}: {}", self.name, e).into())
            }
            Err(_) => {
                running_output.shutdown();
                Err(format!("output thread for {} exited unexpectedly", self.name).into())
            }
        }
    }

    fn stop(&self) {
        if let Some(mut running_output) = self.output.lock().take() {
            running_output.shutdown();
            info!(device = self.name, "CPAL output stream stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.output.lock().is_some()
    }

    fn format(&self) -> BusFormat {
        self.format
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(mut running_output) = self.output.get_mut().take() {
            running_output.shutdown();
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.host_id.name())
    }
}

/// Capture thread state for a running input stream.
struct RunningCapture {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

/// A cpal input device. Captured audio is downmixed to mono and sent to the capture sink.
pub struct InputDevice {
    name: String,
    host_id: cpal::HostId,
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    /// The capture sink, shared with the stream callback. Dropped on stop.
    sink: Arc<Mutex<Option<crossbeam_channel::Sender<Capture>>>>,
    capture: Mutex<Option<RunningCapture>>,
}

impl InputDevice {
    /// Gets the given cpal input device. "default" selects the host's default input.
    pub fn get(name: &str) -> Result<InputDevice, Box<dyn Error>> {
        let host = cpal::default_host();
        let device = if name == "default" {
            host.default_input_device()
        } else {
            host.input_devices()?
                .find(|device| device.name().map(|n| n.trim() == name).unwrap_or(false))
        }
        .ok_or_else(|| format!("no input device found with name {}", name))?;

        let config = device.default_input_config()?;
        Ok(InputDevice {
            name: device.name()?,
            host_id: host.id(),
            device,
            config,
            sink: Arc::new(Mutex::new(None)),
            capture: Mutex::new(None),
        })
    }

    fn build_stream(
        device: &cpal::Device,
        config: &cpal::SupportedStreamConfig,
        sink: Arc<Mutex<Option<crossbeam_channel::Sender<Capture>>>>,
    ) -> Result<cpal::Stream, Box<dyn Error>> {
        let stream_config: cpal::StreamConfig = config.clone().into();
        let channels = stream_config.channels.max(1) as usize;
        let error_sink = sink.clone();
        let err_fn = move |err: cpal::StreamError| {
            error!("CPAL input stream error: {}", err);
            if let Some(sink) = error_sink.lock().as_ref() {
                let _ = sink.send(Capture::Failed(err.to_string()));
            }
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                downmixing_callback::<f32>(channels, sink),
                err_fn,
                None,
            )?,
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                downmixing_callback::<i16>(channels, sink),
                err_fn,
                None,
            )?,
            cpal::SampleFormat::I32 => device.build_input_stream(
                &stream_config,
                downmixing_callback::<i32>(channels, sink),
                err_fn,
                None,
            )?,
            cpal::SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                downmixing_callback::<u16>(channels, sink),
                err_fn,
                None,
            )?,
            other => return Err(format!("unsupported input sample format {:?}", other).into()),
        };
        Ok(stream)
    }
}

/// Input callback: average each frame down to mono and hand it to the sink.
fn downmixing_callback<T>(
    channels: usize,
    sink: Arc<Mutex<Option<crossbeam_channel::Sender<Capture>>>>,
) -> impl FnMut(&[T], &cpal::InputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    move |data: &[T], _: &cpal::InputCallbackInfo| {
        let mono: Vec<f32> = data
            .chunks(channels)
            .map(|frame| {
                frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / frame.len() as f32
            })
            .collect();
        if let Some(sink) = sink.lock().as_ref() {
            let _ = sink.send(Capture::Samples(mono));
        }
    }
}

impl super::InputDevice for InputDevice {
    fn request_permission(&self) -> bool {
        // Hosts without an explicit permission model refuse at config time instead.
        self.device.default_input_config().is_ok()
    }

    fn start_capture(
        &self,
        sink: crossbeam_channel::Sender<Capture>,
    ) -> Result<(), Box<dyn Error>> {
        let mut capture = self.capture.lock();
        if capture.is_some() {
            return Err(format!("{} is already capturing", self.name).into());
        }
        *self.sink.lock() = Some(sink);

        let running = Arc::new(AtomicBool::new(true));
        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let thread = {
            let device = self.device.clone();
            let config = self.config.clone();
            let sink = self.sink.clone();
            let running = running.clone();
            thread::spawn(move || {
                let stream = match InputDevice::build_stream(&device, &config, sink).and_then(
                    |stream| {
                        stream.play()?;
                        Ok(stream)
                    },
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = started_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = started_tx.send(Ok(()));

                while running.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
            })
        };

        match started_rx.recv() {
            Ok(Ok(())) => {
                info!(device = self.name, "CPAL input stream started");
                *capture = Some(RunningCapture {
                    running,
                    thread: Some(thread),
                });
                Ok(())
            }
            result => {
                let _ = thread.join();
                self.sink.lock().take();
                let message = match result {
                    Ok(Err(e)) => e,
                    _ => "capture thread exited unexpectedly".to_string(),
                };
                Err(format!("failed to start capture on {}: {}", self.name, message).into())
            }
        }
    }

    fn stop_capture(&self) {
        if let Some(mut capture) = self.capture.lock().take() {
            capture.running.store(false, Ordering::Release);
            if let Some(thread) = capture.thread.take() {
                let _ = thread.join();
            }
            info!(device = self.name, "CPAL input stream stopped");
        }
        self.sink.lock().take();
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }
}

impl fmt::Display for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.config.channels(),
            self.host_id.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_ring_bounds() {
        let ring = SampleRing::new(4);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(ring.space(), 1);
        assert_eq!(ring.write(&[4.0, 5.0]), 1);

        let mut output = [0.0; 3];
        assert_eq!(ring.read(&mut output), 3);
        assert_eq!(output, [1.0, 2.0, 3.0]);

        let mut output = [0.0; 3];
        assert_eq!(ring.read(&mut output), 1);
        assert_eq!(output[0], 4.0);
    }
}
