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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{AudioMixer, BusFormat, Capture};
use crate::playsync::CancelHandle;

/// Runs the given block function every period until cancelled. Inside a tokio runtime this
/// runs on the runtime's clock, so paused-time tests drive the device deterministically.
/// Outside of one it falls back to a plain thread.
fn run_clocked<F>(period: Duration, cancel_handle: CancelHandle, mut block: F)
where
    F: FnMut() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => block(),
                        _ = cancel_handle.cancelled() => break,
                    }
                }
            });
        }
        Err(_) => {
            thread::spawn(move || {
                while !cancel_handle.is_cancelled() {
                    block();
                    thread::sleep(period);
                }
            });
        }
    }
}

/// A mock output device. Pulls the mix bus in fixed-size blocks on a virtual clock and
/// discards the result.
pub struct Device {
    name: String,
    format: BusFormat,
    block_frames: usize,
    /// Cancel handle for the running clock, if started.
    running: Mutex<Option<CancelHandle>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str, format: BusFormat, block_frames: usize) -> Device {
        Device {
            name: name.to_string(),
            format,
            block_frames: block_frames.max(1),
            running: Mutex::new(None),
        }
    }
}

impl super::Device for Device {
    fn start(&self, mixer: AudioMixer) -> Result<(), Box<dyn Error>> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let cancel_handle = CancelHandle::new();
        let block_frames = self.block_frames;
        let period = self.format.frames_to_duration(block_frames);
        let mut block = vec![0.0f32; block_frames * self.format.channels as usize];
        run_clocked(period, cancel_handle.clone(), move || {
            mixer.process_into_output(&mut block, block_frames);
        });

        info!(device = self.name, format = %self.format, "Started mock output.");
        *running = Some(cancel_handle);
        Ok(())
    }

    fn stop(&self) {
        if let Some(cancel_handle) = self.running.lock().take() {
            cancel_handle.cancel();
            info!(device = self.name, "Stopped mock output.");
        }
    }

    fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    fn format(&self) -> BusFormat {
        self.format
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(cancel_handle) = self.running.get_mut().take() {
            cancel_handle.cancel();
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// A mock input device. Produces a constant level on a virtual clock. Names containing
/// "denied" refuse microphone permission.
pub struct InputDevice {
    name: String,
    sample_rate: u32,
    block_frames: usize,
    permission: AtomicBool,
    /// The level produced while capturing, stored as f32 bits.
    level: Arc<AtomicU32>,
    /// The capture sink, shared with the clock. Dropped on stop.
    sink: Arc<Mutex<Option<crossbeam_channel::Sender<Capture>>>>,
    /// Cancel handle for the running clock, if capturing.
    capturing: Mutex<Option<CancelHandle>>,
}

impl InputDevice {
    /// Gets the given mock input device.
    pub fn get(name: &str, sample_rate: u32, block_frames: usize) -> InputDevice {
        InputDevice {
            name: name.to_string(),
            sample_rate,
            block_frames: block_frames.max(1),
            permission: AtomicBool::new(!name.contains("denied")),
            level: Arc::new(AtomicU32::new(0.5f32.to_bits())),
            sink: Arc::new(Mutex::new(None)),
            capturing: Mutex::new(None),
        }
    }

    /// Sets whether microphone permission will be granted.
    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::Relaxed);
    }

    /// Sets the constant level produced while capturing.
    pub fn set_level(&self, level: f32) {
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Simulates a device failure during capture.
    pub fn fail(&self, message: &str) {
        if let Some(sink) = self.sink.lock().as_ref() {
            let _ = sink.send(Capture::Failed(message.to_string()));
        }
    }

    /// Returns true while capturing.
    pub fn is_capturing(&self) -> bool {
        self.capturing.lock().is_some()
    }
}

impl super::InputDevice for InputDevice {
    fn request_permission(&self) -> bool {
        let granted = self.permission.load(Ordering::Relaxed);
        debug!(device = self.name, granted, "Microphone permission requested.");
        granted
    }

    fn start_capture(
        &self,
        sink: crossbeam_channel::Sender<Capture>,
    ) -> Result<(), Box<dyn Error>> {
        let mut capturing = self.capturing.lock();
        if capturing.is_some() {
            return Err(format!("{} is already capturing", self.name).into());
        }
        *self.sink.lock() = Some(sink);

        let cancel_handle = CancelHandle::new();
        let block_frames = self.block_frames;
        let level = self.level.clone();
        let shared_sink = self.sink.clone();
        let period = Duration::from_secs_f64(block_frames as f64 / self.sample_rate as f64);
        run_clocked(period, cancel_handle.clone(), move || {
            if let Some(sink) = shared_sink.lock().as_ref() {
                let level = f32::from_bits(level.load(Ordering::Relaxed));
                let _ = sink.send(Capture::Samples(vec![level; block_frames]));
            }
        });

        info!(device = self.name, "Started mock capture.");
        *capturing = Some(cancel_handle);
        Ok(())
    }

    fn stop_capture(&self) {
        if let Some(cancel_handle) = self.capturing.lock().take() {
            cancel_handle.cancel();
            info!(device = self.name, "Stopped mock capture.");
        }
        self.sink.lock().take();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl fmt::Display for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock input)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Device as _, InputDevice as _, PcmBuffer, PlayerNode};

    #[tokio::test(start_paused = true)]
    async fn test_mock_device_drives_mixer() {
        let format = BusFormat::new(1000, 1).unwrap();
        let mixer = AudioMixer::new(format);
        let node = Arc::new(PlayerNode::new(
            1,
            &PcmBuffer::new(vec![vec![0.5; 100]], 1000),
            format,
        )
        .unwrap());
        let completion = node.schedule();
        mixer.attach(node);

        let device = Device::get("mock-device", format, 10);
        device.start(mixer.clone()).unwrap();
        assert!(device.is_running());

        let start = tokio::time::Instant::now();
        completion.await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(90));
        assert!(elapsed <= Duration::from_millis(110));

        device.stop();
        assert!(!device.is_running());
        let processed = mixer.frames_processed();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mixer.frames_processed(), processed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_input_capture() {
        let device = InputDevice::get("mock-input", 1000, 50);
        assert!(device.request_permission());
        device.set_level(0.25);

        let (tx, rx) = crossbeam_channel::unbounded();
        device.start_capture(tx).unwrap();
        assert!(device.is_capturing());
        tokio::time::sleep(Duration::from_millis(120)).await;
        device.stop_capture();

        let blocks: Vec<Capture> = rx.iter().collect();
        assert!(blocks.len() >= 2);
        assert_eq!(blocks[0], Capture::Samples(vec![0.25; 50]));
    }

    #[test]
    fn test_mock_device_without_runtime() {
        let format = BusFormat::new(1000, 1).unwrap();
        let mixer = AudioMixer::new(format);
        let device = Device::get("mock-device", format, 10);
        device.start(mixer.clone()).unwrap();
        crate::testutil::eventually(
            || mixer.frames_processed() >= 30,
            "Mock device never pulled the mixer",
        );
        device.stop();
    }

    #[test]
    fn test_mock_input_denied() {
        let device = InputDevice::get("mock-denied", 1000, 50);
        assert!(!device.request_permission());
        device.set_permission(true);
        assert!(device.request_permission());
    }
}
