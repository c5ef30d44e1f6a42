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

//! Microphone capture to a WAV file in the documents directory.

use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level};

use crate::audio::{self, Capture};
use crate::config::SamplerConfig;
use crate::events::{EngineEvent, EventSender};
use crate::playsync::CancelHandle;
use crate::util::{amplitude_to_dbfs, block_levels, duration_minutes_seconds};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Microphone permission was denied")]
    PermissionDenied,

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Unable to create recording directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to create recording file: {0}")]
    Wav(#[from] hound::Error),

    #[error("Input device error: {0}")]
    Device(String),
}

/// A finished capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub path: PathBuf,
    /// False if the device failed or the file could not be finalized.
    pub success: bool,
    pub elapsed: Duration,
}

/// Levels measured since the meter last published.
#[derive(Default)]
struct Levels {
    rms: f32,
    peak: f32,
}

struct Session {
    path: PathBuf,
    started: tokio::time::Instant,
    meter_cancel: CancelHandle,
    writer_thread: thread::JoinHandle<bool>,
}

struct Inner {
    device: Arc<dyn audio::InputDevice>,
    events: EventSender,
    documents_dir: PathBuf,
    meter_interval: Duration,
    runtime: tokio::runtime::Handle,
    session: Mutex<Option<Session>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.meter_cancel.cancel();
            self.device.stop_capture();
            let _ = session.writer_thread.join();
        }
    }
}

/// Records the microphone into `<documents>/<uuid>.wav`, publishing elapsed time and levels
/// while it runs.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    /// Creates a recorder on the input device named in the configuration. Must be called from
    /// within a tokio runtime, which drives the meter.
    pub fn new(config: &SamplerConfig, events: EventSender) -> Result<Recorder, Box<dyn Error>> {
        let device = audio::get_input_device(config.audio())?;
        Self::with_device(device, config, events)
    }

    /// Creates a recorder on the given input device.
    pub fn with_device(
        device: Arc<dyn audio::InputDevice>,
        config: &SamplerConfig,
        events: EventSender,
    ) -> Result<Recorder, Box<dyn Error>> {
        Ok(Recorder {
            inner: Arc::new(Inner {
                device,
                events,
                documents_dir: config.resources().documents_dir(),
                meter_interval: config.recorder().meter_interval()?,
                runtime: tokio::runtime::Handle::try_current()?,
                session: Mutex::new(None),
            }),
        })
    }

    /// Asks for microphone permission and, if granted, starts capturing. Returns the path the
    /// capture is written to.
    pub fn start_recording(&self) -> Result<PathBuf, RecorderError> {
        let span = span!(Level::INFO, "start recording (microphone)");
        let _enter = span.enter();

        let mut session = self.inner.session.lock();
        if session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let granted = self.inner.device.request_permission();
        self.inner
            .events
            .emit(EngineEvent::RecordingPermission(granted));
        if !granted {
            warn!(device = %self.inner.device, "Microphone permission denied.");
            return Err(RecorderError::PermissionDenied);
        }

        std::fs::create_dir_all(&self.inner.documents_dir)?;
        let path = self
            .inner
            .documents_dir
            .join(format!("{}.wav", uuid::Uuid::new_v4()));
        let writer = WavWriter::create(
            &path,
            WavSpec {
                channels: 1,
                sample_rate: self.inner.device.sample_rate(),
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        )?;

        let levels = Arc::new(Mutex::new(Levels::default()));
        let (sink, captures) = crossbeam_channel::unbounded();
        let writer_thread = {
            let levels = levels.clone();
            let path = path.clone();
            thread::spawn(move || write_captures(&path, writer, captures, &levels))
        };

        if let Err(e) = self.inner.device.start_capture(sink) {
            error!(device = %self.inner.device, err = %e, "Unable to start capture.");
            let _ = writer_thread.join();
            let _ = std::fs::remove_file(&path);
            return Err(RecorderError::Device(e.to_string()));
        }

        let started = tokio::time::Instant::now();
        let meter_cancel = CancelHandle::new();
        self.inner.runtime.spawn(run_meter(
            self.inner.events.clone(),
            levels,
            started,
            self.inner.meter_interval,
            meter_cancel.clone(),
        ));

        info!(path = ?path, device = %self.inner.device, "Recording microphone.");
        *session = Some(Session {
            path: path.clone(),
            started,
            meter_cancel,
            writer_thread,
        });
        Ok(path)
    }

    /// Stops capturing and finalizes the file. Emits `RecordingFinished`.
    pub fn stop_recording(&self) -> Result<Recording, RecorderError> {
        let Some(session) = self.inner.session.lock().take() else {
            return Err(RecorderError::NotRecording);
        };

        session.meter_cancel.cancel();
        // Dropping the device's sink ends the writer.
        self.inner.device.stop_capture();
        let success = session.writer_thread.join().unwrap_or(false);
        let elapsed = session.started.elapsed();

        info!(
            path = ?session.path,
            success,
            elapsed = duration_minutes_seconds(elapsed),
            "Finished microphone recording."
        );
        self.inner.events.emit(EngineEvent::RecordingFinished {
            success,
            path: session.path.clone(),
        });
        Ok(Recording {
            path: session.path,
            success,
            elapsed,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Time since recording started, if recording.
    pub fn elapsed(&self) -> Option<Duration> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.started.elapsed())
    }
}

/// Writes capture blocks until the sink is dropped. Returns false if the device reported a
/// failure or the file could not be written.
fn write_captures(
    path: &Path,
    mut writer: WavWriter<BufWriter<File>>,
    captures: crossbeam_channel::Receiver<Capture>,
    levels: &Mutex<Levels>,
) -> bool {
    let mut success = true;
    let mut frames: usize = 0;
    for capture in captures.iter() {
        match capture {
            Capture::Samples(samples) => {
                if !success {
                    continue;
                }
                let (rms, peak) = block_levels(&samples);
                {
                    let mut levels = levels.lock();
                    levels.rms = rms;
                    levels.peak = levels.peak.max(peak);
                }
                for sample in samples.iter() {
                    if let Err(e) = writer.write_sample(*sample) {
                        error!(path = ?path, err = %e, "Capture write failed");
                        success = false;
                        break;
                    }
                }
                frames += samples.len();
            }
            Capture::Failed(reason) => {
                error!(path = ?path, reason = %reason, "Input device failed during capture");
                success = false;
            }
        }
    }

    if let Err(e) = writer.finalize() {
        error!(path = ?path, err = %e, "Unable to finalize capture file");
        return false;
    }
    debug!(path = ?path, frames, success, "Capture writer finished");
    success
}

/// Publishes elapsed time and levels every interval until cancelled. Peak is held between
/// publishes.
async fn run_meter(
    events: EventSender,
    levels: Arc<Mutex<Levels>>,
    started: tokio::time::Instant,
    interval: Duration,
    cancel_handle: CancelHandle,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = cancel_handle.cancelled() => return,
            _ = ticker.tick() => {
                let (rms, peak) = {
                    let mut levels = levels.lock();
                    let measured = (levels.rms, levels.peak);
                    levels.peak = 0.0;
                    measured
                };
                events.emit(EngineEvent::RecordingTimeChanged {
                    elapsed: started.elapsed(),
                    average_power: amplitude_to_dbfs(rms),
                    peak_power: amplitude_to_dbfs(peak),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock;
    use crate::events::{self, EventReceiver};
    use crate::testutil::{drain_events, init_tracing, test_config};

    fn setup(name: &str) -> (tempfile::TempDir, Arc<mock::InputDevice>, Recorder, EventReceiver) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(mock::InputDevice::get(name, 1000, 50));
        let (sender, receiver) = events::channel();
        let recorder =
            Recorder::with_device(device.clone(), &test_config(dir.path()), sender).unwrap();
        (dir, device, recorder, receiver)
    }

    /// Lets paused time advance while giving the writer thread real time to catch up.
    async fn wait_for_meter(events: &EventReceiver) -> (f32, f32) {
        for _ in 0..500 {
            for event in drain_events(events) {
                if let EngineEvent::RecordingTimeChanged {
                    average_power,
                    peak_power,
                    ..
                } = event
                {
                    if peak_power > crate::util::SILENCE_DBFS {
                        return (average_power, peak_power);
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(1));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("No meter reading arrived");
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_microphone() {
        let (dir, device, recorder, events) = setup("mock-input");
        device.set_level(0.5);

        let path = recorder.start_recording().unwrap();
        assert!(recorder.is_recording());
        assert!(path.starts_with(dir.path().join("documents")));
        assert!(matches!(
            recorder.start_recording(),
            Err(RecorderError::AlreadyRecording)
        ));

        let (average_power, peak_power) = wait_for_meter(&events).await;
        assert!((average_power + 6.02).abs() < 0.01);
        assert!((peak_power + 6.02).abs() < 0.01);

        let recording = recorder.stop_recording().unwrap();
        assert!(recording.success);
        assert_eq!(recording.path, path);
        assert!(!recorder.is_recording());
        assert!(!device.is_capturing());

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 1000);
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        assert!(reader.len() > 0);

        assert!(drain_events(&events).iter().any(|event| matches!(
            event,
            EngineEvent::RecordingFinished { success: true, path: finished } if *finished == path
        )));
        assert!(matches!(
            recorder.stop_recording(),
            Err(RecorderError::NotRecording)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied() {
        let (dir, _device, recorder, events) = setup("mock-denied");
        assert!(matches!(
            recorder.start_recording(),
            Err(RecorderError::PermissionDenied)
        ));
        assert!(!recorder.is_recording());

        let events = drain_events(&events);
        assert!(matches!(
            events.as_slice(),
            [EngineEvent::RecordingPermission(false)]
        ));
        assert!(!dir.path().join("documents").read_dir().unwrap().any(|_| true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_failure_marks_session_failed() {
        let (_dir, device, recorder, events) = setup("mock-input");
        recorder.start_recording().unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        device.fail("unplugged");

        let recording = recorder.stop_recording().unwrap();
        assert!(!recording.success);
        assert!(drain_events(&events).iter().any(|event| matches!(
            event,
            EngineEvent::RecordingFinished { success: false, .. }
        )));
    }
}
