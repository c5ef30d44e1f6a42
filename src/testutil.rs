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
use std::{error::Error, path::Path, sync::Once, time::Duration};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::config::{Resources, SamplerConfig};
use crate::events::{EngineEvent, EventReceiver};

static TRACING: Once = Once::new();

/// Installs a test subscriber once per process. Filter with RUST_LOG.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Writes planar channel data to an interleaved WAV file. f32 samples are written as 32-bit
/// float, i16 and i32 as integer PCM of that width.
pub fn write_wav<S: hound::Sample + Copy + 'static>(
    path: &Path,
    channels: &[Vec<S>],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let type_id = std::any::TypeId::of::<S>();
    let (sample_format, bits_per_sample) = if type_id == std::any::TypeId::of::<f32>() {
        (SampleFormat::Float, 32)
    } else if type_id == std::any::TypeId::of::<i16>() {
        (SampleFormat::Int, 16)
    } else if type_id == std::any::TypeId::of::<i32>() {
        (SampleFormat::Int, 32)
    } else {
        return Err("Unsupported sample format".into());
    };

    let num_channels = channels.len();
    assert!(
        num_channels > 0 && num_channels <= u16::MAX.into(),
        "Bad channel count!"
    );
    let mut writer = WavWriter::create(
        path,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample,
            sample_format,
        },
    )?;

    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;

    Ok(())
}

/// A configuration for tests: mock devices, a 1kHz mono bus mixed in 10 frame blocks, and
/// every directory inside the given scratch directory.
pub fn test_config(dir: &Path) -> SamplerConfig {
    let yaml = r#"
audio:
  output_device: mock-output
  input_device: mock-input
  sample_rate: 1000
  channels: 1
  block_frames: 10
engine:
  playback_tap_frames: 100
  recording_tap_frames: 50
"#;
    let config = SamplerConfig::from_yaml(yaml).unwrap();
    let documents = dir.join("documents");
    let temp = dir.join("temp");
    std::fs::create_dir_all(&documents).unwrap();
    std::fs::create_dir_all(&temp).unwrap();
    config.with_resources(Resources::new(dir.to_path_buf(), documents, temp))
}

/// Takes every event currently queued.
pub fn drain_events(receiver: &EventReceiver) -> Vec<EngineEvent> {
    receiver.try_iter().collect()
}

/// Waits on the runtime clock for an event matching the predicate, returning it. Events that
/// don't match are discarded. Panics after the timeout.
pub async fn wait_for_event<F>(receiver: &EventReceiver, timeout: Duration, predicate: F) -> EngineEvent
where
    F: Fn(&EngineEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        while let Ok(event) = receiver.try_recv() {
            if predicate(&event) {
                return event;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for event");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = std::time::Instant::now();
    let mut tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(100);

    loop {
        if predicate() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("{}", error_msg);
        }
        std::thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}
