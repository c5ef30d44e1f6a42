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
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::audio::decode::{decode_file, DecodeError};
use crate::audio::{self, BusFormat, PcmBuffer, PlayerNode, ResampleError};
use crate::catalog::{CatalogSample, InstrumentKind};
use crate::util::filename_display;

/// Error types for loading a layer's audio.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error("Decoding timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Decode worker failed: {0}")]
    Worker(String),
}

/// A request to load a file as a new layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRequest {
    /// The catalog sample ID, or a generated ID for microphone captures.
    pub sample_id: String,
    /// The file to decode.
    pub path: PathBuf,
    /// The instrument family, which determines the layer's name.
    pub kind: InstrumentKind,
}

impl LayerRequest {
    /// A request for a bundled catalog sample.
    pub fn from_catalog(sample: &CatalogSample, resource_dir: &Path) -> LayerRequest {
        LayerRequest {
            sample_id: sample.id.to_string(),
            path: sample.path(resource_dir),
            kind: sample.kind,
        }
    }

    /// A request for a microphone capture. The sample ID is the file stem.
    pub fn microphone(path: PathBuf) -> LayerRequest {
        let sample_id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        LayerRequest {
            sample_id,
            path,
            kind: InstrumentKind::Microphone,
        }
    }
}

/// A decoded file, ready to attach to a mix bus.
pub struct LoadedAudio {
    /// The buffer at the file's native format.
    pub buffer: PcmBuffer,
    /// A node holding the buffer converted to the bus format.
    pub node: PlayerNode,
}

/// Decodes the file and converts it to the bus format on the blocking pool, giving up after
/// the timeout.
pub async fn load_audio(
    path: PathBuf,
    format: BusFormat,
    timeout: Duration,
) -> Result<LoadedAudio, LoadError> {
    let task = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<LoadedAudio, LoadError> {
            let buffer = decode_file(&path)?;
            let node = PlayerNode::new(audio::next_node_id(), &buffer, format)?;
            Ok(LoadedAudio { buffer, node })
        })
    };

    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(LoadError::TimedOut(timeout)),
        Ok(Err(join_error)) => Err(LoadError::Worker(join_error.to_string())),
        Ok(Ok(result)) => {
            let loaded = result?;
            debug!(
                file = filename_display(&path),
                frames = loaded.buffer.frame_length(),
                bus_frames = loaded.node.frame_length(),
                "Loaded buffer"
            );
            Ok(loaded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::testutil::write_wav;

    #[tokio::test]
    async fn test_load_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("piano_1.wav");
        write_wav(&path, &[vec![0.5f32; 64]], 8000).unwrap();

        let loaded = load_audio(path, BusFormat::new(8000, 2).unwrap(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(loaded.buffer.frame_length(), 64);
        assert_eq!(loaded.buffer.sample_rate(), 8000);
        assert_eq!(loaded.node.frame_length(), 64);
    }

    #[tokio::test]
    async fn test_load_audio_resamples_to_bus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guitar_1.wav");
        write_wav(&path, &[vec![0.5f32; 2205]], 22050).unwrap();

        let loaded = load_audio(path, BusFormat::new(44100, 1).unwrap(), Duration::from_secs(10))
            .await
            .unwrap();
        // The native buffer is kept for the waveform.
        assert_eq!(loaded.buffer.frame_length(), 2205);
        assert_eq!(loaded.node.frame_length(), 4410);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = load_audio(
            PathBuf::from("/nonexistent.wav"),
            BusFormat::default(),
            Duration::from_secs(10),
        )
        .await;
        assert!(matches!(
            result,
            Err(LoadError::Decode(DecodeError::Unreadable { .. }))
        ));
    }

    #[test]
    fn test_requests() {
        let sample = catalog::find("drum_1").unwrap();
        let request = LayerRequest::from_catalog(sample, Path::new("/res"));
        assert_eq!(request.sample_id, "drum_1");
        assert_eq!(request.path, PathBuf::from("/res/drum_1.wav"));
        assert_eq!(request.kind, InstrumentKind::Drum);

        let request = LayerRequest::microphone(PathBuf::from("/docs/abc.wav"));
        assert_eq!(request.sample_id, "abc");
        assert_eq!(request.kind, InstrumentKind::Microphone);
    }
}
