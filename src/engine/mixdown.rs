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
use std::io::BufWriter;
use std::path::PathBuf;
use std::thread;

use hound::WavWriter;
use tracing::{error, info};

use crate::audio::BusFormat;

/// Writes tapped mix bus chunks to a WAV file on its own thread. The file is created lazily
/// when the first chunk arrives, so a recording that never produced audio leaves nothing
/// behind.
pub(crate) struct Mixdown {
    sender: Option<crossbeam_channel::Sender<Vec<f32>>>,
    writer_thread: Option<thread::JoinHandle<Option<PathBuf>>>,
}

impl Mixdown {
    /// Starts the writer thread for the given destination.
    pub(crate) fn start(path: PathBuf, format: BusFormat) -> Mixdown {
        let (sender, receiver) = crossbeam_channel::unbounded::<Vec<f32>>();
        let writer_thread = thread::spawn(move || write_chunks(path, format, receiver));
        Mixdown {
            sender: Some(sender),
            writer_thread: Some(writer_thread),
        }
    }

    /// A sender for the tap callback.
    pub(crate) fn sender(&self) -> Option<crossbeam_channel::Sender<Vec<f32>>> {
        self.sender.clone()
    }

    /// Waits for the writer to drain and finalize. Every other sender (the tap's) must already
    /// be dropped. Returns the path if a file was produced.
    pub(crate) fn finish(mut self) -> Option<PathBuf> {
        self.sender.take();
        self.writer_thread
            .take()
            .and_then(|thread| thread.join().ok())
            .flatten()
    }
}

impl Drop for Mixdown {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(thread) = self.writer_thread.take() {
            let _ = thread.join();
        }
    }
}

fn write_chunks(
    path: PathBuf,
    format: BusFormat,
    receiver: crossbeam_channel::Receiver<Vec<f32>>,
) -> Option<PathBuf> {
    let mut writer: Option<WavWriter<BufWriter<File>>> = None;
    let mut frames: usize = 0;

    for chunk in receiver.iter() {
        if writer.is_none() {
            match WavWriter::create(&path, format.wav_spec()) {
                Ok(created) => {
                    info!(path = ?path, "Opened mixdown file");
                    writer = Some(created);
                }
                Err(e) => {
                    error!(path = ?path, err = %e, "Unable to create mixdown file");
                    // Drain so the tap never blocks on a dead writer.
                    receiver.iter().for_each(drop);
                    return None;
                }
            }
        }
        if let Some(writer) = writer.as_mut() {
            for sample in chunk.iter() {
                if let Err(e) = writer.write_sample(*sample) {
                    error!(path = ?path, err = %e, "Mixdown write failed");
                    receiver.iter().for_each(drop);
                    return None;
                }
            }
            frames += chunk.len() / format.channels as usize;
        }
    }

    let writer = writer?;
    match writer.finalize() {
        Ok(()) => {
            info!(path = ?path, frames, "Finished mixdown");
            Some(path)
        }
        Err(e) => {
            error!(path = ?path, err = %e, "Unable to finalize mixdown file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_chunks_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixdown.wav");
        let mixdown = Mixdown::start(path.clone(), BusFormat::default());
        assert_eq!(mixdown.finish(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_chunks_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixdown.wav");
        let format = BusFormat::new(1000, 2).unwrap();
        let mixdown = Mixdown::start(path.clone(), format);
        let sender = mixdown.sender().unwrap();
        sender.send(vec![0.5, -0.5, 0.25, -0.25]).unwrap();
        sender.send(vec![0.1, 0.2]).unwrap();
        drop(sender);

        assert_eq!(mixdown.finish(), Some(path.clone()));
        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 1000);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.5, -0.5, 0.25, -0.25, 0.1, 0.2]);
    }
}
