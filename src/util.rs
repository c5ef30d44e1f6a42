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
use std::path::Path;
use std::time::Duration;

/// The quietest level reported by the meters, in dBFS.
pub const SILENCE_DBFS: f32 = -160.0;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Outputs the given duration in a minutes:seconds format.
pub fn duration_minutes_seconds(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    let secs = duration.as_secs() - minutes * 60;
    format!("{}:{:02}", minutes, secs)
}

/// Converts a linear amplitude to dBFS, floored at `SILENCE_DBFS`.
pub fn amplitude_to_dbfs(amplitude: f32) -> f32 {
    if amplitude <= 0.0 || amplitude.is_nan() {
        return SILENCE_DBFS;
    }
    (20.0 * amplitude.log10()).max(SILENCE_DBFS)
}

/// Returns the RMS and peak amplitude of a block of samples.
pub fn block_levels(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum = 0.0f64;
    let mut peak = 0.0f32;
    for sample in samples {
        sum += (*sample as f64) * (*sample as f64);
        peak = peak.max(sample.abs());
    }
    ((sum / samples.len() as f64).sqrt() as f32, peak)
}

#[cfg(test)]
mod test {
    use std::path::Path;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_duration_minutes_strings() {
        assert_eq!("0:00", duration_minutes_seconds(Duration::new(0, 0)));
        assert_eq!("0:05", duration_minutes_seconds(Duration::new(5, 0)));
        assert_eq!("1:00", duration_minutes_seconds(Duration::new(60, 0)));
        assert_eq!("2:05", duration_minutes_seconds(Duration::new(125, 0)));
        assert_eq!("60:06", duration_minutes_seconds(Duration::new(3606, 0)));
    }

    #[test]
    fn test_filename_display() {
        assert_eq!(filename_display(Path::new("/samples/piano_1.wav")), "piano_1.wav");
        assert_eq!(filename_display(Path::new("/")), "unreadable file name");
    }

    #[test]
    fn test_amplitude_to_dbfs() {
        assert_eq!(amplitude_to_dbfs(1.0), 0.0);
        assert!((amplitude_to_dbfs(0.5) + 6.0206).abs() < 1e-3);
        assert_eq!(amplitude_to_dbfs(0.0), SILENCE_DBFS);
        assert_eq!(amplitude_to_dbfs(1e-12), SILENCE_DBFS);
        assert_eq!(amplitude_to_dbfs(f32::NAN), SILENCE_DBFS);
    }

    #[test]
    fn test_block_levels() {
        assert_eq!(block_levels(&[]), (0.0, 0.0));
        let (rms, peak) = block_levels(&[0.5, -0.5, 0.5, -0.5]);
        assert!((rms - 0.5).abs() < 1e-6);
        assert_eq!(peak, 0.5);
        let (rms, peak) = block_levels(&[0.0, -1.0]);
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(peak, 1.0);
    }
}
