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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Priority for the mixing thread when LAYERLOOP_THREAD_PRIORITY is unset.
const DEFAULT_MIX_THREAD_PRIORITY: u8 = 70;

/// Reads LAYERLOOP_THREAD_PRIORITY (0-99), falling back to the default.
pub fn mix_thread_priority() -> Option<ThreadPriorityValue> {
    std::env::var("LAYERLOOP_THREAD_PRIORITY")
        .ok()
        .and_then(|v| parse_priority(&v))
        .or_else(|| ThreadPriorityValue::try_from(DEFAULT_MIX_THREAD_PRIORITY).ok())
}

fn parse_priority(value: &str) -> Option<ThreadPriorityValue> {
    let n = value.trim().parse::<u8>().ok()?;
    if n >= 100 {
        return None;
    }
    ThreadPriorityValue::try_from(n).ok()
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1"
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("on")
}

/// Whether to attempt SCHED_FIFO for the mixing thread. Opt out with
/// LAYERLOOP_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag("LAYERLOOP_DISABLE_RT_AUDIO")
}

/// Raises the priority of the calling thread. Failures are logged and otherwise ignored.
pub fn configure_mix_thread_priority() {
    let Some(priority) = mix_thread_priority() else {
        return;
    };
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Unable to raise mix thread priority");
    }

    #[cfg(unix)]
    if rt_audio_enabled() {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        match set_thread_priority_and_policy(
            thread_native_id(),
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => info!("Enabled RT SCHED_FIFO for mix thread"),
            Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for mix thread"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_priority() {
        assert!(parse_priority("50").is_some());
        assert!(parse_priority(" 0 ").is_some());
        assert!(parse_priority("100").is_none());
        assert!(parse_priority("high").is_none());
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("on"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
