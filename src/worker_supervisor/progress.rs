//! Parsing of the codec tool's progress output.
//!
//! The tool reports structured progress as one `key=value` pair per line,
//! closed off by a `progress=continue` / `progress=end` line. Older builds
//! and alternative log levels emit classic single-line stats instead
//! (`time=… bitrate=… speed=…`); both shapes are handled here.

use std::sync::OnceLock;

use regex::Regex;

use crate::provider_registry::provider::ProgressTick;

/// Accumulates `key=value` lines into complete progress ticks.
#[derive(Debug, Default)]
pub struct ProgressAccumulator {
    pending: ProgressTick,
}

impl ProgressAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one output line. Returns a tick when the line completes one:
    /// either the structured stream's `progress=` terminator or a classic
    /// single-line stats report.
    pub fn push_line(&mut self, line: &str) -> Option<ProgressTick> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() > 1 {
            // Classic stats line; derive a tick directly from its tokens.
            return parse_classic_stats_line(&tokens);
        }

        let token = tokens[0];
        if let Some(value) = token.strip_prefix("progress=") {
            let mut tick = std::mem::take(&mut self.pending);
            tick.end = value.eq_ignore_ascii_case("end");
            return Some(tick);
        }
        merge_key_value(&mut self.pending, token);
        None
    }
}

fn parse_classic_stats_line(tokens: &[&str]) -> Option<ProgressTick> {
    let mut tick = ProgressTick::default();
    let mut matched = false;
    for token in tokens {
        if merge_key_value(&mut tick, token) {
            matched = true;
        }
    }
    if matched && tick.out_time_seconds.is_some() {
        Some(tick)
    } else {
        None
    }
}

fn merge_key_value(tick: &mut ProgressTick, token: &str) -> bool {
    if let Some(rest) = token.strip_prefix("out_time=") {
        tick.out_time_seconds = Some(parse_time_to_seconds(rest));
        true
    } else if let Some(rest) = token.strip_prefix("time=") {
        tick.out_time_seconds = Some(parse_time_to_seconds(rest));
        true
    } else if let Some(rest) = token
        .strip_prefix("out_time_us=")
        .or_else(|| token.strip_prefix("out_time_ms="))
    {
        // Both fields carry microseconds; `out_time_ms` is a historical
        // misnomer in the tool's progress protocol.
        if let Ok(us) = rest.parse::<f64>() {
            tick.out_time_seconds = Some(us / 1_000_000.0);
        }
        true
    } else if let Some(rest) = token.strip_prefix("frame=") {
        if let Ok(frames) = rest.parse::<u64>() {
            tick.frames = Some(frames);
        }
        true
    } else if let Some(rest) = token.strip_prefix("fps=") {
        if let Ok(fps) = rest.parse::<f64>() {
            tick.fps = Some(fps);
        }
        true
    } else if let Some(rest) = token.strip_prefix("bitrate=") {
        let value = rest.trim_end_matches("kbits/s");
        if let Ok(kbps) = value.parse::<f64>() {
            tick.bitrate_kbps = Some(kbps);
        }
        true
    } else if let Some(rest) = token.strip_prefix("total_size=") {
        if let Ok(bytes) = rest.parse::<u64>() {
            tick.total_size_bytes = Some(bytes);
        }
        true
    } else if let Some(rest) = token.strip_prefix("speed=") {
        let value = rest.trim_end_matches('x');
        if let Ok(speed) = value.parse::<f64>() {
            tick.speed = Some(speed);
        }
        true
    } else {
        false
    }
}

/// Parses `HH:MM:SS.ss` or a plain seconds value.
pub fn parse_time_to_seconds(s: &str) -> f64 {
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h = parts[0].parse::<f64>().unwrap_or(0.0);
            let m = parts[1].parse::<f64>().unwrap_or(0.0);
            let sec = parts[2].parse::<f64>().unwrap_or(0.0);
            return h * 3600.0 + m * 60.0 + sec;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Extracts the input duration from the tool's metadata header line,
/// e.g. `  Duration: 00:01:29.95, start: 0.000000, bitrate: 20814 kb/s`.
pub fn parse_duration_header(line: &str) -> Option<f64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid duration pattern")
    });
    let caps = re.captures(line)?;
    let h = caps[1].parse::<f64>().ok()?;
    let m = caps[2].parse::<f64>().ok()?;
    let s = caps[3].parse::<f64>().ok()?;
    let seconds = h * 3600.0 + m * 60.0 + s;
    if seconds > 0.0 {
        Some(seconds)
    } else {
        None
    }
}

/// Progress percent from elapsed media seconds, clamped into [0, 100].
/// Unknown duration reports 0 (indeterminate).
pub fn compute_progress_percent(total_duration: Option<f64>, elapsed_seconds: f64) -> f64 {
    match total_duration {
        Some(total) if total.is_finite() && total > 0.0 => {
            let elapsed = if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
                elapsed_seconds
            } else {
                0.0
            };
            let value = (elapsed / total * 100.0).clamp(0.0, 100.0);
            if value.is_finite() {
                value
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Estimated seconds remaining, when duration and a positive speed are
/// known.
pub fn estimate_eta_seconds(
    total_duration: Option<f64>,
    elapsed_seconds: f64,
    speed: f64,
) -> Option<f64> {
    let total = total_duration?;
    if !total.is_finite() || total <= 0.0 || !speed.is_finite() || speed <= 0.0 {
        return None;
    }
    let remaining = (total - elapsed_seconds).max(0.0);
    Some(remaining / speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_stream_emits_tick_on_progress_line() {
        let mut acc = ProgressAccumulator::new();
        assert!(acc.push_line("frame=120").is_none());
        assert!(acc.push_line("fps=24.5").is_none());
        assert!(acc.push_line("total_size=1048576").is_none());
        assert!(acc.push_line("out_time=00:00:05.000000").is_none());
        assert!(acc.push_line("speed=1.25x").is_none());

        let tick = acc.push_line("progress=continue").unwrap();
        assert_eq!(tick.frames, Some(120));
        assert_eq!(tick.fps, Some(24.5));
        assert_eq!(tick.total_size_bytes, Some(1048576));
        assert_eq!(tick.out_time_seconds, Some(5.0));
        assert_eq!(tick.speed, Some(1.25));
        assert!(!tick.end);
    }

    #[test]
    fn progress_end_marks_the_final_tick() {
        let mut acc = ProgressAccumulator::new();
        acc.push_line("out_time=00:00:10.000000");
        let tick = acc.push_line("progress=end").unwrap();
        assert!(tick.end);
        assert_eq!(tick.out_time_seconds, Some(10.0));
    }

    #[test]
    fn out_time_us_is_microseconds() {
        let mut acc = ProgressAccumulator::new();
        acc.push_line("out_time_us=2500000");
        let tick = acc.push_line("progress=continue").unwrap();
        assert_eq!(tick.out_time_seconds, Some(2.5));

        // The legacy ms-named field carries microseconds too.
        acc.push_line("out_time_ms=1000000");
        let tick = acc.push_line("progress=continue").unwrap();
        assert_eq!(tick.out_time_seconds, Some(1.0));
    }

    #[test]
    fn classic_stats_line_yields_an_immediate_tick() {
        let mut acc = ProgressAccumulator::new();
        let tick = acc
            .push_line("frame= 240 fps= 25 q=28.0 size= 1024kB time=00:00:09.60 bitrate=873.8kbits/s speed=1.2x")
            .unwrap();
        assert_eq!(tick.out_time_seconds, Some(9.6));
        assert_eq!(tick.bitrate_kbps, Some(873.8));
        assert_eq!(tick.speed, Some(1.2));
        assert!(!tick.end);
    }

    #[test]
    fn noise_lines_produce_nothing() {
        let mut acc = ProgressAccumulator::new();
        assert!(acc.push_line("").is_none());
        assert!(acc.push_line("Press [q] to stop, [?] for help").is_none());
        assert!(acc.push_line("Stream mapping:").is_none());
    }

    #[test]
    fn duration_header_is_extracted() {
        let line = "  Duration: 00:01:29.95, start: 0.000000, bitrate: 20814 kb/s";
        let seconds = parse_duration_header(line).unwrap();
        assert!((seconds - 89.95).abs() < 1e-9);
        assert!(parse_duration_header("Input #0, matroska, from 'in.mkv':").is_none());
    }

    #[test]
    fn time_parsing_accepts_both_shapes() {
        assert!((parse_time_to_seconds("01:02:03.5") - 3723.5).abs() < 1e-9);
        assert!((parse_time_to_seconds("42.25") - 42.25).abs() < 1e-9);
        assert_eq!(parse_time_to_seconds("garbage"), 0.0);
    }

    #[test]
    fn percent_for_known_duration_uses_elapsed_ratio() {
        assert!((compute_progress_percent(Some(120.0), 30.0) - 25.0).abs() < 1e-9);
        assert_eq!(compute_progress_percent(Some(120.0), 500.0), 100.0);
        assert_eq!(compute_progress_percent(Some(120.0), -5.0), 0.0);
    }

    #[test]
    fn percent_for_unknown_duration_is_zero() {
        assert_eq!(compute_progress_percent(None, 30.0), 0.0);
        assert_eq!(compute_progress_percent(Some(0.0), 30.0), 0.0);
    }

    #[test]
    fn eta_uses_speed_ratio() {
        let eta = estimate_eta_seconds(Some(120.0), 60.0, 2.0).unwrap();
        assert!((eta - 30.0).abs() < 1e-9);
        assert!(estimate_eta_seconds(None, 60.0, 2.0).is_none());
        assert!(estimate_eta_seconds(Some(120.0), 60.0, 0.0).is_none());
    }
}
