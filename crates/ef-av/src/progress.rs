//! Progress reporting for long-running encoder calls.

/// Sender for reporting progress from within encoder operations.
///
/// Wraps a callback that receives a progress percentage (0.0 -- 100.0) and a
/// short step description.
pub struct ProgressSender {
    callback: Box<dyn Fn(f32, &str) + Send + Sync>,
}

impl ProgressSender {
    pub fn new(callback: impl Fn(f32, &str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sender that discards all progress reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    pub fn send(&self, progress: f32, step: &str) {
        (self.callback)(progress, step);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// Accumulates `ffmpeg -progress` key/value lines into a percentage.
///
/// A percentage is produced at the end of each progress block
/// (`progress=continue` / `progress=end`) once `out_time_us` and the input
/// duration are both known.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    last_out_time_us: Option<i64>,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
            last_out_time_us: None,
        }
    }

    /// Feed one stderr line; returns a percentage at the end of a block.
    pub fn feed(&mut self, line: &str) -> Option<f32> {
        if let Some(val) = line.strip_prefix("out_time_us=") {
            self.last_out_time_us = val.trim().parse::<i64>().ok();
            return None;
        }
        let state = line.strip_prefix("progress=")?;
        if state.trim() == "end" {
            return Some(100.0);
        }
        let out_us = self.last_out_time_us?;
        let duration = self.duration_secs?;
        let elapsed = out_us.max(0) as f64 / 1_000_000.0;
        Some(((elapsed / duration).clamp(0.0, 1.0) * 100.0) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn parser_emits_at_block_end() {
        let mut parser = ProgressParser::new(Some(100.0));
        assert_eq!(parser.feed("frame=120"), None);
        assert_eq!(parser.feed("out_time_us=25000000"), None);
        assert_eq!(parser.feed("progress=continue"), Some(25.0));
        assert_eq!(parser.feed("out_time_us=250000000"), None);
        assert_eq!(parser.feed("progress=continue"), Some(100.0));
        assert_eq!(parser.feed("progress=end"), Some(100.0));
    }

    #[test]
    fn parser_without_duration_only_reports_end() {
        let mut parser = ProgressParser::new(None);
        parser.feed("out_time_us=1000");
        assert_eq!(parser.feed("progress=continue"), None);
        assert_eq!(parser.feed("progress=end"), Some(100.0));
    }

    #[test]
    fn parser_ignores_na_times() {
        let mut parser = ProgressParser::new(Some(10.0));
        parser.feed("out_time_us=N/A");
        assert_eq!(parser.feed("progress=continue"), None);
    }

    #[test]
    fn sender_invokes_callback() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();
        let sender = ProgressSender::new(move |pct, _| {
            seen_clone.store(pct as u32, Ordering::SeqCst);
        });
        sender.send(42.0, "encoding");
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        ProgressSender::noop().send(1.0, "ignored");
    }
}
