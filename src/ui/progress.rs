use crate::harness::{LogProgress, ProgressSink};
use std::sync::Arc;
use std::time::Duration;

/// Progress sink for the terminal, or the log when bars are unavailable
pub fn progress_sink(bars: bool) -> Arc<dyn ProgressSink> {
    if bars {
        terminal()
    } else {
        Arc::new(LogProgress)
    }
}

#[cfg(feature = "progress-bars")]
fn terminal() -> Arc<dyn ProgressSink> {
    Arc::new(TerminalProgress::default())
}

#[cfg(not(feature = "progress-bars"))]
fn terminal() -> Arc<dyn ProgressSink> {
    Arc::new(LogProgress)
}

/// Remaining time, extrapolated from the rate so far
pub(crate) fn estimate_remaining(elapsed: Duration, percent: u8) -> Option<Duration> {
    if percent == 0 || percent >= 100 {
        return None;
    }
    let per_percent = elapsed.as_secs_f64() / f64::from(percent);
    Some(Duration::from_secs((per_percent * f64::from(100 - percent)).round() as u64))
}

/// Format a duration as H:MM:SS or M:SS
pub(crate) fn clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(feature = "progress-bars")]
pub use bar::TerminalProgress;

#[cfg(feature = "progress-bars")]
mod bar {
    use super::{clock, estimate_remaining};
    use crate::harness::ProgressSink;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::sync::{Mutex, PoisonError};
    use std::time::{Duration, Instant};

    const TEMPLATE: &str = "{spinner:.green} {msg:<28} [{bar:40.green/white}] {pos:>3}%  {prefix}";

    struct Active {
        bar: ProgressBar,
        started: Instant,
    }

    /// One indicatif bar per operation
    #[derive(Default)]
    pub struct TerminalProgress {
        active: Mutex<Option<Active>>,
    }

    impl ProgressSink for TerminalProgress {
        fn begin(&self, label: &str) {
            let style = ProgressStyle::with_template(TEMPLATE)
                .map(|s| s.progress_chars("█▓░"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            let bar = ProgressBar::new(100);
            bar.set_style(style);
            bar.set_message(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));

            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = active.replace(Active {
                bar,
                started: Instant::now(),
            }) {
                previous.bar.abandon();
            }
        }

        fn update(&self, percent: u8) {
            let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(active) = active.as_ref() {
                active.bar.set_position(u64::from(percent.min(100)));
                if let Some(eta) = estimate_remaining(active.started.elapsed(), percent) {
                    active.bar.set_prefix(format!("ETA {}", clock(eta)));
                }
            }
        }

        fn finish(&self, message: &str) {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(done) = active.take() {
                let elapsed = humantime::format_duration(Duration::from_secs(done.started.elapsed().as_secs()));
                done.bar.set_prefix(format!("in {}", elapsed));
                done.bar.finish_with_message(message.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, "0:00")]
    #[test_case(59, "0:59")]
    #[test_case(61, "1:01")]
    #[test_case(3600, "1:00:00")]
    #[test_case(3725, "1:02:05")]
    fn test_clock(secs: u64, expected: &str) {
        assert_eq!(clock(Duration::from_secs(secs)), expected);
    }

    #[test]
    fn test_estimate_remaining_extrapolates_rate() {
        // 25% in 60s leaves 75% at the same rate
        assert_eq!(
            estimate_remaining(Duration::from_secs(60), 25),
            Some(Duration::from_secs(180))
        );
        assert_eq!(
            estimate_remaining(Duration::from_secs(99), 99),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_no_estimate_at_the_ends() {
        assert_eq!(estimate_remaining(Duration::from_secs(10), 0), None);
        assert_eq!(estimate_remaining(Duration::from_secs(10), 100), None);
    }

    #[test]
    fn test_log_sink_when_bars_disabled() {
        let sink = progress_sink(false);
        sink.begin("Rebuilding pd3");
        sink.update(50);
        sink.finish("done");
    }

    #[cfg(feature = "progress-bars")]
    #[test]
    fn test_terminal_sink_tolerates_updates_without_begin() {
        let sink = TerminalProgress::default();
        sink.update(10);
        sink.finish("nothing running");
        sink.begin("Rebuilding pd3");
        sink.begin("Rebuilding pd4");
        sink.update(100);
        sink.finish("pd4 rebuild completed");
    }
}
