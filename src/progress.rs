//! Progress reporting infrastructure

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::borrow::Cow;

/// CLI progress report of the ongoing run
///
/// To avoid corrupted terminal output, you should not write anything to
/// stdout or stderr yourself as long as a report is being displayed.
/// Please use logs for debug messages; the run summary is printed once
/// the bars are gone.
#[derive(Clone, Debug, Default)]
pub struct ProgressReport(MultiProgress);
//
impl ProgressReport {
    /// Prepare to report progress on the cli
    pub fn new() -> Self {
        Self::default()
    }

    /// Bar counting discrete steps, e.g. archives processed
    pub fn steps(&self, what: impl Into<Cow<'static, str>>, total: usize) -> ProgressBar {
        let bar = ProgressBar::new(total as u64)
            .with_prefix(what.into())
            .with_style(style("{prefix} {wide_bar} {pos}/{len}"));
        self.0.add(bar.clone());
        bar
    }

    /// Bar counting processed bytes
    ///
    /// Falls back to a running byte counter when the total is unknown
    /// (e.g. the server did not announce a content length).
    pub fn bytes(&self, what: impl Into<Cow<'static, str>>, total: Option<u64>) -> ProgressBar {
        let bar = match total {
            Some(total) => ProgressBar::new(total).with_style(style(
                "{prefix} {wide_bar} {decimal_bytes}/{decimal_total_bytes} ({decimal_bytes_per_sec})",
            )),
            None => ProgressBar::new_spinner()
                .with_style(style("{prefix} {spinner} {decimal_bytes} ({decimal_bytes_per_sec})")),
        };
        let bar = bar.with_prefix(what.into());
        self.0.add(bar.clone());
        bar
    }

    /// Spinner counting converted rows, total unknown until the end
    pub fn rows(&self, what: impl Into<Cow<'static, str>>) -> ProgressBar {
        let bar = ProgressBar::new_spinner()
            .with_prefix(what.into())
            .with_style(style("{prefix} {spinner} {human_pos} rows"));
        self.0.add(bar.clone());
        bar
    }

    /// Hide a finished bar from the report
    pub fn finish(&self, bar: ProgressBar) {
        bar.finish_and_clear();
        self.0.remove(&bar);
    }
}

/// Parse an indicatif style template
fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .expect("all templates in this module should be valid indicatif styles")
}

/// Human-readable byte size for log lines
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_picks_the_right_unit() {
        assert_eq!(human_bytes(0), "0.0 B");
        assert_eq!(human_bytes(512), "512.0 B");
        assert_eq!(human_bytes(2048), "2.0 KB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(human_bytes(7 * 1024 * 1024 * 1024 * 1024), "7.0 TB");
    }
}
