//! Progress meters.
//!
//! The pool reports through two small traits so that any progress display can
//! be attached, or none at all. With the `progress` feature both are implemented
//! for [`indicatif::ProgressBar`].

/// Counts completed tasks.
pub trait CompletionMeter: Send + Sync {
    fn increment(&self);

    /// Update the expected number of tasks; `None` means unknown.
    fn set_total(&self, _total: Option<u64>) {}

    fn finish(&self) {}
}

/// Shows how full the task buffer is.
pub trait DepthMeter: Send + Sync {
    fn set(&self, depth: usize);

    fn set_capacity(&self, _capacity: usize) {}

    fn finish(&self) {}
}

/// Meter that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMeter;

impl CompletionMeter for NoopMeter {
    fn increment(&self) {}
}

impl DepthMeter for NoopMeter {
    fn set(&self, _depth: usize) {}
}

#[cfg(feature = "progress")]
mod bars {
    use super::{CompletionMeter, DepthMeter};
    use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

    impl CompletionMeter for ProgressBar {
        fn increment(&self) {
            self.inc(1);
        }

        fn set_total(&self, total: Option<u64>) {
            if let Some(total) = total {
                self.set_length(total);
            }
        }

        fn finish(&self) {
            ProgressBar::finish(self);
        }
    }

    impl DepthMeter for ProgressBar {
        fn set(&self, depth: usize) {
            self.set_position(depth as u64);
        }

        fn set_capacity(&self, capacity: usize) {
            self.set_length(capacity as u64);
        }

        fn finish(&self) {
            self.finish_and_clear();
        }
    }

    /// Bar counting completed tasks.
    fn completion_bar(desc: Option<&str>, total: Option<usize>) -> ProgressBar {
        let pb = match total {
            Some(total) => ProgressBar::new(total as u64),
            None => ProgressBar::no_length(),
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("█▓▒░  "));
        }
        if let Some(desc) = desc {
            pb.set_prefix(desc.to_string());
        }
        pb
    }

    /// Bar showing the task buffer as `depth/capacity`.
    fn buffer_bar() -> ProgressBar {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template("Task buffer {pos}/{len}") {
            pb.set_style(style);
        }
        pb
    }

    /// The completion bar and the buffer bar of a map, stacked on one terminal.
    pub(crate) fn map_bars(
        desc: Option<&str>,
        total: Option<usize>,
        bar: bool,
        qbar: bool,
    ) -> (Option<ProgressBar>, Option<ProgressBar>) {
        let multi = MultiProgress::new();
        let completion = bar.then(|| multi.add(completion_bar(desc, total)));
        let buffer = qbar.then(|| multi.add(buffer_bar()));
        (completion, buffer)
    }
}

#[cfg(feature = "progress")]
pub(crate) use bars::map_bars;
