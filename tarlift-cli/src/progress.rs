//! Implementations of the library's progress callbacks that render progress bars.
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

/// Display a spinner while some long-running but unmeasurable task is running, then hide the
/// spinner when it finishes
pub(crate) async fn with_spinner<S, F, T>(quiet: bool, message: S, task: F) -> T
where
    S: Into<Cow<'static, str>>,
    F: Future<Output = T>,
{
    let spinner = if !quiet {
        indicatif::ProgressBar::new_spinner()
    } else {
        indicatif::ProgressBar::hidden()
    };

    spinner.set_style(
        indicatif::ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );

    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(message);

    let result = task.await;

    spinner.finish_and_clear();

    result
}

pub(crate) fn human_bytes(bytes: u64) -> String {
    byte_unit::Byte::from_bytes(bytes as u128)
        .get_appropriate_unit(true)
        .to_string()
}

fn bytes_bar(quiet: bool) -> indicatif::ProgressBar {
    let bar = if quiet {
        indicatif::ProgressBar::hidden()
    } else {
        indicatif::ProgressBar::new(0)
    };

    bar.set_style(
        indicatif::ProgressStyle::with_template(
            "{msg:20} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap()
        .progress_chars("=> "),
    );

    bar
}

/// Progress bar over the bytes of the destination archive as its parts land.
pub(crate) struct CreateProgressReport {
    bar: indicatif::ProgressBar,
}

impl CreateProgressReport {
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: bytes_bar(quiet),
        }
    }
}

impl tarlift::CreateProgressCallback for CreateProgressReport {
    fn objects_resolved(&self, count: usize, total_bytes: u64) {
        // headers and the trailer add a little on top; the bar length is adjusted as parts
        // complete
        self.bar.set_length(total_bytes);
        self.bar.set_message(format!("{} objects", count));
    }

    fn group_staged(&self, _index: usize, _size: u64) {
        self.bar.tick();
    }

    fn part_uploaded(&self, _part_number: i32, size: u64) {
        if self.bar.position() + size > self.bar.length().unwrap_or(0) {
            self.bar.set_length(self.bar.position() + size);
        }
        self.bar.inc(size);
    }

    fn archive_completed(&self, size: u64, _etag: &str) {
        self.bar.set_length(size);
        self.bar
            .finish_with_message(format!("wrote {}", human_bytes(size)));
    }
}

/// Progress bar over extracted members.
pub(crate) struct ExtractProgressReport {
    bar: indicatif::ProgressBar,
}

impl ExtractProgressReport {
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: bytes_bar(quiet),
        }
    }
}

impl tarlift::ExtractProgressCallback for ExtractProgressReport {
    fn extract_starting(&self, objects: usize, total_bytes: u64) {
        self.bar.set_length(total_bytes);
        self.bar.set_message(format!("{} objects", objects));
    }

    fn object_extracted(&self, _name: &str, size: u64) {
        self.bar.inc(size);
    }

    fn extract_finished(&self, objects: usize, total_bytes: u64) {
        self.bar.finish_with_message(format!(
            "extracted {} objects ({})",
            objects,
            human_bytes(total_bytes)
        ));
    }
}
