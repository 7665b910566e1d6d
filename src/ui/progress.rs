use crate::db::MatviewInfo;
use crate::errors::ErrorKind;
use crate::orchestrator::RunReport;
use crate::ui::icons::{CHECK, CLOCK, CROSS, PLUG, RECONNECT, SKIP, SPARKLE, VIEW, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for a pipeline run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Step bar: how many of the selected steps have finished
/// - Activity spinner: the step currently executing
///
/// When stdout is not a terminal the bars are hidden and lines are printed
/// directly. While the UI is alive, log lines clear the bars before writing.
pub struct PipelineUI {
    multi: MultiProgress,
    step_bar: ProgressBar,
    activity: ProgressBar,
    verbose: bool,
}

impl PipelineUI {
    /// Create the UI.
    ///
    /// # Arguments
    /// * `total_steps` - number of selected steps, sizes the step bar
    /// * `verbose` - also print connection lifecycle lines
    pub fn new(total_steps: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(total_steps));
        step_bar.set_style(step_style);
        step_bar.set_prefix("Steps");

        let activity_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let activity = multi.add(ProgressBar::new_spinner());
        activity.set_style(activity_style);
        activity.set_prefix("  SQL");

        crate::logging::attach_progress(&multi);

        Self {
            multi,
            step_bar,
            activity,
            verbose,
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() {
            println!("{}", msg.as_ref());
        } else if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn connecting(&self, target: &str) {
        self.activity
            .set_message(format!("Connecting to {}", style(target).cyan()));
        self.activity.enable_steady_tick(Duration::from_millis(100));
        if self.verbose {
            self.print_line(format!("{}Connecting to {}", PLUG, style(target).cyan()));
        }
    }

    pub fn connection_retry(&self, attempt: u32, max_attempts: u32) {
        self.print_line(format!(
            "  {}Connection attempt {}/{} failed, retrying",
            RECONNECT,
            attempt,
            max_attempts
        ));
    }

    pub fn connected(&self) {
        self.activity.set_message("Connected");
    }

    /// Mark the start of a step. Ordinals are shown against the plan length.
    pub fn start_step(&self, ordinal: u32, plan_len: usize, name: &str) {
        self.step_bar
            .set_message(format!("{}: {}", style(ordinal).yellow(), name));
        self.activity.reset_elapsed();
        self.activity
            .set_message(format!("Step {}/{}: {}", ordinal, plan_len, name));
        self.activity.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn reconnecting(&self, ordinal: u32) {
        self.activity
            .set_message(format!("Step {}: session closed, reconnecting", ordinal));
        self.print_line(format!(
            "  {}Session closed before step {}, reconnecting",
            RECONNECT,
            style(ordinal).yellow()
        ));
    }

    pub fn step_succeeded(&self, ordinal: u32, name: &str, duration_s: f64) {
        self.step_bar.inc(1);
        self.print_line(format!(
            "{}Step {} {} {}",
            CHECK,
            style(ordinal).green().bold(),
            name,
            style(format!("({:.1}s)", duration_s)).dim()
        ));
    }

    pub fn step_skipped(&self, ordinal: u32, name: &str, reason: &str) {
        self.step_bar.inc(1);
        self.print_line(format!(
            "{}Step {} {} {}",
            SKIP,
            style(ordinal).cyan().bold(),
            name,
            style(format!("({})", reason)).dim()
        ));
    }

    pub fn step_failed(&self, ordinal: u32, name: &str, kind: Option<ErrorKind>, error: &str) {
        self.step_bar.inc(1);
        let kind = kind.map(|k| k.as_str()).unwrap_or("unknown");
        self.print_line(format!(
            "{}Step {} {} {}",
            CROSS,
            style(ordinal).red().bold(),
            name,
            style(format!("[{}]", kind)).red()
        ));
        if !error.is_empty() {
            self.print_line(format!("      {}", style(error).dim()));
        }
    }

    /// Stop both bars. Call before printing the summary.
    pub fn finish(&self) {
        self.activity.finish_and_clear();
        self.step_bar.finish();
        crate::logging::detach_progress();
    }

    pub fn print_summary(&self, report: &RunReport) {
        println!();
        println!("{}", style("═".repeat(70)).cyan());
        if report.all_succeeded() {
            println!("{}{}", SPARKLE, style(report.summary_line()).green().bold());
        } else {
            println!("{}{}", WARN, style(report.summary_line()).yellow().bold());
            println!(
                "   {}",
                style("Some steps failed or were skipped; check the logs for details").yellow()
            );
        }
        println!(
            "{}{}",
            CLOCK,
            style(format!("Total time: {:.1}s", report.duration_seconds)).dim()
        );
        println!("{}", style("═".repeat(70)).cyan());
    }

    pub fn print_views(&self, schema: &str, views: &[MatviewInfo]) {
        println!();
        println!(
            "{}",
            style(format!("Materialized views in schema '{}':", schema)).underlined()
        );
        if views.is_empty() {
            println!("  {}", style("(none)").dim());
            return;
        }
        for view in views {
            let size = view.size.as_deref().unwrap_or("?");
            let populated = if view.populated {
                style("populated").green()
            } else {
                style("not populated").yellow()
            };
            println!(
                "  {}{} {} {}",
                VIEW,
                style(&view.name).bold(),
                style(size).dim(),
                populated
            );
        }
    }
}
