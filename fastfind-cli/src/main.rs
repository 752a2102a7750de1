use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use crossbeam_channel::RecvTimeoutError;
use fastfind::{
    config::CliOverrides, EntryId, JobReport, JobState, MatchKind, ProgressUpdate, QueueEvent,
    SearchConfig, SearchService,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Text to look for in file names (case-insensitive) and contents (exact bytes)
    query: String,

    /// Directories to search; each one is queued as its own job
    #[arg(default_value = ".")]
    roots: Vec<PathBuf>,

    /// Extension filter: "*.*" for all files, otherwise a pattern matched
    /// against the whole extension including the dot (e.g. "\.txt")
    #[arg(short = 'e', long = "ext")]
    extension_filter: Option<String>,

    /// Number of worker threads
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Match file names case-sensitively
    #[arg(long)]
    case_sensitive: bool,

    /// Match the query against the file name only, not the whole path
    #[arg(long)]
    file_name_only: bool,

    /// Treat the extension filter as a literal extension instead of a pattern
    #[arg(long)]
    literal_ext: bool,

    /// Paths to skip (glob format)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show only per-search statistics, not matches
    #[arg(short, long)]
    stats: bool,

    /// Print the final reports as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SearchConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?
        .merge_with_cli(CliOverrides {
            thread_count: cli.threads,
            log_level: cli.log_level.clone(),
            case_sensitive: cli.case_sensitive,
            file_name_only: cli.file_name_only,
            literal_extension: cli.literal_ext,
            extension_filter: cli.extension_filter.clone(),
            ignore_patterns: cli.ignore.clone(),
        });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(&cli, config)
}

fn run(cli: &Cli, config: SearchConfig) -> Result<()> {
    let service = SearchService::new(config)?;
    let interval = service.config().poll_interval();
    let extension_filter = service.config().extension_filter.clone();

    // Subscribe before submitting so no JobFinished can be missed
    let events = service.subscribe();
    let mut submitted = 0usize;
    for root in &cli.roots {
        service.submit_search(root.clone(), cli.query.clone(), extension_filter.clone())?;
        submitted += 1;
    }
    debug!("Queued {} searches for '{}'", submitted, cli.query);

    let bar = progress_bar(cli.no_progress || cli.json);
    let mut output = Output {
        bar: &bar,
        show_matches: !cli.stats && !cli.json,
        printed: HashMap::new(),
    };
    let mut feed = service.progress_feed();
    let mut reports = Vec::with_capacity(submitted);

    while reports.len() < submitted {
        output.render(feed.poll());

        match events.recv_timeout(interval) {
            Ok(QueueEvent::JobStarted { request, .. }) => {
                bar.reset();
                bar.set_message(request.to_string());
            }
            Ok(QueueEvent::JobFinished(report)) => {
                output.render(feed.poll());
                output.finish_job(&report);
                if !cli.json {
                    print_line(&bar, summary(&report));
                }
                reports.push(report);
            }
            Ok(QueueEvent::Drained) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("search service stopped unexpectedly"),
        }
    }
    bar.finish_and_clear();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    let failed = reports
        .iter()
        .filter(|r| matches!(r.state, JobState::Failed { .. }))
        .count();
    if failed > 0 {
        bail!("{} of {} searches failed", failed, reports.len());
    }
    Ok(())
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    let style = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Prints to stdout without tearing the progress bar
fn print_line(bar: &ProgressBar, line: String) {
    bar.suspend(|| println!("{line}"));
}

struct Output<'a> {
    bar: &'a ProgressBar,
    show_matches: bool,
    // Matches already printed per job, so the report only fills in the rest
    printed: HashMap<EntryId, usize>,
}

impl Output<'_> {
    fn render(&mut self, update: ProgressUpdate) {
        let Some(job) = update.job else {
            return;
        };
        self.bar.set_length(update.total_files as u64);
        self.bar.set_position(update.scanned_count as u64);

        let printed = self.printed.entry(job).or_default();
        for m in &update.matches_since_last_poll {
            if self.show_matches {
                print_line(self.bar, format_match(&m.path, m.kind));
            }
            *printed += 1;
        }
    }

    /// Prints whatever the feed did not deliver for a finished job
    fn finish_job(&mut self, report: &JobReport) {
        let printed = self.printed.remove(&report.id).unwrap_or(0);
        if !self.show_matches {
            return;
        }
        for m in report.matches.iter().skip(printed) {
            print_line(self.bar, format_match(&m.path, m.kind));
        }
    }
}

fn format_match(path: &std::path::Path, kind: MatchKind) -> String {
    let tag = match kind {
        MatchKind::Name => "name   ".green(),
        MatchKind::Content => "content".yellow(),
    };
    format!("{} {}", tag, path.display().to_string().blue())
}

fn summary(report: &JobReport) -> String {
    let elapsed = Duration::from_millis(report.elapsed.as_millis() as u64);
    match &report.state {
        JobState::Failed { reason } => format!(
            "{} {}: {}",
            "Failed".red(),
            report.request.root.display(),
            reason
        ),
        state => format!(
            "{} {}: {} matches in {} of {} files ({})",
            capitalize(&state.to_string()).bold(),
            report.request.root.display(),
            report.matches.len(),
            report.scanned_count,
            report.total_files,
            humantime::format_duration(elapsed)
        ),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
