//! `gots`: compile-and-run front end for the JIT engine in `gots-engine`.
//!
//! `gots [flags] <file>` compiles the named source (and everything it
//! transitively imports), maps it executable, runs its module entry
//! point to completion, and joins every task it spawned.

use clap::Parser;
use gots_engine::pipeline::{self, EngineOptions};
use notify::{recommended_watcher, Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

/// The 250 ms quiet window watch mode waits for after a filesystem
/// event before recompiling, so a save that touches several imported
/// files in quick succession triggers one re-run, not several.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "gots")]
#[command(about = "Run a .gts/.ts/.js source through the JIT engine")]
#[command(version)]
struct Cli {
    /// Source file to compile and run
    file: PathBuf,

    /// Re-run on modified source or any transitively imported file
    #[arg(short, long)]
    watch: bool,

    /// Emit without bounds-check/guard instructions
    #[arg(short, long)]
    production: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let options = EngineOptions {
        production: cli.production,
        ..EngineOptions::default()
    };

    let code = if cli.watch {
        run_watch(&cli.file, options)
    } else {
        run_once(&cli.file, &options)
    };
    std::process::exit(code);
}

fn run_once(file: &Path, options: &EngineOptions) -> i32 {
    match pipeline::run_file(file, options.clone()) {
        Ok(report) => {
            print_cycle_warnings(&report.import_cycle_edges);
            report.exit_code
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

/// One line per recorded circular-import edge (SPEC_FULL.md §C): the
/// module loader already detected and tolerated the cycle, so this is
/// reporting, not an error path.
fn print_cycle_warnings(edges: &[(PathBuf, PathBuf)]) {
    for (importer, target) in edges {
        eprintln!(
            "warning: circular import: {} -> {}",
            importer.display(),
            target.display()
        );
    }
}

/// Runs `file`, then waits for it (or anything it imports) to change
/// and re-runs, until a signal interrupts the process. Errors are
/// printed but never stop the watcher (spec.md §6: "the watcher keeps
/// running until the source changes").
fn run_watch(file: &Path, options: EngineOptions) -> i32 {
    let (tx, rx) = mpsc::channel();
    let mut watcher = match recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    }) {
        Ok(w) => w,
        Err(err) => {
            eprintln!("failed to start file watcher: {err}");
            return 1;
        }
    };

    let watch_root = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    if let Err(err) = watcher.watch(watch_root, RecursiveMode::Recursive) {
        eprintln!("failed to watch {}: {err}", watch_root.display());
        return 1;
    }

    loop {
        match pipeline::run_file(file, options.clone()) {
            Ok(report) => {
                print_cycle_warnings(&report.import_cycle_edges);
                print_status_line(&report.scheduler_stats);
            }
            Err(err) => eprintln!("{err}"),
        }

        // Block for the first event, then drain anything else that
        // arrives inside the debounce window before recompiling once.
        if rx.recv().is_err() {
            return 0;
        }
        while rx.recv_timeout(WATCH_DEBOUNCE).is_ok() {}
        tracing::debug!("source change detected, recompiling");
    }
}

/// Watch-mode status line (SPEC_FULL.md §C): printed after every
/// recompile-and-run so a developer watching the terminal can see how
/// many tasks the run spawned and whether they all settled before the
/// next re-run kicks off.
fn print_status_line(stats: &gots_engine::runtime::SchedulerStats) {
    eprintln!(
        "[gots] tasks spawned={} completed={} active={}",
        stats.tasks_spawned, stats.tasks_completed, stats.active_tasks
    );
}
