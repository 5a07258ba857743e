//! # prodbp - Main Entry Point
//!
//! Two subcommands:
//! - **notes** (`prodbp notes <FILE>`): list the SDT probes of any ELF file
//! - **demo** (`prodbp demo`): run a built-in handler under load with a
//!   breakpoint installed, and print where tracers attach

mod demo;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use prodbp::cli::{bpftrace_hint, format_notes, Args, Command, DemoArgs, NotesArgs};
use prodbp::notes::read_stapsdt_notes;
use prodbp::BreakpointType;

use demo::handle_request;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    // clap exits with status 2 on usage errors before run() sees them
    let args = Args::parse();
    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Notes(notes) => run_notes(&notes),
        Command::Demo(demo) => run_demo(demo),
    }
}

fn run_notes(args: &NotesArgs) -> Result<()> {
    let data = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let notes = read_stapsdt_notes(&data)
        .with_context(|| format!("Failed to parse ELF notes of {}", args.file.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&notes)?);
    } else if notes.is_empty() {
        println!("no stapsdt notes in {}", args.file.display());
    } else {
        println!("Displaying notes found in: {}", prodbp_common::NOTE_SECTION);
        print!("{}", format_notes(&notes));
    }
    Ok(())
}

/// Worker threads hammering the demo handler until `stop` is set
fn spawn_workers(
    threads: usize,
    stop: &Arc<AtomicBool>,
    calls: &Arc<AtomicU64>,
    failures: &Arc<AtomicU64>,
) -> Vec<JoinHandle<()>> {
    (0..threads as u64)
        .map(|worker| {
            let stop = Arc::clone(stop);
            let calls = Arc::clone(calls);
            let failures = Arc::clone(failures);
            std::thread::spawn(move || {
                let mut id = worker;
                while !stop.load(Ordering::Relaxed) {
                    if std::panic::catch_unwind(|| handle_request(id)).is_err() {
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                    calls.fetch_add(1, Ordering::Relaxed);
                    id += threads as u64;
                    std::thread::sleep(Duration::from_micros(200));
                }
            })
        })
        .collect()
}

/// Keep the demo's deliberate request failures off stderr
fn silence_demo_panics() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = info.payload().downcast_ref::<String>().map(String::as_str).unwrap_or("");
        if !(message.starts_with("request ") && message.ends_with(" failed")) {
            default_hook(info);
        }
    }));
}

#[tokio::main]
async fn run_demo(args: DemoArgs) -> Result<()> {
    let quiet = args.quiet;
    let kind = BreakpointType::from(args.kind);
    let controller = demo::controller(args.controller_config());

    let (start_line, end_line) = match args.region() {
        Some(region) => region,
        None => demo::default_region().context("Failed to locate the demo handler")?,
    };

    let bp = controller
        .install(kind, demo::SOURCE_PATH, start_line, end_line, args.trace_id.as_str())
        .context("Failed to install demo breakpoint")?;
    if !args.disabled {
        controller.enable(&bp.trace_id)?;
    }

    let pid = std::process::id();
    let location = controller.provider_location(&bp.provider_name);
    if !quiet {
        println!("prodbp v{}", env!("CARGO_PKG_VERSION"));
        println!("pid: {pid}");
        println!("breakpoint: {} ({kind}) on {}", bp.trace_id, bp.unit);
        println!("region: {}", bp.region);
        println!("provider: {} probe: {}", bp.provider_name, bp.name);
        println!("state: {}", if args.disabled { "disabled" } else { "enabled" });
    }
    match &location {
        Some(path) => {
            let path = path.display().to_string();
            println!("provider image: {path}");
            println!("attach with:\n  {}", bpftrace_hint(&path, &bp.provider_name, &bp.name, pid));
        }
        None => warn!("Provider image was not published; probes will not fire"),
    }

    silence_demo_panics();
    let stop = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let workers = spawn_workers(args.threads.max(1), &stop, &calls, &failures);

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit = if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };
    let mut stats_timer = Instant::now();
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        if !quiet && stats_timer.elapsed() > Duration::from_secs(5) {
            info!(
                "{} calls, {} failed",
                calls.load(Ordering::Relaxed),
                failures.load(Ordering::Relaxed)
            );
            stats_timer = Instant::now();
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        worker.join().ok();
    }

    let last = controller.uninstall(&bp.trace_id)?;
    if !quiet {
        eprintln!(
            "\n{}: {:.1}s, {} calls ({} failed), breakpoint {} {:?}",
            exit_reason,
            started.elapsed().as_secs_f64(),
            calls.load(Ordering::Relaxed),
            failures.load(Ordering::Relaxed),
            last.trace_id,
            last.state,
        );
    }
    Ok(())
}
