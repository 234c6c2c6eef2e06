//! interop - Interoperability test engine
//!
//! Runs a protocol state machine pattern against live peers and reports
//! whether they interoperate.

use clap::{Parser, Subcommand};
use colored::Colorize;
use interop_core::{Pattern, RunOutcome, Termination};
use interop_server::{Config, RunControl, TestRunner};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "interop")]
#[command(about = "Interoperability test engine driven by protocol state machines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pattern to completion
    Run {
        /// Pattern file (.yaml, .yml or .json)
        pattern: PathBuf,

        /// Config file
        #[arg(short, long, env = "INTEROP_CONFIG")]
        config: Option<PathBuf>,

        /// Wait for a line on stdin before every state
        #[arg(long)]
        step: bool,

        /// Print the report once at the end instead of streaming it
        #[arg(long)]
        batch: bool,

        /// Listener bind address
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Do not accept inbound messages
        #[arg(long)]
        no_listener: bool,
    },

    /// Load and validate a pattern without running it
    Check {
        /// Pattern file (.yaml, .yml or .json)
        pattern: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { pattern } => {
            let pattern = match TestRunner::load_pattern(&pattern) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("{}: {}", "Invalid pattern".red(), e);
                    std::process::exit(1);
                }
            };
            print_pattern(&pattern);
        }
        Commands::Run {
            pattern,
            config,
            step,
            batch,
            bind,
            no_listener,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if step {
                config.runner.step_mode = true;
            }
            if batch {
                config.runner.realtime_report = false;
            }
            if let Some(addr) = bind {
                config.listener.bind_addr = addr;
            }
            if no_listener {
                config.listener.enabled = false;
            }

            let pattern = match TestRunner::load_pattern(&pattern) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("{}: {}", "Invalid pattern".red(), e);
                    std::process::exit(1);
                }
            };

            let success = run(config, pattern).await?;
            std::process::exit(if success { 0 } else { 1 });
        }
    }

    Ok(())
}

fn print_pattern(pattern: &Pattern) {
    println!("{} {}", "Pattern".green(), pattern.name().bold());
    println!("  first: {}", pattern.first());
    if let Some(checksum) = pattern.checksum() {
        println!("  checksum: {}", checksum);
    }
    for state in pattern.states().iter() {
        println!(
            "  {:<24} {:<13} {} transition(s)",
            state.label(),
            state.state_type().as_str(),
            state.transitions().len()
        );
        for transition in state.transitions() {
            let arrow = if transition.is_triggering() {
                "=>"
            } else {
                "->"
            };
            println!("      {} {}", arrow, transition.target);
        }
    }
}

async fn run(config: Config, pattern: Pattern) -> Result<bool, Box<dyn std::error::Error>> {
    let runner = TestRunner::new(config);
    let report = runner.report();
    let step_mode = runner.config().runner.step_mode;

    let outcome = runner
        .run_with(pattern, report, |control| wire_controls(control, step_mode))
        .await?;

    if !outcome.report.is_realtime() {
        print!("{}", outcome.report_text());
    }
    print_verdict(&outcome);
    Ok(outcome.success)
}

/// Ctrl-C stops the run; in step mode each stdin line releases one state.
fn wire_controls(control: RunControl, step_mode: bool) {
    if let Some(addr) = control.listener_addr {
        eprintln!("{} http://{}", "Listening on".green(), addr);
    }

    let handle = control.handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received interrupt, stopping run...");
        handle.stop();
    });

    if step_mode {
        eprintln!(
            "{}",
            "Step mode: Enter advances, 'c' continues, 'q' stops".dimmed()
        );
        let handle = control.handle;
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match line.trim() {
                    "c" | "continue" => {
                        handle.set_step_mode(false);
                        break;
                    }
                    "q" | "quit" => {
                        handle.stop();
                        break;
                    }
                    _ => handle.next(),
                }
            }
        });
    }
}

fn print_verdict(outcome: &RunOutcome) {
    match &outcome.termination {
        Termination::Completed { end_state } if outcome.success => {
            println!("{} (end state '{}')", "PASSED".green().bold(), end_state);
        }
        Termination::Completed { end_state } => {
            println!("{} (end state '{}')", "FAILED".red().bold(), end_state);
        }
        Termination::Failed { state, error } => {
            println!(
                "{} in state '{}': {} [{}]",
                "FAILED".red().bold(),
                state,
                error,
                error.error_code()
            );
        }
        Termination::Stopped { state } => {
            println!("{} at state '{}'", "STOPPED".yellow().bold(), state);
        }
    }
}
