//! Interactive data-analysis agent.
//!
//! Loads the given CSV files into a stateful sandbox, then answers
//! free-text questions about them in a REPL until `:q`. The sandbox is
//! shut down exactly once on every exit path.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use analyst::io::config::load_config;
use analyst::io::llm::{CompletionClient, HttpCompletionClient};
use analyst::io::sandbox::{PythonSandbox, Sandbox};
use analyst::logging;
use analyst::session::{AnalysisReport, AnalysisSession};

/// Token that ends the interactive loop.
const QUIT_TOKEN: &str = ":q";

#[derive(Parser)]
#[command(name = "analyst", version, about = "Autonomous data-analysis agent")]
struct Cli {
    /// CSV files to analyze (comma-separated).
    #[arg(long, value_delimiter = ',')]
    files: Vec<PathBuf>,

    /// Path to the TOML configuration file.
    #[arg(long, default_value = "analyst.toml")]
    config: PathBuf,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    if cli.files.is_empty() {
        bail!("no input files provided");
    }
    let cfg = load_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;

    let client = HttpCompletionClient::new(&cfg.model)?;
    let sandbox = PythonSandbox::spawn(&cfg.sandbox)?;
    let mut session = AnalysisSession::new(client, sandbox, cfg)?;

    let result = match session.load_tables(&cli.files) {
        Ok(()) => repl(&mut session),
        Err(err) => Err(err),
    };
    // Shut down regardless of how the loop ended.
    let shutdown = session.shutdown();
    result?;
    shutdown
}

fn repl<C: CompletionClient, S: Sandbox>(session: &mut AnalysisSession<C, S>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("[user]: ");
        std::io::stdout().flush().context("flush prompt")?;
        let Some(line) = lines.next() else {
            // EOF (or interrupt): leave the loop and let the caller tear
            // down the sandbox.
            break;
        };
        let query = line.context("read query")?.trim().to_string();
        if query.eq_ignore_ascii_case(QUIT_TOKEN) {
            break;
        }
        if query.is_empty() {
            println!("please enter a question.");
            continue;
        }
        let report = session.run_analysis(&query)?;
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("[analyst]: {}", report.message());
    println!("<Code Execution Result>");
    println!("{}", report.last_result);
    println!("</Code Execution Result>");
    println!("<Full Executed Code Script>");
    println!("{}", report.script);
    println!("</Full Executed Code Script>");
}
