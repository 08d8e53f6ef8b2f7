use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use job_analysis::cli::Cli;
use job_analysis::command::CommandSource;
use job_analysis::config::ProjectConfig;
use job_analysis::error::exit_status_for;
use job_analysis::job::{JobSpec, run_job};

fn run(cli: Cli) -> Result<i32> {
    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;
    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .job-analysis/config.toml found, using defaults"),
    }

    let analyzer_args = cli.analyzer_args()?;
    let dir = cwd.join(cli.dir.unwrap_or(config.defaults.dir));
    let command = CommandSource::from_args(cli.command).resolve(std::io::stdin().lock())?;

    let spec = JobSpec::new(cli.step, cli.analyzer, analyzer_args, dir, command)?;
    let outcome = run_job(&spec, &config.shell)?;
    Ok(outcome.exit_code())
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "job_analysis=warn",
        1 => "job_analysis=info",
        2 => "job_analysis=debug",
        _ => "job_analysis=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_status_for(&e)
        }
    };
    std::process::exit(code);
}
