use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use dualrate::config::{DualrateConfig, SimulationConfig};
use dualrate::RateLimiter;

/// Drive a simulated workload through a request/token rate limiter.
#[derive(Parser, Debug)]
#[command(name = "dualrate", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum requests per window
    #[arg(long)]
    rpm: Option<u64>,

    /// Maximum tokens per window
    #[arg(long)]
    tpm: Option<u64>,

    /// Window length in seconds
    #[arg(long)]
    window: Option<f64>,

    /// Worker threads sharing the limiter
    #[arg(long)]
    workers: Option<usize>,

    /// Calls made by each worker
    #[arg(long)]
    requests: Option<usize>,

    #[arg(long)]
    min_tokens: Option<u64>,

    #[arg(long)]
    max_tokens: Option<u64>,

    /// Simulated duration of each call
    #[arg(long)]
    work_millis: Option<u64>,

    /// Print final stats as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut DualrateConfig) {
        let limiter = &mut config.limiter;
        if self.rpm.is_some() {
            limiter.rpm_limit = self.rpm;
        }
        if self.tpm.is_some() {
            limiter.tpm_limit = self.tpm;
        }
        if let Some(window) = self.window {
            limiter.window_seconds = window;
        }

        let simulation = &mut config.simulation;
        if let Some(workers) = self.workers {
            simulation.workers = workers;
        }
        if let Some(requests) = self.requests {
            simulation.requests_per_worker = requests;
        }
        if let Some(min_tokens) = self.min_tokens {
            simulation.min_tokens = min_tokens;
        }
        if let Some(max_tokens) = self.max_tokens {
            simulation.max_tokens = max_tokens;
        }
        if let Some(work_millis) = self.work_millis {
            simulation.work_millis = work_millis;
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let cli = Cli::parse();

    info!("Starting Dualrate simulation");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = DualrateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    info!(
        rpm_limit = ?config.limiter.rpm_limit,
        tpm_limit = ?config.limiter.tpm_limit,
        window_seconds = config.limiter.window_seconds,
        workers = config.simulation.workers,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(config.limiter.clone())?);
    let started = Instant::now();

    let handles: Vec<_> = (0..config.simulation.workers)
        .map(|worker| {
            let limiter = Arc::clone(&limiter);
            let simulation = config.simulation.clone();
            thread::Builder::new()
                .name(format!("worker-{}", worker))
                .spawn(move || run_worker(worker, &limiter, &simulation))
        })
        .collect::<std::io::Result<Vec<_>>>()?;

    let mut total_tokens = 0u64;
    for handle in handles {
        total_tokens += handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;
    }

    let stats = limiter.current_stats();
    info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        total_tokens,
        "Simulation finished"
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", stats);
    }

    Ok(())
}

/// Run one worker's acquire / work / report cycle; returns the tokens it used.
fn run_worker(worker: usize, limiter: &RateLimiter, simulation: &SimulationConfig) -> u64 {
    let mut rng = rand::thread_rng();
    let mut used = 0;

    for call in 0..simulation.requests_per_worker {
        limiter.acquire();

        thread::sleep(Duration::from_millis(simulation.work_millis));
        let tokens = rng.gen_range(simulation.min_tokens..=simulation.max_tokens);

        limiter.report_usage(tokens);
        used += tokens;

        debug!(worker, call, tokens, "Call completed");
    }

    used
}
