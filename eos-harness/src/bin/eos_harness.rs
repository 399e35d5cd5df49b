//! Exactly-once copy harness binary.
//!
//! Runs one cell of the failure matrix, or all four, and exits non-zero if
//! any run fails.
//!
//! # Simulated cluster
//!
//! ```bash
//! eos-harness --failure-mode hard_bounce --bounce-target clients
//! eos-harness --all --seed-messages 20000
//! ```
//!
//! # Real brokers (feature `kafka`)
//!
//! ```bash
//! eos-harness --backend kafka --broker-binary ./bin/kafka-server \
//!     --failure-mode clean_bounce --bounce-target brokers
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use eos_core::{BounceTarget, FailureMode};
use eos_harness::service::Backend;
use eos_harness::{HarnessResult, Scenario, ScenarioConfig, SimBackend};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Cluster and clients to run against.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum BackendKind {
    /// In-memory simulated cluster.
    #[default]
    Sim,
    /// Broker processes and librdkafka clients.
    Kafka,
}

/// Fault-injection harness for exactly-once transactional copy.
#[derive(Parser, Debug)]
#[command(name = "eos-harness")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Failure mode: `hard_bounce` or `clean_bounce`.
    #[arg(long, value_parser = parse_failure_mode, default_value = "hard_bounce")]
    failure_mode: FailureMode,

    /// Bounce target: `brokers` or `clients`.
    #[arg(long, value_parser = parse_bounce_target, default_value = "clients")]
    bounce_target: BounceTarget,

    /// Run the whole 2x2 matrix, ignoring `--failure-mode` and `--bounce-target`.
    #[arg(long)]
    all: bool,

    /// Backend to run against.
    #[arg(long, value_enum, default_value = "sim")]
    backend: BackendKind,

    /// Number of messages seeded into the input topic.
    #[arg(long, default_value = "100000")]
    seed_messages: u64,

    /// Messages per copier transaction.
    #[arg(long, default_value = "750")]
    transaction_size: u32,

    /// Broker binary (kafka backend only).
    #[cfg(feature = "kafka")]
    #[arg(long, default_value = "./bin/kafka-server")]
    broker_binary: std::path::PathBuf,

    /// Broker argument template; `{node_id}`, `{port}` and `{data_dir}` are substituted.
    #[cfg(feature = "kafka")]
    #[arg(long = "broker-arg", allow_hyphen_values = true)]
    broker_args: Vec<String>,

    /// Base port; broker N listens on `base_port + N`.
    #[cfg(feature = "kafka")]
    #[arg(long, default_value = "9092")]
    base_port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

fn parse_failure_mode(s: &str) -> Result<FailureMode, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_bounce_target(s: &str) -> Result<BounceTarget, String> {
    s.parse().map_err(|e| format!("{e}"))
}

impl Args {
    fn scenarios(&self) -> Vec<(FailureMode, BounceTarget)> {
        if self.all {
            FailureMode::ALL
                .into_iter()
                .flat_map(|mode| BounceTarget::ALL.map(|target| (mode, target)))
                .collect()
        } else {
            vec![(self.failure_mode, self.bounce_target)]
        }
    }

    fn config(&self) -> HarnessResult<ScenarioConfig> {
        ScenarioConfig::builder()
            .seed_messages(self.seed_messages)
            .transaction_size(self.transaction_size)
            .build()
    }

    /// Builds a fresh backend; every scenario starts from an empty cluster.
    fn backend(&self, config: ScenarioConfig) -> HarnessResult<Box<dyn Backend>> {
        match self.backend {
            BackendKind::Sim => Ok(Box::new(SimBackend::new(config))),
            BackendKind::Kafka => self.kafka_backend(config),
        }
    }

    #[cfg(feature = "kafka")]
    fn kafka_backend(&self, config: ScenarioConfig) -> HarnessResult<Box<dyn Backend>> {
        use eos_harness::real::{RealBackend, RealConfig};

        let mut real = RealConfig::builder()
            .binary_path(&self.broker_binary)
            .base_port(self.base_port);
        if !self.broker_args.is_empty() {
            real = real.args(self.broker_args.iter().cloned());
        }
        Ok(Box::new(RealBackend::new(config, real.build())?))
    }

    #[cfg(not(feature = "kafka"))]
    #[allow(clippy::unused_self)]
    fn kafka_backend(&self, _config: ScenarioConfig) -> HarnessResult<Box<dyn Backend>> {
        Err(eos_harness::HarnessError::InvalidConfig(
            "the kafka backend needs the `kafka` feature".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args.config()?;
    let mut failed = 0;
    for (mode, target) in args.scenarios() {
        let backend = args.backend(config.clone())?;
        match Scenario::new(backend.as_ref()).run(mode, target).await {
            Ok(report) => println!("{report}"),
            Err(e) => {
                error!(%mode, %target, error = %e, "scenario failed");
                println!("{mode}/{target} on {}: FAILED: {e}", backend.name());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        info!(failed, "some scenarios failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
