// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::Context;
use diablo::config::{BenchConfig, ChainConfig};
use diablo::workload::{PayloadPool, PayloadSource, RandomPayloads, SecondaryWorkload};
use diablo::{Controller, Engine, ResultsRecord, Workload, logging};
use log::{info, warn};

/// Distributed transaction-load generator for blockchain networks.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log with timestamps, e.g. when collecting logs of several secondaries.
    #[arg(long, global = true)]
    timestamps: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plans a benchmark and writes one workload file per secondary.
    Plan {
        #[command(flatten)]
        planning: Planning,
        /// Directory for the workload files.
        #[arg(long, default_value = "workloads")]
        out_dir: PathBuf,
    },
    /// Replays one secondary's workload file against a chain.
    Run {
        /// Chain config file.
        #[arg(long)]
        chain: PathBuf,
        /// Workload file written by `plan`.
        #[arg(long)]
        workload: PathBuf,
        /// Index of this secondary, selects the node it talks to.
        #[arg(long, default_value_t = 0)]
        node_index: usize,
        #[command(flatten)]
        output: Output,
    },
    /// Plans a benchmark and runs all secondaries in this process.
    Local {
        #[command(flatten)]
        planning: Planning,
        /// Chain config file.
        #[arg(long)]
        chain: PathBuf,
        #[command(flatten)]
        output: Output,
    },
}

impl Command {
    /// Role of this process, shown in every log line.
    fn role(&self) -> String {
        match self {
            Self::Plan { .. } => "primary".to_owned(),
            Self::Run { node_index, .. } => format!("secondary-{node_index}"),
            Self::Local { .. } => "local".to_owned(),
        }
    }
}

#[derive(Debug, Args)]
struct Planning {
    /// Benchmark config file.
    #[arg(long)]
    bench: PathBuf,
    /// File with one hex-encoded transaction per line, instead of random payloads.
    #[arg(long)]
    payloads: Option<PathBuf>,
    /// Bytes per random payload.
    #[arg(long, default_value_t = 512)]
    payload_size: usize,
}

#[derive(Debug, Args)]
struct Output {
    /// Where to write the results as JSON; printed to stdout if absent.
    #[arg(long)]
    results: Option<PathBuf>,
    /// Where to write per-transaction latencies as CSV.
    #[arg(long)]
    latencies_csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // enable fancy `color_eyre` error messages
    color_eyre::install()?;

    let cli = Cli::parse();
    let role = cli.command.role();
    if cli.timestamps {
        logging::enable_logforth_stderr(&role);
    } else {
        logging::enable_logforth(&role);
    }

    match cli.command {
        Command::Plan { planning, out_dir } => {
            let workload = plan(&planning)?;
            fs::create_dir_all(&out_dir).context("Can not create output directory")?;
            for (i, slice) in workload.into_secondaries().iter().enumerate() {
                let path = out_dir.join(format!("secondary-{i}.bin"));
                fs::write(&path, slice.to_bytes()?)
                    .with_context(|| format!("Can not write {}", path.display()))?;
                info!("wrote {} transactions to {}", slice.len(), path.display());
            }
        }
        Command::Run {
            chain,
            workload,
            node_index,
            output,
        } => {
            let chain = ChainConfig::load(&chain).context("Can not load chain config")?;
            let bytes = fs::read(&workload).context("Can not read workload file")?;
            let slice = SecondaryWorkload::from_bytes(&bytes).context("Can not decode workload")?;
            let record = run_secondary(&chain, slice, node_index).await?;
            write_output(&record, &output)?;
        }
        Command::Local {
            planning,
            chain,
            output,
        } => {
            let chain = ChainConfig::load(&chain).context("Can not load chain config")?;
            let workload = plan(&planning)?;
            let runs = workload
                .into_secondaries()
                .into_iter()
                .enumerate()
                .map(|(secondary, slice)| run_secondary(&chain, slice, secondary));
            let records = futures::future::join_all(runs)
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?;
            write_output(&ResultsRecord::merge(&records), &output)?;
        }
    }
    Ok(())
}

fn plan(planning: &Planning) -> Result<Workload> {
    let bench = BenchConfig::load(&planning.bench).context("Can not load benchmark config")?;
    let controller = Controller::init(bench)?;
    let workload = match &planning.payloads {
        Some(path) => generate(&controller, &mut load_pool(path)?)?,
        None => generate(&controller, &mut RandomPayloads::new(planning.payload_size))?,
    };
    Ok(workload)
}

fn load_pool(path: &Path) -> Result<PayloadPool> {
    PayloadPool::from_hex_file(path).with_context(|| format!("Can not load payloads from {}", path.display()))
}

fn generate(controller: &Controller, source: &mut impl PayloadSource) -> Result<Workload> {
    Ok(controller.generate(source)?)
}

async fn run_secondary(
    chain: &ChainConfig,
    slice: SecondaryWorkload,
    node_index: usize,
) -> Result<ResultsRecord> {
    let mut engine = Engine::new().with_node_index(node_index);
    engine.init(chain).await?;
    engine.parse_workload(slice)?;
    Ok(engine.run().await?)
}

fn write_output(record: &ResultsRecord, output: &Output) -> Result<()> {
    match &output.results {
        Some(path) => record
            .write_json(path)
            .with_context(|| format!("Can not write results to {}", path.display()))?,
        None => println!("{}", record.to_json_pretty()?),
    }
    if let Some(path) = &output.latencies_csv {
        let file = fs::File::create(path)
            .with_context(|| format!("Can not create {}", path.display()))?;
        record.write_latencies_csv(file)?;
    }
    if record.success == 0 && record.sent > 0 {
        warn!("no transaction was confirmed");
    }
    Ok(())
}
