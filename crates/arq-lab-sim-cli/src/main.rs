use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use arq_lab_abstract::{
    PayloadSpec, ProtocolConfig, SimConfigOverride, TestAction, TestScenario,
};
use arq_lab_protocol::{ack_mode_by_name, mode_by_name};
use arq_lab_simulator::{SimulationReport, run_scenario};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless ARQ lab simulator")]
struct Args {
    /// Load a scenario from disk; the flags below then only override it.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Protocol settings (TOML) for the sender.
    #[arg(long)]
    config: Option<PathBuf>,

    /// ARQ mode: `sr` or `gbn`.
    #[arg(long)]
    mode: Option<String>,

    /// Receiver acknowledgment discipline: `cumulative` or `selective`.
    /// The sender reads acknowledgments the same way.
    #[arg(long)]
    ack_mode: Option<String>,

    /// Bytes of generated payload to transfer.
    #[arg(long)]
    size: Option<usize>,

    #[arg(long)]
    loss: Option<f64>,
    #[arg(long)]
    corrupt: Option<f64>,
    #[arg(long)]
    duplicate: Option<f64>,
    #[arg(long)]
    min_latency: Option<u64>,
    #[arg(long)]
    max_latency: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,

    /// Fixed sender ISN.
    #[arg(long)]
    isn: Option<u16>,

    /// Drop the first sender segment with this sequence number (repeatable).
    #[arg(long)]
    drop_seq: Vec<u16>,

    /// Drop the first receiver acknowledgment with this number (repeatable).
    #[arg(long)]
    drop_ack: Vec<u16>,

    /// Print the receiver's event log after the sender's.
    #[arg(long, default_value_t = false)]
    receiver_log: bool,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    info!("arq-lab-sim-cli starting…");

    let scenario = args.build_scenario()?;
    let report = run_scenario(&scenario)?;

    for entry in &report.sender_events {
        println!("{}", entry.event);
    }
    if args.receiver_log {
        println!("--- receiver ---");
        for entry in &report.receiver_events {
            println!("{}", entry.event);
        }
    }
    info!(
        delivered = report.delivered_bytes,
        duration_ms = report.duration_ms,
        packets = report.sender_packet_count,
        "simulation complete"
    );

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

impl Args {
    fn build_scenario(&self) -> Result<TestScenario> {
        let mut scenario = match &self.scenario {
            Some(path) => arq_lab_simulator::load_scenario(path)?,
            None => TestScenario {
                name: "ad-hoc".to_string(),
                description: "built from command-line flags".to_string(),
                config: SimConfigOverride::default(),
                protocol: ProtocolConfig::default(),
                receiver_ack_mode: None,
                payload: PayloadSpec::default(),
                actions: Vec::new(),
                assertions: Vec::new(),
            },
        };

        if let Some(path) = &self.config {
            scenario.protocol = load_protocol_config(path)?;
        }
        if let Some(mode) = &self.mode {
            scenario.protocol.mode = mode_by_name(mode)?;
        }
        if let Some(mode) = &self.ack_mode {
            scenario.receiver_ack_mode = Some(ack_mode_by_name(mode)?);
        }
        if let Some(isn) = self.isn {
            scenario.protocol.initial_seq = Some(isn);
        }

        if let Some(size) = self.size {
            scenario.payload = PayloadSpec::Pattern { size };
        }

        let overrides = &mut scenario.config;
        overrides.loss_rate = self.loss.or(overrides.loss_rate);
        overrides.corrupt_rate = self.corrupt.or(overrides.corrupt_rate);
        overrides.duplicate_rate = self.duplicate.or(overrides.duplicate_rate);
        overrides.min_latency = self.min_latency.or(overrides.min_latency);
        overrides.max_latency = self.max_latency.or(overrides.max_latency);
        overrides.seed = self.seed.or(overrides.seed);

        scenario.actions.extend(
            self.drop_seq
                .iter()
                .map(|&seq| TestAction::DropNextFromSenderSeq { seq }),
        );
        scenario.actions.extend(
            self.drop_ack
                .iter()
                .map(|&ack| TestAction::DropNextFromReceiverAck { ack }),
        );
        Ok(scenario)
    }
}

fn load_protocol_config(path: &Path) -> Result<ProtocolConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse protocol config")
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
