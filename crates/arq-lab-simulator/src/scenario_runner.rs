use anyhow::{Context, anyhow, ensure};
use arq_lab_abstract::{
    EventKind, MODULUS, ProtocolConfig, SeqNum, SimConfig, TestAction, TestAssertion, TestScenario,
    WireEvent,
};
use arq_lab_protocol::{PairRequest, load_pair};
use bytes::Bytes;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::engine::{NodeId, Simulator};
use crate::trace::SimulationReport;

/// Time limit applied when a scenario carries no `max_duration` assertion.
pub const DEFAULT_MAX_DURATION_MS: u64 = 60_000;

pub fn load_scenario(path: &Path) -> anyhow::Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse scenario")
}

/// Set up a simulator for `scenario` without running it.
///
/// Unset initial sequence numbers are drawn from the scenario seed, so a
/// scenario always replays identically.
pub fn build_simulator(scenario: &TestScenario) -> anyhow::Result<Simulator> {
    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    ensure!(
        config.min_latency <= config.max_latency,
        "min_latency ({} ms) exceeds max_latency ({} ms)",
        config.min_latency,
        config.max_latency
    );

    let mut isn_rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    let mut draw = || isn_rng.random_range(0..MODULUS) as u16;
    let protocol = ProtocolConfig {
        initial_seq: Some(scenario.protocol.initial_seq.unwrap_or_else(&mut draw)),
        ..scenario.protocol.clone()
    };
    let (sender, receiver) = load_pair(PairRequest {
        config: protocol,
        receiver_ack_mode: scenario.receiver_ack_mode,
        receiver_isn: Some(draw()),
        source: Bytes::from(scenario.payload.bytes()),
    })
    .context("Scenario pairs incompatible endpoints")?;

    let mut sim = Simulator::new(config, sender, receiver);
    for action in &scenario.actions {
        match action {
            TestAction::AppSend { time, data } => {
                sim.schedule_app_send(*time, data.as_bytes().to_vec());
            }
            TestAction::DropNextFromSenderSeq { seq } => {
                sim.add_drop_sender_seq_once(SeqNum::from(*seq));
            }
            TestAction::DropNextFromReceiverAck { ack } => {
                sim.add_drop_receiver_ack_once(SeqNum::from(*ack));
            }
            TestAction::DuplicateNextReceiverFin => sim.duplicate_next_receiver_fin(),
        }
    }
    Ok(sim)
}

/// Bytes the receiver should end up with: the payload, then every
/// application send in time order.
fn expected_stream(scenario: &TestScenario) -> Vec<u8> {
    let mut sends: Vec<(u64, &str)> = scenario
        .actions
        .iter()
        .filter_map(|action| match action {
            TestAction::AppSend { time, data } => Some((*time, data.as_str())),
            _ => None,
        })
        .collect();
    sends.sort_by_key(|(time, _)| *time);

    let mut stream = scenario.payload.bytes();
    for (_, data) in sends {
        stream.extend_from_slice(data.as_bytes());
    }
    stream
}

fn matches_kind(event: &WireEvent, kind: EventKind) -> bool {
    match (event, kind) {
        (WireEvent::Send { resend, .. }, EventKind::Send) => !resend,
        (WireEvent::Send { resend, .. }, EventKind::Resend) => *resend,
        (WireEvent::Recv { .. }, EventKind::Recv) => true,
        (WireEvent::Timeout { .. }, EventKind::Timeout) => true,
        _ => false,
    }
}

pub fn run_scenario(scenario: &TestScenario) -> anyhow::Result<SimulationReport> {
    info!("Running Scenario: {}", scenario.name);
    info!("Description: {}", scenario.description);

    let mut sim = build_simulator(scenario)?;
    sim.init();

    let max_duration = scenario
        .assertions
        .iter()
        .find_map(|a| {
            if let TestAssertion::MaxDuration { ms } = a {
                Some(*ms)
            } else {
                None
            }
        })
        .unwrap_or(DEFAULT_MAX_DURATION_MS);

    if !sim.run_until(max_duration) {
        return Err(anyhow!("Test timed out after {} ms", max_duration));
    }

    for assertion in &scenario.assertions {
        match assertion {
            TestAssertion::PayloadDelivered => {
                let expected = expected_stream(scenario);
                if sim.delivered_data != expected {
                    let diverge = sim
                        .delivered_data
                        .iter()
                        .zip(&expected)
                        .position(|(a, b)| a != b)
                        .unwrap_or(sim.delivered_data.len().min(expected.len()));
                    return Err(anyhow!(
                        "Assertion Failed: delivered {} bytes, expected {}; first difference at byte {}",
                        sim.delivered_data.len(),
                        expected.len(),
                        diverge
                    ));
                }
            }
            TestAssertion::SenderPacketCount { min, max } => {
                if sim.sender_packet_count < *min {
                    return Err(anyhow!(
                        "Assertion Failed: Sender sent {} packets, expected min {}",
                        sim.sender_packet_count,
                        min
                    ));
                }
                if let Some(max) = max
                    && sim.sender_packet_count > *max
                {
                    return Err(anyhow!(
                        "Assertion Failed: Sender sent {} packets, expected max {}",
                        sim.sender_packet_count,
                        max
                    ));
                }
            }
            TestAssertion::MaxInFlight { max } => {
                let peak = sim.metric_max("in_flight").unwrap_or(0.0);
                if peak > *max as f64 {
                    return Err(anyhow!(
                        "Assertion Failed: {} segments in flight, expected at most {}",
                        peak,
                        max
                    ));
                }
            }
            TestAssertion::SenderEventCount { event, count } => {
                let seen = sim
                    .events(NodeId::Sender)
                    .iter()
                    .filter(|(_, e)| matches_kind(e, *event))
                    .count();
                if seen != *count {
                    return Err(anyhow!(
                        "Assertion Failed: Sender logged {} {:?} events, expected {}",
                        seen,
                        event,
                        count
                    ));
                }
            }
            TestAssertion::SenderClosed => {
                if sim.closed_at(NodeId::Sender).is_none() {
                    return Err(anyhow!("Assertion Failed: Sender never closed"));
                }
            }
            TestAssertion::MaxDuration { .. } => {} // Already checked
        }
    }

    info!("Test Scenario Passed!");
    Ok(sim.export_report())
}

pub fn run_scenario_file(path: &Path) -> anyhow::Result<SimulationReport> {
    let scenario = load_scenario(path)?;
    run_scenario(&scenario)
}
