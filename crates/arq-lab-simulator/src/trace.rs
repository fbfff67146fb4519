use arq_lab_abstract::SimConfig;
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::LinkEventSummary;

/// One event-log line of an endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub time: u64,
    pub event: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration_ms: u64,
    pub delivered_bytes: usize,
    pub delivered_data: Vec<u8>,
    pub sender_packet_count: u32,
    pub sender_events: Vec<TraceEntry>,
    pub receiver_events: Vec<TraceEntry>,
    pub sender_closed_at: Option<u64>,
    pub receiver_closed_at: Option<u64>,
    pub metrics: HashMap<String, Vec<(u64, f64)>>,
    pub link_events: Vec<LinkEventSummary>,
}
