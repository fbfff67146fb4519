use crate::config::{AckMode, ProtocolConfig, SimConfig};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Acknowledgment discipline of the responder; derived from the
    /// protocol mode when unset.
    #[serde(default)]
    pub receiver_ack_mode: Option<AckMode>,
    #[serde(default)]
    pub payload: PayloadSpec,
    #[serde(default)]
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub loss_rate: Option<f64>,
    pub corrupt_rate: Option<f64>,
    pub duplicate_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.duplicate_rate {
            config.duplicate_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}

/// The data source handed to the sender before the run starts.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadSpec {
    /// Literal text.
    Text { data: String },
    /// `size` bytes of a repeating, position-dependent pattern.
    Pattern { size: usize },
}

impl Default for PayloadSpec {
    fn default() -> Self {
        PayloadSpec::Pattern { size: 5000 }
    }
}

impl PayloadSpec {
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            PayloadSpec::Text { data } => data.as_bytes().to_vec(),
            PayloadSpec::Pattern { size } => pattern(*size),
        }
    }
}

/// Deterministic filler whose bytes differ between neighbouring segments,
/// so misordered delivery is detectable.
pub fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Application hands more data to the sender at a specific time
    AppSend { time: u64, data: String },
    /// Deterministically drop the first packet sent by Sender with given seq number
    DropNextFromSenderSeq { seq: u16 },
    /// Deterministically drop the first ACK sent by Receiver with given ack number
    DropNextFromReceiverAck { ack: u16 },
    /// Deliver the next FIN sent by Receiver twice
    DuplicateNextReceiverFin,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Send,
    Resend,
    Recv,
    Timeout,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// The receiver's application saw exactly the payload bytes, in order
    PayloadDelivered,
    /// Assert that the total number of packets sent by Sender is within range
    SenderPacketCount { min: u32, max: Option<u32> },
    /// Segments in flight never exceeded `max`
    MaxInFlight { max: usize },
    /// Number of sender-side log events of the given kind
    SenderEventCount { event: EventKind, count: usize },
    /// The sender reached CLOSED
    SenderClosed,
    /// Assert that simulation finishes within time
    MaxDuration { ms: u64 },
}
