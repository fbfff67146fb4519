use serde::{Deserialize, Serialize};

use crate::packet::PAYLOAD_LEN;
use crate::seq::MODULUS;

/// Maximum number of segments in flight.
pub const WINDOW_SIZE: usize = 10;
pub const DEFAULT_RTO_MS: u64 = 500;
pub const DEFAULT_LINGER_MS: u64 = 2000;

// Outstanding boundaries must be unique modulo the sequence space, with room
// to tell stale acknowledgments apart from fresh ones.
const _: () = assert!(WINDOW_SIZE * PAYLOAD_LEN < (MODULUS as usize) / 2);

/// What the sender retransmits when its timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArqMode {
    /// Only segments not individually acknowledged.
    #[default]
    #[serde(alias = "sr")]
    SelectiveRepeat,
    /// Every outstanding segment.
    #[serde(alias = "gbn")]
    GoBackN,
}

impl ArqMode {
    /// The acknowledgment discipline usually paired with this mode.
    pub fn peer_ack_mode(self) -> AckMode {
        match self {
            ArqMode::SelectiveRepeat => AckMode::Selective,
            ArqMode::GoBackN => AckMode::Cumulative,
        }
    }
}

/// How a receiver chooses the acknowledgment number it sends back.
///
/// The sender reads every acknowledgment under the same discipline: a
/// cumulative one retires all older segments, a selective one only the
/// segment it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Next expected in-order byte.
    #[default]
    Cumulative,
    /// End of the segment just received.
    Selective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub mode: ArqMode,
    /// Segments allowed in flight; capped at [`WINDOW_SIZE`].
    pub window_size: usize,
    pub rto_ms: u64,
    pub linger_ms: u64,
    /// Consecutive timeouts tolerated without progress before aborting.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    /// Fixed initial sequence number; random when unset.
    pub initial_seq: Option<u16>,
    /// How the peer acknowledges; follows `mode` when unset.
    pub peer_ack_mode: Option<AckMode>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mode: ArqMode::default(),
            window_size: WINDOW_SIZE,
            rto_ms: DEFAULT_RTO_MS,
            linger_ms: DEFAULT_LINGER_MS,
            max_retries: None,
            initial_seq: None,
            peer_ack_mode: None,
        }
    }
}

impl ProtocolConfig {
    pub fn effective_window(&self) -> usize {
        self.window_size.clamp(1, WINDOW_SIZE)
    }

    pub fn peer_acks(&self) -> AckMode {
        self.peer_ack_mode
            .unwrap_or_else(|| self.mode.peer_ack_mode())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub duplicate_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            min_latency: 10,
            max_latency: 100,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_config_from_partial_toml() {
        let cfg: ProtocolConfig = toml::from_str("mode = \"gbn\"\nrto_ms = 250\n").unwrap();
        assert_eq!(cfg.mode, ArqMode::GoBackN);
        assert_eq!(cfg.rto_ms, 250);
        assert_eq!(cfg.linger_ms, DEFAULT_LINGER_MS);
        assert_eq!(cfg.window_size, WINDOW_SIZE);
        assert_eq!(cfg.max_retries, None);
    }

    #[test]
    fn window_is_capped() {
        let cfg = ProtocolConfig {
            window_size: 64,
            ..Default::default()
        };
        assert_eq!(cfg.effective_window(), WINDOW_SIZE);
        let cfg = ProtocolConfig {
            window_size: 0,
            ..Default::default()
        };
        assert_eq!(cfg.effective_window(), 1);
    }

    #[test]
    fn modes_pair_with_ack_discipline() {
        assert_eq!(ArqMode::SelectiveRepeat.peer_ack_mode(), AckMode::Selective);
        assert_eq!(ArqMode::GoBackN.peer_ack_mode(), AckMode::Cumulative);
    }

    #[test]
    fn explicit_peer_ack_mode_wins_over_pairing() {
        let cfg: ProtocolConfig =
            toml::from_str("mode = \"gbn\"\npeer_ack_mode = \"selective\"\n").unwrap();
        assert_eq!(cfg.peer_acks(), AckMode::Selective);
        assert_eq!(ProtocolConfig::default().peer_acks(), AckMode::Selective);
    }
}
