use anyhow::{Result, bail};
use arq_lab_abstract::{AckMode, ProtocolConfig, TransportProtocol};
use bytes::Bytes;

use crate::client::Client;
use crate::server::Server;

/// Everything needed to build a connected client/responder pair.
#[derive(Debug, Clone, Default)]
pub struct PairRequest {
    pub config: ProtocolConfig,
    /// Defaults to the client's `peer_ack_mode`, then to its ARQ mode's pairing.
    pub receiver_ack_mode: Option<AckMode>,
    /// Fixed responder ISN; random when unset.
    pub receiver_isn: Option<u16>,
    /// Bytes the client transfers.
    pub source: Bytes,
}

impl PairRequest {
    pub fn receiver_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            initial_seq: self.receiver_isn,
            ..self.config.clone()
        }
    }

    /// The one acknowledgment discipline both ends agree on.
    pub fn ack_mode(&self) -> Result<AckMode> {
        match (self.receiver_ack_mode, self.config.peer_ack_mode) {
            (Some(receiver), Some(expected)) if receiver != expected => {
                bail!("receiver acks {receiver:?} but the sender expects {expected:?}")
            }
            (Some(mode), _) => Ok(mode),
            (None, _) => Ok(self.config.peer_acks()),
        }
    }

    /// Sender settings with the peer's discipline filled in.
    pub fn sender_config(&self) -> Result<ProtocolConfig> {
        Ok(ProtocolConfig {
            peer_ack_mode: Some(self.ack_mode()?),
            ..self.config.clone()
        })
    }
}

pub fn sender(config: ProtocolConfig, source: Bytes) -> Box<dyn TransportProtocol> {
    Box::new(Client::new(config, source))
}

pub fn receiver(config: ProtocolConfig, ack_mode: AckMode) -> Box<dyn TransportProtocol> {
    Box::new(Server::new(config, ack_mode))
}

/// Build the sender (client) and receiver (responder) for one connection.
pub fn load_pair(
    request: PairRequest,
) -> Result<(Box<dyn TransportProtocol>, Box<dyn TransportProtocol>)> {
    let ack_mode = request.ack_mode()?;
    let sender_config = request.sender_config()?;
    let receiver_config = request.receiver_config();
    Ok((
        sender(sender_config, request.source),
        receiver(receiver_config, ack_mode),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arq_lab_abstract::ArqMode;

    #[test]
    fn receiver_follows_sender_mode_unless_overridden() {
        let mut request = PairRequest {
            config: ProtocolConfig {
                mode: ArqMode::GoBackN,
                initial_seq: Some(1),
                ..ProtocolConfig::default()
            },
            receiver_isn: Some(9),
            ..PairRequest::default()
        };
        assert_eq!(request.ack_mode().unwrap(), AckMode::Cumulative);
        assert_eq!(request.receiver_config().initial_seq, Some(9));

        request.receiver_ack_mode = Some(AckMode::Selective);
        assert_eq!(request.ack_mode().unwrap(), AckMode::Selective);
        // The sender is told how its peer acknowledges.
        assert_eq!(
            request.sender_config().unwrap().peer_ack_mode,
            Some(AckMode::Selective)
        );
    }

    #[test]
    fn conflicting_ack_disciplines_are_rejected() {
        let request = PairRequest {
            config: ProtocolConfig {
                peer_ack_mode: Some(AckMode::Cumulative),
                ..ProtocolConfig::default()
            },
            receiver_ack_mode: Some(AckMode::Selective),
            ..PairRequest::default()
        };
        let err = request.ack_mode().unwrap_err().to_string();
        assert!(err.contains("expects Cumulative"), "{err}");
        assert!(load_pair(request).is_err());
    }
}
