//! Passive endpoint used as the peer of [`crate::client::Client`].
//!
//! Accepts one connection, reassembles the byte stream from segments that may
//! arrive lost, duplicated or out of order, and hands it to the application
//! strictly in order. Acknowledgments follow the configured [`AckMode`].

use std::collections::HashMap;

use arq_lab_abstract::{
    AckMode, MODULUS, PAYLOAD_LEN, Packet, ProtocolConfig, SeqNum, SystemContext, TimerId,
    TransportProtocol, WireEvent, flags,
};
use bytes::Bytes;
use rand::Rng;
use tracing::{debug, info, warn};

/// FIN retransmissions attempted when the config leaves retries unbounded.
pub const DEFAULT_FIN_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listen,
    SynReceived,
    Established,
    LastAck,
    Closed,
}

#[derive(Debug)]
pub struct Server {
    config: ProtocolConfig,
    ack_mode: AckMode,
    state: ServerState,
    isn: SeqNum,
    /// Next in-order byte expected from the client.
    expected: SeqNum,
    /// Segments received ahead of `expected`, keyed by their first byte.
    pending: HashMap<SeqNum, Bytes>,
    /// Sequence number of the client's FIN, once seen.
    peer_fin: Option<SeqNum>,
    fin_retries: u32,
}

impl Server {
    pub fn new(config: ProtocolConfig, ack_mode: AckMode) -> Self {
        Self {
            config,
            ack_mode,
            state: ServerState::Listen,
            isn: SeqNum::ZERO,
            expected: SeqNum::ZERO,
            pending: HashMap::new(),
            peer_fin: None,
            fin_retries: 0,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn isn(&self) -> SeqNum {
        self.isn
    }

    /// Bytes of sequence space the receive buffer accepts ahead of `expected`.
    fn span(&self) -> u32 {
        (self.config.effective_window() * PAYLOAD_LEN) as u32
    }

    fn fin_packet(&self) -> Packet {
        Packet::control(self.isn.wrapping_add(1), SeqNum::ZERO, flags::FIN)
    }

    fn reply(&self, ctx: &mut dyn SystemContext, packet: Packet) {
        ctx.trace(WireEvent::send(packet.header));
        ctx.send_packet(packet);
    }

    fn ack(&self, ctx: &mut dyn SystemContext, ack: SeqNum, duplicate: bool) {
        let flag = if duplicate { flags::DUPACK } else { flags::ACK };
        self.reply(ctx, Packet::control(self.isn.wrapping_add(1), ack, flag));
    }

    fn on_syn(&mut self, ctx: &mut dyn SystemContext, packet: &Packet) {
        let peer_next = packet.header.seq_num.wrapping_add(1);
        match self.state {
            ServerState::Listen => {
                self.expected = peer_next;
                self.state = ServerState::SynReceived;
                debug!(isn = %self.isn, peer = %packet.header.seq_num, "SYN received");
                self.reply(ctx, Packet::control(self.isn, peer_next, flags::SYN | flags::ACK));
            }
            ServerState::SynReceived if peer_next == self.expected => {
                self.reply(ctx, Packet::control(self.isn, peer_next, flags::SYN | flags::DUPACK));
            }
            _ => debug!(state = ?self.state, "SYN ignored"),
        }
    }

    fn on_data(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        let seq = packet.header.seq_num;
        let end = packet.end_seq();
        let ahead = self.expected.distance_to(seq);
        let span = self.span();

        if packet.is_empty() {
            // Only the first segment of an empty stream carries no payload.
            let duplicate = seq != self.expected;
            self.ack(ctx, seq, duplicate);
            return;
        }

        if ahead < span {
            let duplicate = self.pending.contains_key(&seq);
            if !duplicate {
                self.pending.insert(seq, packet.payload);
            }
            while let Some(chunk) = self.pending.remove(&self.expected) {
                ctx.deliver_data(&chunk);
                self.expected = self.expected.wrapping_add(chunk.len() as u32);
            }
            let ack = match self.ack_mode {
                AckMode::Cumulative => self.expected,
                AckMode::Selective => end,
            };
            self.ack(ctx, ack, duplicate);
        } else if seq.distance_to(self.expected) <= span {
            let ack = match self.ack_mode {
                AckMode::Cumulative => self.expected,
                AckMode::Selective => end,
            };
            self.ack(ctx, ack, true);
        } else {
            debug!(%seq, expected = %self.expected, "segment outside receive window dropped");
        }
    }

    fn on_fin(&mut self, ctx: &mut dyn SystemContext, packet: &Packet) {
        let seq = packet.header.seq_num;
        match self.state {
            ServerState::Established if seq == self.expected => {
                self.peer_fin = Some(seq);
                self.ack(ctx, seq.wrapping_add(1), false);
                self.reply(ctx, self.fin_packet());
                ctx.start_timer(self.config.rto_ms, TimerId::Retransmit);
                self.state = ServerState::LastAck;
                info!(delivered_through = %seq, "peer closed, sending FIN");
            }
            ServerState::LastAck if self.peer_fin == Some(seq) => {
                self.ack(ctx, seq.wrapping_add(1), true);
            }
            _ => debug!(%seq, state = ?self.state, "FIN ignored"),
        }
    }
}

impl TransportProtocol for Server {
    fn init(&mut self, _ctx: &mut dyn SystemContext) {
        self.isn = match self.config.initial_seq {
            Some(isn) => SeqNum::new(u32::from(isn)),
            None => SeqNum::new(rand::rng().random_range(0..MODULUS)),
        };
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if self.state == ServerState::Closed {
            return;
        }
        ctx.trace(WireEvent::Recv {
            header: packet.header,
        });

        let h = packet.header;
        if h.is_syn() {
            self.on_syn(ctx, &packet);
            return;
        }
        match self.state {
            ServerState::Listen => debug!("segment before SYN ignored"),
            ServerState::SynReceived | ServerState::Established => {
                if self.state == ServerState::SynReceived {
                    self.state = ServerState::Established;
                    debug!("handshake complete");
                }
                if h.is_fin() {
                    self.on_fin(ctx, &packet);
                } else {
                    self.on_data(ctx, packet);
                }
            }
            ServerState::LastAck => {
                if h.is_fin() {
                    self.on_fin(ctx, &packet);
                } else if h.acknowledges() && h.ack_num == self.isn.wrapping_add(2) {
                    ctx.cancel_timer(TimerId::Retransmit);
                    self.state = ServerState::Closed;
                    info!("connection closed");
                }
            }
            ServerState::Closed => {}
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer: TimerId) {
        if timer != TimerId::Retransmit || self.state != ServerState::LastAck {
            return;
        }
        self.fin_retries += 1;
        let limit = self.config.max_retries.unwrap_or(DEFAULT_FIN_RETRIES);
        if self.fin_retries > limit {
            warn!(attempts = self.fin_retries, "FIN never acknowledged, closing");
            self.state = ServerState::Closed;
            return;
        }
        let fin = self.fin_packet();
        ctx.trace(WireEvent::Timeout {
            seq: fin.header.seq_num,
        });
        ctx.trace(WireEvent::resend(fin.header));
        ctx.send_packet(fin);
        ctx.start_timer(self.config.rto_ms, TimerId::Retransmit);
    }

    fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, data: &[u8]) {
        debug!(len = data.len(), "receiver has no outbound stream, data ignored");
    }

    fn is_closed(&self) -> bool {
        self.state == ServerState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arq_lab_abstract::{ActionBuffer, ScopedContext};

    fn seq(n: u32) -> SeqNum {
        SeqNum::new(n)
    }

    fn server(mode: AckMode) -> Server {
        let mut server = Server::new(
            ProtocolConfig {
                initial_seq: Some(7000),
                ..ProtocolConfig::default()
            },
            mode,
        );
        let mut buffer = ActionBuffer::default();
        server.init(&mut ScopedContext::new(&mut buffer, 0));
        feed(&mut server, Packet::control(seq(100), seq(0), flags::SYN));
        server
    }

    fn feed(server: &mut Server, packet: Packet) -> ActionBuffer {
        let mut buffer = ActionBuffer::default();
        server.on_packet(&mut ScopedContext::new(&mut buffer, 0), packet);
        buffer
    }

    fn data(seq_num: u32, len: usize, fill: u8) -> Packet {
        Packet::new(seq(seq_num), seq(0), 0, Bytes::from(vec![fill; len])).unwrap()
    }

    fn sent(buffer: &ActionBuffer) -> Vec<String> {
        buffer
            .events
            .iter()
            .filter(|e| !matches!(e, WireEvent::Recv { .. }))
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn answers_syn_and_repeats_with_dupack() {
        let mut s = server(AckMode::Cumulative);
        assert_eq!(s.state(), ServerState::SynReceived);
        let out = feed(&mut s, Packet::control(seq(100), seq(0), flags::SYN));
        assert_eq!(sent(&out), vec!["SEND 7000 101 SYN DUP-ACK"]);
    }

    #[test]
    fn reorders_and_acks_cumulatively() {
        let mut s = server(AckMode::Cumulative);
        let out = feed(&mut s, data(613, 512, 2));
        assert_eq!(sent(&out), vec!["SEND 7001 101 ACK"]);
        assert!(out.delivered_data.is_empty());
        assert_eq!(s.state(), ServerState::Established);

        let out = feed(&mut s, data(101, 512, 1));
        assert_eq!(sent(&out), vec!["SEND 7001 1125 ACK"]);
        assert_eq!(out.delivered_data.len(), 2);
        assert_eq!(out.delivered_data[0][0], 1);
        assert_eq!(out.delivered_data[1][0], 2);

        let out = feed(&mut s, data(101, 512, 1));
        assert_eq!(sent(&out), vec!["SEND 7001 1125 DUP-ACK"]);
        assert!(out.delivered_data.is_empty());
    }

    #[test]
    fn selective_acks_name_segment_end() {
        let mut s = server(AckMode::Selective);
        let out = feed(&mut s, data(613, 100, 2));
        assert_eq!(sent(&out), vec!["SEND 7001 713 ACK"]);
        let out = feed(&mut s, data(613, 100, 2));
        assert_eq!(sent(&out), vec!["SEND 7001 713 DUP-ACK"]);
        let out = feed(&mut s, data(101, 512, 1));
        assert_eq!(sent(&out), vec!["SEND 7001 613 ACK"]);
        // Already delivered, acknowledged again without redelivery.
        let out = feed(&mut s, data(613, 100, 2));
        assert_eq!(sent(&out), vec!["SEND 7001 713 DUP-ACK"]);
        assert!(out.delivered_data.is_empty());
    }

    #[test]
    fn far_segments_are_dropped() {
        let mut s = server(AckMode::Cumulative);
        let out = feed(&mut s, data(101 + 20_000, 10, 0));
        assert!(sent(&out).is_empty());
    }

    #[test]
    fn close_sequence() {
        let mut s = server(AckMode::Cumulative);
        feed(&mut s, data(101, 5, 1));
        let out = feed(&mut s, Packet::control(seq(106), seq(0), flags::FIN));
        assert_eq!(sent(&out), vec!["SEND 7001 107 ACK", "SEND 7001 0 FIN"]);
        assert_eq!(s.state(), ServerState::LastAck);

        let out = feed(&mut s, Packet::control(seq(106), seq(0), flags::FIN));
        assert_eq!(sent(&out), vec!["SEND 7001 107 DUP-ACK"]);

        let mut buffer = ActionBuffer::default();
        s.on_timer(&mut ScopedContext::new(&mut buffer, 500), TimerId::Retransmit);
        assert_eq!(sent(&buffer), vec!["TIMEOUT 7001", "RESEND 7001 0 FIN"]);

        feed(&mut s, Packet::control(seq(107), seq(7002), flags::ACK));
        assert!(s.is_closed());
    }

    #[test]
    fn fin_retries_are_bounded() {
        let mut s = server(AckMode::Cumulative);
        feed(&mut s, Packet::control(seq(101), seq(7001), flags::ACK));
        feed(&mut s, Packet::control(seq(101), seq(0), flags::FIN));
        for _ in 0..DEFAULT_FIN_RETRIES {
            let mut buffer = ActionBuffer::default();
            s.on_timer(&mut ScopedContext::new(&mut buffer, 0), TimerId::Retransmit);
        }
        assert_eq!(s.state(), ServerState::LastAck);
        let mut buffer = ActionBuffer::default();
        s.on_timer(&mut ScopedContext::new(&mut buffer, 0), TimerId::Retransmit);
        assert!(s.is_closed());
    }
}
