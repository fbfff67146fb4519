//! The connection-initiating endpoint.
//!
//! [`Client`] runs one connection through handshake, sliding-window transfer
//! of its data source and active close, entirely from
//! [`TransportProtocol`] callbacks. Every observable step is reported with
//! [`SystemContext::trace`].

mod handshake;
mod teardown;
mod transfer;
mod window;

pub use handshake::{Established, Handshake};
pub use teardown::Teardown;
pub use transfer::{AckOutcome, Transfer};
pub use window::{SendWindow, Slot};

use std::fmt;

use arq_lab_abstract::{
    MODULUS, Packet, ProtocolConfig, SeqNum, SystemContext, TimerId, TransportProtocol, WireEvent,
};
use bytes::Bytes;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    SynSent,
    Established,
    FinWait1,
    FinWait2,
    TimedWait,
    Closed,
    Aborted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Init => "INIT",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinWait1 => "FIN_WAIT1",
            ConnectionState::FinWait2 => "FIN_WAIT2",
            ConnectionState::TimedWait => "TIMED_WAIT",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("no progress in {state} after {attempts} consecutive timeouts")]
    RetriesExhausted {
        state: ConnectionState,
        attempts: u32,
    },
}

#[derive(Debug)]
enum Phase {
    Idle,
    Handshake(Handshake),
    Transfer {
        transfer: Transfer,
        peer_seq: SeqNum,
    },
    Teardown(Teardown),
    Done,
}

#[derive(Debug)]
pub struct Client {
    config: ProtocolConfig,
    state: ConnectionState,
    phase: Phase,
    /// Bytes handed over before the connection was established.
    source: Bytes,
    /// Retransmission timeouts since the last sign of progress.
    timeouts: u32,
    error: Option<ConnectionError>,
}

impl Client {
    pub fn new(config: ProtocolConfig, source: Bytes) -> Self {
        Self {
            config,
            state: ConnectionState::Init,
            phase: Phase::Idle,
            source,
            timeouts: 0,
            error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn error(&self) -> Option<&ConnectionError> {
        self.error.as_ref()
    }

    /// Segments currently awaiting acknowledgment (zero outside the transfer).
    pub fn in_flight(&self) -> usize {
        match &self.phase {
            Phase::Transfer { transfer, .. } => transfer.in_flight(),
            _ => 0,
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        debug!(from = %self.state, %to, "client state change");
        self.state = to;
    }

    fn pick_isn(&self) -> SeqNum {
        match self.config.initial_seq {
            Some(isn) => SeqNum::new(u32::from(isn)),
            None => SeqNum::new(rand::rng().random_range(0..MODULUS)),
        }
    }

    fn establish(&mut self, ctx: &mut dyn SystemContext, est: Established) {
        self.timeouts = 0;
        self.transition(ConnectionState::Established);
        info!(local = %est.local_seq, peer = %est.peer_seq, "connection established");

        let mut transfer = Transfer::new(
            self.config.mode,
            self.config.peer_acks(),
            self.config.rto_ms,
            self.config.effective_window(),
            est.local_seq,
            est.peer_seq,
            std::mem::take(&mut self.source),
        );
        transfer.start(ctx);
        self.phase = Phase::Transfer {
            transfer,
            peer_seq: est.peer_seq,
        };
    }

    fn begin_teardown(&mut self, ctx: &mut dyn SystemContext, fin_seq: SeqNum, peer_seq: SeqNum) {
        info!(%fin_seq, "all data acknowledged, closing");
        let teardown = Teardown::new(fin_seq, peer_seq, self.config.rto_ms, self.config.linger_ms);
        teardown.send_fin(ctx);
        self.phase = Phase::Teardown(teardown);
        self.transition(ConnectionState::FinWait1);
    }

    fn abort(&mut self, ctx: &mut dyn SystemContext) {
        ctx.cancel_timer(TimerId::Retransmit);
        ctx.cancel_timer(TimerId::Linger);
        let error = ConnectionError::RetriesExhausted {
            state: self.state,
            attempts: self.timeouts,
        };
        warn!(%error, "aborting connection");
        ctx.log(&error.to_string());
        self.error = Some(error);
        self.phase = Phase::Done;
        self.transition(ConnectionState::Aborted);
    }
}

impl TransportProtocol for Client {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        let handshake = Handshake::new(self.pick_isn(), self.config.rto_ms);
        info!(isn = %handshake.isn(), mode = ?self.config.mode, "opening connection");
        handshake.send_syn(ctx);
        self.phase = Phase::Handshake(handshake);
        self.transition(ConnectionState::SynSent);
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if self.is_closed() {
            return;
        }
        ctx.trace(WireEvent::Recv {
            header: packet.header,
        });

        match &mut self.phase {
            Phase::Idle | Phase::Done => {}
            Phase::Handshake(handshake) => {
                if let Some(est) = handshake.accept(&packet) {
                    self.establish(ctx, est);
                } else {
                    debug!(header = ?packet.header, "not a SYN-ACK for our SYN");
                }
            }
            Phase::Transfer { transfer, peer_seq } => {
                let h = packet.header;
                if h.is_syn() || !h.acknowledges() {
                    return;
                }
                let outcome = transfer.on_ack(ctx, h.ack_num);
                let finished = transfer.is_complete().then(|| (transfer.next_seq(), *peer_seq));
                if outcome != AckOutcome::Ignored {
                    self.timeouts = 0;
                }
                if let Some((fin_seq, peer_seq)) = finished {
                    self.begin_teardown(ctx, fin_seq, peer_seq);
                }
            }
            Phase::Teardown(teardown) => {
                let fin_ack = teardown.is_fin_ack(&packet);
                let peer_fin = teardown.is_peer_fin(&packet);
                match self.state {
                    // The peer only sends its FIN after seeing ours, so a FIN
                    // here doubles as the acknowledgment we are waiting for.
                    ConnectionState::FinWait1 if peer_fin => {
                        ctx.cancel_timer(TimerId::Retransmit);
                        teardown.send_final_ack(ctx);
                        self.timeouts = 0;
                        self.transition(ConnectionState::TimedWait);
                    }
                    ConnectionState::FinWait1 if fin_ack => {
                        ctx.cancel_timer(TimerId::Retransmit);
                        self.timeouts = 0;
                        self.transition(ConnectionState::FinWait2);
                    }
                    ConnectionState::FinWait2 if peer_fin => {
                        teardown.send_final_ack(ctx);
                        self.transition(ConnectionState::TimedWait);
                    }
                    ConnectionState::TimedWait if peer_fin => {
                        debug!("peer repeated its FIN");
                        teardown.send_final_ack(ctx);
                    }
                    _ => {}
                }
            }
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer: TimerId) {
        match timer {
            TimerId::Linger => {
                if self.state == ConnectionState::TimedWait {
                    self.phase = Phase::Done;
                    self.transition(ConnectionState::Closed);
                    info!("connection closed");
                }
            }
            TimerId::Retransmit => {
                if !matches!(
                    self.state,
                    ConnectionState::SynSent | ConnectionState::Established | ConnectionState::FinWait1
                ) {
                    return;
                }
                self.timeouts += 1;
                if self.config.max_retries.is_some_and(|limit| self.timeouts > limit) {
                    self.abort(ctx);
                    return;
                }
                match &mut self.phase {
                    Phase::Handshake(handshake) => handshake.on_timeout(ctx),
                    Phase::Transfer { transfer, .. } => transfer.on_timeout(ctx),
                    Phase::Teardown(teardown) => teardown.on_timeout(ctx),
                    Phase::Idle | Phase::Done => {}
                }
            }
        }
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        match &mut self.phase {
            Phase::Idle | Phase::Handshake(_) => {
                let mut joined = Vec::with_capacity(self.source.len() + data.len());
                joined.extend_from_slice(&self.source);
                joined.extend_from_slice(data);
                self.source = Bytes::from(joined);
            }
            Phase::Transfer { transfer, .. } => transfer.push_source(ctx, data),
            Phase::Teardown(_) | Phase::Done => {
                warn!(len = data.len(), state = %self.state, "data handed over after close, dropped");
            }
        }
    }

    fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed | ConnectionState::Aborted)
    }
}
