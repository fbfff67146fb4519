use arq_lab_abstract::{Packet, SeqNum, SystemContext, TimerId, WireEvent, flags};

/// Active-close half of the connection release.
///
/// Sends our FIN, recognises its acknowledgment and the peer's FIN, and
/// answers the latter with the final ACK. Which of these is legal at a given
/// moment is decided by the caller's connection state.
#[derive(Debug)]
pub struct Teardown {
    fin: Packet,
    /// The sequence number the peer's FIN must carry.
    peer_seq: SeqNum,
    rto_ms: u64,
    linger_ms: u64,
    final_acks: u32,
}

impl Teardown {
    pub fn new(fin_seq: SeqNum, peer_seq: SeqNum, rto_ms: u64, linger_ms: u64) -> Self {
        Self {
            fin: Packet::control(fin_seq, SeqNum::ZERO, flags::FIN),
            peer_seq,
            rto_ms,
            linger_ms,
            final_acks: 0,
        }
    }

    pub fn fin_seq(&self) -> SeqNum {
        self.fin.header.seq_num
    }

    pub fn send_fin(&self, ctx: &mut dyn SystemContext) {
        ctx.trace(WireEvent::send(self.fin.header));
        ctx.send_packet(self.fin.clone());
        ctx.start_timer(self.rto_ms, TimerId::Retransmit);
    }

    pub fn on_timeout(&self, ctx: &mut dyn SystemContext) {
        ctx.trace(WireEvent::Timeout { seq: self.fin_seq() });
        ctx.trace(WireEvent::resend(self.fin.header));
        ctx.send_packet(self.fin.clone());
        ctx.start_timer(self.rto_ms, TimerId::Retransmit);
    }

    pub fn is_fin_ack(&self, packet: &Packet) -> bool {
        let h = &packet.header;
        !h.is_syn() && h.acknowledges() && h.ack_num == self.fin_seq().wrapping_add(1)
    }

    pub fn is_peer_fin(&self, packet: &Packet) -> bool {
        let h = &packet.header;
        h.is_fin() && !h.is_syn() && h.seq_num == self.peer_seq
    }

    /// Acknowledge the peer's FIN.
    ///
    /// The first answer arms the linger timer; later ones (the peer did not
    /// see our ACK and repeated its FIN) are flagged DUPACK and leave the
    /// running linger untouched.
    pub fn send_final_ack(&mut self, ctx: &mut dyn SystemContext) {
        let flag = if self.final_acks == 0 {
            flags::ACK
        } else {
            flags::DUPACK
        };
        let ack = Packet::control(
            self.fin_seq().wrapping_add(1),
            self.peer_seq.wrapping_add(1),
            flag,
        );
        ctx.trace(WireEvent::send(ack.header));
        ctx.send_packet(ack);
        if self.final_acks == 0 {
            ctx.start_timer(self.linger_ms, TimerId::Linger);
        }
        self.final_acks += 1;
    }

    pub fn final_acks_sent(&self) -> u32 {
        self.final_acks
    }
}
