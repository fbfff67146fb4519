use arq_lab_abstract::{Packet, SeqNum, SystemContext, TimerId, WireEvent, flags};

/// Active-open half of the three-way handshake.
///
/// The third step (our ACK) is not sent from here: it rides on the first data
/// segment, see [`super::transfer::Transfer::start`].
#[derive(Debug)]
pub struct Handshake {
    syn: Packet,
    rto_ms: u64,
}

/// What both ends agreed on once the SYN was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Established {
    /// Sequence number of our first data byte.
    pub local_seq: SeqNum,
    /// Next sequence number expected from the peer.
    pub peer_seq: SeqNum,
}

impl Handshake {
    pub fn new(isn: SeqNum, rto_ms: u64) -> Self {
        Self {
            syn: Packet::control(isn, SeqNum::ZERO, flags::SYN),
            rto_ms,
        }
    }

    pub fn isn(&self) -> SeqNum {
        self.syn.header.seq_num
    }

    pub fn send_syn(&self, ctx: &mut dyn SystemContext) {
        ctx.trace(WireEvent::send(self.syn.header));
        ctx.send_packet(self.syn.clone());
        ctx.start_timer(self.rto_ms, TimerId::Retransmit);
    }

    pub fn on_timeout(&self, ctx: &mut dyn SystemContext) {
        ctx.trace(WireEvent::Timeout { seq: self.isn() });
        ctx.trace(WireEvent::resend(self.syn.header));
        ctx.send_packet(self.syn.clone());
        ctx.start_timer(self.rto_ms, TimerId::Retransmit);
    }

    /// Accept a SYN+ACK (or SYN+DUPACK) acknowledging exactly our ISN.
    pub fn accept(&self, packet: &Packet) -> Option<Established> {
        let h = &packet.header;
        if h.is_syn() && h.acknowledges() && h.ack_num == self.isn().wrapping_add(1) {
            Some(Established {
                local_seq: h.ack_num,
                peer_seq: h.seq_num.wrapping_add(1),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arq_lab_abstract::{ActionBuffer, ScopedContext, TimerOp};

    fn seq(n: u32) -> SeqNum {
        SeqNum::new(n)
    }

    #[test]
    fn syn_is_logged_sent_and_timed() {
        let hs = Handshake::new(seq(4321), 500);
        let mut buffer = ActionBuffer::default();
        hs.send_syn(&mut ScopedContext::new(&mut buffer, 0));

        assert_eq!(buffer.events[0].to_string(), "SEND 4321 0 SYN");
        assert_eq!(buffer.outgoing_packets[0].header.flags, flags::SYN);
        assert_eq!(
            buffer.timer_ops,
            vec![TimerOp::Start {
                delay_ms: 500,
                timer: TimerId::Retransmit
            }]
        );
    }

    #[test]
    fn timeout_logs_before_resending_same_syn() {
        let hs = Handshake::new(seq(25600), 500);
        let mut buffer = ActionBuffer::default();
        hs.on_timeout(&mut ScopedContext::new(&mut buffer, 500));

        let lines: Vec<String> = buffer.events.iter().map(|e| e.to_string()).collect();
        assert_eq!(lines, vec!["TIMEOUT 25600", "RESEND 25600 0 SYN"]);
        assert_eq!(buffer.outgoing_packets[0].header.seq_num, seq(25600));
    }

    #[test]
    fn accepts_only_matching_syn_ack() {
        let hs = Handshake::new(seq(25600), 500);

        let good = Packet::control(seq(77), seq(0), flags::SYN | flags::ACK);
        assert_eq!(
            hs.accept(&good),
            Some(Established {
                local_seq: seq(0),
                peer_seq: seq(78)
            })
        );

        let dup = Packet::control(seq(77), seq(0), flags::SYN | flags::DUPACK);
        assert!(hs.accept(&dup).is_some());

        let wrong_ack = Packet::control(seq(77), seq(1), flags::SYN | flags::ACK);
        assert!(hs.accept(&wrong_ack).is_none());

        let no_syn = Packet::control(seq(77), seq(0), flags::ACK);
        assert!(hs.accept(&no_syn).is_none());

        let no_ack = Packet::control(seq(77), seq(0), flags::SYN);
        assert!(hs.accept(&no_ack).is_none());
    }
}
