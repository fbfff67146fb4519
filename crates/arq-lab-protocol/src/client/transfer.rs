//! Sliding-window ARQ data transfer.
//!
//! [`Transfer`] segments the data source into chunks of at most
//! [`PAYLOAD_LEN`] bytes, keeps up to `window` of them in flight and drives
//! retransmission from a single timer that always covers the oldest
//! outstanding segment.
//!
//! Acknowledgment numbers are matched against segment end boundaries and
//! read under the peer's [`AckMode`]: a selective peer's ack marks only the
//! segment it names, a cumulative peer's ack also covers everything older.
//! The window slides only over a contiguous acknowledged prefix. On timeout
//! [`ArqMode::SelectiveRepeat`] resends the segments not yet acknowledged,
//! [`ArqMode::GoBackN`] the whole outstanding window.

use arq_lab_abstract::{
    AckMode, ArqMode, PAYLOAD_LEN, Packet, SegmentHeader, SeqNum, SystemContext, TimerId, WireEvent, flags,
};
use bytes::Bytes;
use tracing::debug;

use super::window::{SendWindow, Slot};

/// Result of feeding one acknowledgment number to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Matched no outstanding segment, or one already acknowledged.
    Ignored,
    /// Acknowledged segment(s) behind a gap; the window did not move.
    Marked,
    /// The window slid forward by this many segments.
    Advanced(usize),
}

#[derive(Debug)]
pub struct Transfer {
    mode: ArqMode,
    peer_acks: AckMode,
    rto_ms: u64,
    window: SendWindow,
    source: Bytes,
    /// Acknowledgment carried by the first segment (completes the handshake).
    peer_ack: SeqNum,
}

impl Transfer {
    pub fn new(
        mode: ArqMode,
        peer_acks: AckMode,
        rto_ms: u64,
        window_size: usize,
        start: SeqNum,
        peer_ack: SeqNum,
        source: Bytes,
    ) -> Self {
        Self {
            mode,
            peer_acks,
            rto_ms,
            window: SendWindow::new(window_size, start),
            source,
            peer_ack,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn next_seq(&self) -> SeqNum {
        self.window.next_seq()
    }

    pub fn base_seq(&self) -> SeqNum {
        self.window.base_seq()
    }

    pub fn window(&self) -> &SendWindow {
        &self.window
    }

    /// Source exhausted and every segment acknowledged.
    pub fn is_complete(&self) -> bool {
        self.window.is_empty() && self.source.is_empty()
    }

    /// Send the first segment, then fill the window.
    ///
    /// The first segment always goes out, even with an empty source, because
    /// it carries the handshake's final ACK. Its retransmissions are flagged
    /// DUPACK instead of ACK.
    pub fn start(&mut self, ctx: &mut dyn SystemContext) {
        let chunk = self.take_chunk();
        let first = self.segment(flags::ACK, self.peer_ack, chunk);
        let stored = first.with_flags(flags::DUPACK);
        self.transmit(ctx, first, stored);
        self.fill(ctx);
        ctx.start_timer(self.rto_ms, TimerId::Retransmit);
        self.record_in_flight(ctx);
    }

    /// Append application bytes and send whatever now fits.
    pub fn push_source(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut joined = Vec::with_capacity(self.source.len() + data.len());
        joined.extend_from_slice(&self.source);
        joined.extend_from_slice(data);
        self.source = Bytes::from(joined);

        let was_idle = self.window.is_empty();
        if self.fill(ctx) > 0 {
            if was_idle {
                ctx.start_timer(self.rto_ms, TimerId::Retransmit);
            }
            self.record_in_flight(ctx);
        }
    }

    pub fn on_ack(&mut self, ctx: &mut dyn SystemContext, ack: SeqNum) -> AckOutcome {
        let Some(offset) = self.window.position_of(ack) else {
            debug!(%ack, base = %self.window.base_seq(), "ack outside outstanding boundaries");
            return AckOutcome::Ignored;
        };

        let marked = match self.peer_acks {
            AckMode::Selective => self.window.mark_acked(offset) as usize,
            AckMode::Cumulative => self.window.mark_acked_through(offset),
        };
        if marked == 0 {
            return AckOutcome::Ignored;
        }

        let retired = self.window.retire_acked_prefix();
        if retired == 0 {
            debug!(%ack, offset, "segment acknowledged out of order");
            self.record_in_flight(ctx);
            return AckOutcome::Marked;
        }

        self.fill(ctx);
        if self.window.is_empty() {
            ctx.cancel_timer(TimerId::Retransmit);
        } else {
            ctx.start_timer(self.rto_ms, TimerId::Retransmit);
        }
        debug!(
            %ack,
            retired,
            base = %self.window.base_seq(),
            in_flight = self.window.len(),
            "window advanced"
        );
        self.record_in_flight(ctx);
        AckOutcome::Advanced(retired)
    }

    /// Retransmission timer expired: report the oldest segment, resend per
    /// the ARQ mode, rearm.
    pub fn on_timeout(&mut self, ctx: &mut dyn SystemContext) {
        let Some(oldest) = self.window.oldest() else {
            return;
        };
        ctx.trace(WireEvent::Timeout {
            seq: oldest.packet.header.seq_num,
        });
        match self.mode {
            ArqMode::SelectiveRepeat => resend(ctx, self.window.unacked_mut()),
            ArqMode::GoBackN => resend(ctx, self.window.outstanding_mut()),
        }
        ctx.start_timer(self.rto_ms, TimerId::Retransmit);
    }

    fn fill(&mut self, ctx: &mut dyn SystemContext) -> usize {
        let mut sent = 0;
        while !self.window.is_full() && !self.source.is_empty() {
            let chunk = self.take_chunk();
            let packet = self.segment(0, SeqNum::ZERO, chunk);
            self.transmit(ctx, packet.clone(), packet);
            sent += 1;
        }
        sent
    }

    fn take_chunk(&mut self) -> Bytes {
        let n = self.source.len().min(PAYLOAD_LEN);
        self.source.split_to(n)
    }

    fn segment(&self, flags: u8, ack: SeqNum, chunk: Bytes) -> Packet {
        // `take_chunk` never yields more than PAYLOAD_LEN bytes.
        Packet {
            header: SegmentHeader::new(self.window.next_seq(), ack, flags),
            payload: chunk,
        }
    }

    fn transmit(&mut self, ctx: &mut dyn SystemContext, packet: Packet, stored: Packet) {
        ctx.trace(WireEvent::send(packet.header));
        ctx.send_packet(packet);
        self.window.push(stored);
    }

    fn record_in_flight(&self, ctx: &mut dyn SystemContext) {
        ctx.record_metric("in_flight", self.window.len() as f64);
    }
}

fn resend<'a>(ctx: &mut dyn SystemContext, slots: impl Iterator<Item = &'a mut Slot>) {
    for slot in slots {
        ctx.trace(WireEvent::resend(slot.packet.header));
        ctx.send_packet(slot.packet.clone());
        slot.transmissions += 1;
    }
}
