//! Fixed-capacity ring of outstanding segments.
//!
//! Two coordinate systems are kept apart: buffer space (`head`, `len`,
//! slot indices modulo capacity) and sequence space (`base_seq`,
//! `next_seq`, modulo [`arq_lab_abstract::MODULUS`]).
//!
//! ```text
//!  base_seq                     next_seq
//!     │                             │
//!  ───┼─────────────────────────────┼──────▶ seq space
//!     │ slot[head] … slot[head+len-1]│
//! ```

use arq_lab_abstract::{Packet, SeqNum};

#[derive(Debug, Clone)]
pub struct Slot {
    /// The segment as it goes out on retransmission.
    pub packet: Packet,
    /// Sequence number just past this segment; what its acknowledgment carries.
    pub end: SeqNum,
    pub acked: bool,
    pub transmissions: u32,
}

#[derive(Debug)]
pub struct SendWindow {
    slots: Vec<Option<Slot>>,
    head: usize,
    len: usize,
    base_seq: SeqNum,
    next_seq: SeqNum,
}

impl SendWindow {
    pub fn new(capacity: usize, start: SeqNum) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
            base_seq: start,
            next_seq: start,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// First byte not yet acknowledged (equals `next_seq` when empty).
    pub fn base_seq(&self) -> SeqNum {
        self.base_seq
    }

    /// Sequence number the next admitted segment will carry.
    pub fn next_seq(&self) -> SeqNum {
        self.next_seq
    }

    fn index(&self, offset: usize) -> usize {
        (self.head + offset) % self.slots.len()
    }

    /// Admit a just-transmitted segment into the tail slot.
    ///
    /// # Panics
    ///
    /// Panics if the window is full or the segment does not start at `next_seq`.
    pub fn push(&mut self, packet: Packet) -> SeqNum {
        assert!(!self.is_full(), "push on a full send window");
        assert_eq!(
            packet.header.seq_num, self.next_seq,
            "segment does not start at next_seq"
        );
        let end = packet.end_seq();
        let idx = self.index(self.len);
        self.slots[idx] = Some(Slot {
            packet,
            end,
            acked: false,
            transmissions: 1,
        });
        self.len += 1;
        self.next_seq = end;
        end
    }

    pub fn oldest(&self) -> Option<&Slot> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Offset (from the oldest slot) of the outstanding segment whose end
    /// boundary is `ack`.
    ///
    /// Acknowledgments outside `base_seq..=next_seq` are stale or bogus and
    /// never match. Because the window spans less than half the sequence
    /// space, the boundaries inside it are unique.
    pub fn position_of(&self, ack: SeqNum) -> Option<usize> {
        let span = self.base_seq.distance_to(self.next_seq);
        if self.base_seq.distance_to(ack) > span {
            return None;
        }
        (0..self.len).find(|&offset| {
            self.slots[self.index(offset)]
                .as_ref()
                .is_some_and(|slot| slot.end == ack)
        })
    }

    /// Mark one slot acknowledged. Returns false if it already was.
    pub fn mark_acked(&mut self, offset: usize) -> bool {
        if offset >= self.len {
            return false;
        }
        let idx = self.index(offset);
        match self.slots[idx].as_mut() {
            Some(slot) if !slot.acked => {
                slot.acked = true;
                true
            }
            _ => false,
        }
    }

    /// Mark every slot up to and including `offset`. Returns how many changed.
    pub fn mark_acked_through(&mut self, offset: usize) -> usize {
        (0..=offset.min(self.len.saturating_sub(1)))
            .filter(|&o| self.mark_acked(o))
            .count()
    }

    /// Drop the contiguous run of acknowledged slots at the front, advancing
    /// `base_seq` past each one. Returns the number retired.
    pub fn retire_acked_prefix(&mut self) -> usize {
        let mut retired = 0;
        while self.len > 0 {
            let idx = self.head;
            if !self.slots[idx].as_ref().is_some_and(|slot| slot.acked) {
                break;
            }
            if let Some(slot) = self.slots[idx].take() {
                self.base_seq = slot.end;
            }
            self.head = (self.head + 1) % self.slots.len();
            self.len -= 1;
            retired += 1;
        }
        if self.len == 0 {
            self.base_seq = self.next_seq;
        }
        retired
    }

    /// Outstanding slots, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        let (front, back) = self.slots.split_at(self.head);
        back.iter()
            .chain(front.iter())
            .take(self.len)
            .filter_map(|slot| slot.as_ref())
    }

    /// Outstanding slots, oldest first, acknowledged or not.
    pub fn outstanding_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        let len = self.len;
        let (front, back) = self.slots.split_at_mut(self.head);
        back.iter_mut()
            .chain(front.iter_mut())
            .take(len)
            .filter_map(|slot| slot.as_mut())
    }

    /// Slots still waiting for their own acknowledgment, oldest first.
    pub fn unacked_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.outstanding_mut().filter(|slot| !slot.acked)
    }

    pub fn unacked_count(&self) -> usize {
        self.iter().filter(|slot| !slot.acked).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn fill(window: &mut SendWindow, lens: &[usize]) {
        for &len in lens {
            let pkt = Packet::new(window.next_seq(), SeqNum::ZERO, 0, Bytes::from(vec![1u8; len])).unwrap();
            window.push(pkt);
        }
    }

    #[test]
    fn push_advances_next_seq_only() {
        let mut w = SendWindow::new(4, SeqNum::new(100));
        fill(&mut w, &[512, 512]);
        assert_eq!(w.base_seq(), SeqNum::new(100));
        assert_eq!(w.next_seq(), SeqNum::new(1124));
        assert_eq!(w.len(), 2);
        assert!(!w.is_full());
    }

    #[test]
    #[should_panic(expected = "full send window")]
    fn push_beyond_capacity_panics() {
        let mut w = SendWindow::new(2, SeqNum::ZERO);
        fill(&mut w, &[10, 10, 10]);
    }

    #[test]
    fn ack_matches_segment_boundary() {
        let mut w = SendWindow::new(4, SeqNum::ZERO);
        fill(&mut w, &[100, 200, 300]);
        assert_eq!(w.position_of(SeqNum::new(100)), Some(0));
        assert_eq!(w.position_of(SeqNum::new(300)), Some(1));
        assert_eq!(w.position_of(SeqNum::new(600)), Some(2));
        assert_eq!(w.position_of(SeqNum::new(150)), None);
        assert_eq!(w.position_of(SeqNum::new(601)), None);
        assert_eq!(w.position_of(SeqNum::ZERO), None);
    }

    #[test]
    fn selective_ack_holds_base_until_gap_fills() {
        let mut w = SendWindow::new(4, SeqNum::ZERO);
        fill(&mut w, &[10, 10, 10]);
        assert!(w.mark_acked(1));
        assert!(!w.mark_acked(1));
        assert_eq!(w.retire_acked_prefix(), 0);
        assert_eq!(w.unacked_count(), 2);

        assert!(w.mark_acked(0));
        assert_eq!(w.retire_acked_prefix(), 2);
        assert_eq!(w.base_seq(), SeqNum::new(20));
        assert_eq!(w.len(), 1);
        assert_eq!(w.oldest().unwrap().packet.header.seq_num, SeqNum::new(20));
    }

    #[test]
    fn cumulative_ack_marks_prefix() {
        let mut w = SendWindow::new(4, SeqNum::ZERO);
        fill(&mut w, &[10, 10, 10, 10]);
        assert_eq!(w.mark_acked_through(2), 3);
        assert_eq!(w.retire_acked_prefix(), 3);
        assert_eq!(w.base_seq(), SeqNum::new(30));
        assert!(!w.is_full());
    }

    #[test]
    fn ring_wraps_in_buffer_space() {
        let mut w = SendWindow::new(3, SeqNum::ZERO);
        fill(&mut w, &[5, 5, 5]);
        w.mark_acked(0);
        w.mark_acked(1);
        assert_eq!(w.retire_acked_prefix(), 2);
        fill(&mut w, &[5, 5]);
        assert!(w.is_full());
        let seqs: Vec<u16> = w.iter().map(|s| s.packet.header.seq_num.raw()).collect();
        assert_eq!(seqs, vec![10, 15, 20]);
        assert_eq!(w.position_of(SeqNum::new(25)), Some(2));
    }

    #[test]
    fn boundaries_across_sequence_wrap() {
        let mut w = SendWindow::new(10, SeqNum::new(25000));
        fill(&mut w, &[512, 512]);
        assert_eq!(w.next_seq(), SeqNum::new(423));
        assert_eq!(w.position_of(SeqNum::new(25512)), Some(0));
        assert_eq!(w.position_of(SeqNum::new(423)), Some(1));
        // A stale ack from well behind the base never matches.
        assert_eq!(w.position_of(SeqNum::new(24000)), None);
        w.mark_acked_through(1);
        w.retire_acked_prefix();
        assert!(w.is_empty());
        assert_eq!(w.base_seq(), SeqNum::new(423));
    }

    #[test]
    fn zero_length_segment_is_tracked() {
        let mut w = SendWindow::new(2, SeqNum::new(9));
        fill(&mut w, &[0]);
        assert_eq!(w.len(), 1);
        assert_eq!(w.position_of(SeqNum::new(9)), Some(0));
    }

    #[test]
    fn unacked_mut_skips_acked_slots() {
        let mut w = SendWindow::new(4, SeqNum::ZERO);
        fill(&mut w, &[1, 1, 1, 1]);
        w.mark_acked(2);
        for slot in w.unacked_mut() {
            slot.transmissions += 1;
        }
        let tx: Vec<u32> = w.iter().map(|s| s.transmissions).collect();
        assert_eq!(tx, vec![2, 2, 1, 2]);
    }
}
