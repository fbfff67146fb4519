use crate::event::WireEvent;
use crate::interface::SystemContext;
use crate::packet::Packet;
use crate::timer::{TimerId, TimerOp};

/// Effects requested by a protocol during a single callback.
///
/// Drivers run a callback against a [`ScopedContext`], then apply the buffer
/// before taking the next event, so one event is fully processed before the
/// next one starts.
#[derive(Debug, Default)]
pub struct ActionBuffer {
    pub outgoing_packets: Vec<Packet>,
    /// Timer requests in the order they were made.
    pub timer_ops: Vec<TimerOp>,
    pub events: Vec<WireEvent>,
    pub logs: Vec<String>,
    pub delivered_data: Vec<Vec<u8>>,
    pub metrics: Vec<(String, f64)>,
}

impl ActionBuffer {
    pub fn is_empty(&self) -> bool {
        self.outgoing_packets.is_empty()
            && self.timer_ops.is_empty()
            && self.events.is_empty()
            && self.logs.is_empty()
            && self.delivered_data.is_empty()
            && self.metrics.is_empty()
    }
}

pub struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl<'a> ScopedContext<'a> {
    pub fn new(buffer: &'a mut ActionBuffer, now: u64) -> Self {
        Self { buffer, now }
    }
}

impl<'a> SystemContext for ScopedContext<'a> {
    fn send_packet(&mut self, packet: Packet) {
        self.buffer.outgoing_packets.push(packet);
    }

    fn start_timer(&mut self, delay_ms: u64, timer: TimerId) {
        self.buffer.timer_ops.push(TimerOp::Start { delay_ms, timer });
    }

    fn cancel_timer(&mut self, timer: TimerId) {
        self.buffer.timer_ops.push(TimerOp::Cancel(timer));
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.buffer.delivered_data.push(data.to_vec());
    }

    fn trace(&mut self, event: WireEvent) {
        self.buffer.events.push(event);
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.buffer.metrics.push((name.to_string(), value));
    }
}
