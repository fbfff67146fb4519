use crate::trace::{SimulationReport, TraceEntry};
use arq_lab_abstract::{
    ActionBuffer, PACKET_LEN, Packet, ScopedContext, SeqNum, SimConfig, SystemContext, TimerId,
    TimerOp, TransportProtocol, WireEvent,
};
use rand::Rng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeId {
    Sender,
    Receiver,
}

impl NodeId {
    pub fn peer(&self) -> Self {
        match self {
            NodeId::Sender => NodeId::Receiver,
            NodeId::Receiver => NodeId::Sender,
        }
    }
}

#[derive(Debug)]
pub enum EventType {
    /// An encoded datagram reaches `to`.
    PacketArrival { to: NodeId, datagram: Vec<u8> },
    TimerExpiry {
        node: NodeId,
        timer: TimerId,
        generation: u64,
    },
    AppSend { data: Vec<u8> },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of a link-layer event.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    rng: rand::rngs::StdRng,

    pub sender: Box<dyn TransportProtocol>,
    pub receiver: Box<dyn TransportProtocol>,

    /// Bytes the receiver handed to its application, in delivery order.
    pub delivered_data: Vec<u8>,
    pub sender_packet_count: u32,

    /// Wire events reported by each endpoint, stamped with simulation time.
    sender_events: Vec<(u64, WireEvent)>,
    receiver_events: Vec<(u64, WireEvent)>,

    /// Time series recorded via `SystemContext::record_metric`.
    /// Key: metric name (e.g., "in_flight"), Value: Vec<(time_ms, value)>
    pub metrics: HashMap<String, Vec<(u64, f64)>>,

    drop_sender_seq_once: Vec<SeqNum>,
    drop_receiver_ack_once: Vec<SeqNum>,
    duplicate_receiver_fins: u32,

    pub link_events: Vec<LinkEventSummary>,

    /// Starting or cancelling a timer bumps its generation; an expiry event
    /// only fires if it carries the current one.
    timer_generations: HashMap<(NodeId, TimerId), u64>,

    closed_at: HashMap<NodeId, u64>,
}

impl Simulator {
    pub fn new(
        config: SimConfig,
        sender: Box<dyn TransportProtocol>,
        receiver: Box<dyn TransportProtocol>,
    ) -> Self {
        use rand::SeedableRng;
        let rng = rand::rngs::StdRng::seed_from_u64(config.seed);

        Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            rng,
            sender,
            receiver,
            delivered_data: Vec::new(),
            sender_packet_count: 0,
            sender_events: Vec::new(),
            receiver_events: Vec::new(),
            metrics: HashMap::new(),
            drop_sender_seq_once: Vec::new(),
            drop_receiver_ack_once: Vec::new(),
            duplicate_receiver_fins: 0,
            link_events: Vec::new(),
            timer_generations: HashMap::new(),
            closed_at: HashMap::new(),
        }
    }

    /// Drop the first packet sent by Sender whose seq equals `seq`.
    pub fn add_drop_sender_seq_once(&mut self, seq: SeqNum) {
        self.drop_sender_seq_once.push(seq);
    }

    /// Drop the first acknowledgment sent by Receiver whose ack equals `ack`.
    pub fn add_drop_receiver_ack_once(&mut self, ack: SeqNum) {
        self.drop_receiver_ack_once.push(ack);
    }

    /// Deliver the next FIN sent by Receiver twice.
    pub fn duplicate_next_receiver_fin(&mut self) {
        self.duplicate_receiver_fins += 1;
    }

    /// Return a slice of (time_ms, value) samples for a named metric, if present.
    pub fn metric_series(&self, name: &str) -> Option<&[(u64, f64)]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    pub fn metric_max(&self, name: &str) -> Option<f64> {
        self.metric_series(name)?
            .iter()
            .map(|&(_, v)| v)
            .reduce(f64::max)
    }

    pub fn events(&self, node: NodeId) -> &[(u64, WireEvent)] {
        match node {
            NodeId::Sender => &self.sender_events,
            NodeId::Receiver => &self.receiver_events,
        }
    }

    /// Event log lines of one endpoint, without timestamps.
    pub fn event_lines(&self, node: NodeId) -> Vec<String> {
        self.events(node).iter().map(|(_, e)| e.to_string()).collect()
    }

    /// Simulation time at which `node` first reported itself closed.
    pub fn closed_at(&self, node: NodeId) -> Option<u64> {
        self.closed_at.get(&node).copied()
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn schedule_app_send(&mut self, time: u64, data: Vec<u8>) {
        self.push_event(time, EventType::AppSend { data });
    }

    pub fn init(&mut self) {
        self.dispatch(NodeId::Receiver, |p, ctx| p.init(ctx));
        self.dispatch(NodeId::Sender, |p, ctx| p.init(ctx));
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    /// Process the next event. Returns true if an event was processed, false if queue is empty.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.event_queue.pop() else {
            return false;
        };

        self.time = event.time;

        match event.event_type {
            EventType::PacketArrival { to, datagram } => match Packet::decode(&datagram) {
                Ok(packet) => self.dispatch(to, |p, ctx| p.on_packet(ctx, packet)),
                Err(err) => {
                    debug!(node = ?to, %err, "discarding undecodable datagram");
                    self.link_event(format!("[{:?}] DISCARD ({err})", to));
                }
            },
            EventType::TimerExpiry {
                node,
                timer,
                generation,
            } => {
                if self.timer_generations.get(&(node, timer)) != Some(&generation) {
                    debug!(?node, ?timer, "skipping stale timer event");
                    return true;
                }
                self.dispatch(node, |p, ctx| p.on_timer(ctx, timer));
            }
            EventType::AppSend { data } => {
                self.dispatch(NodeId::Sender, |p, ctx| p.on_app_data(ctx, &data));
            }
        }
        true
    }

    pub fn run_until_complete(&mut self) {
        self.init();
        while self.step() {}
    }

    /// Step until the queue drains or simulation time passes `limit_ms`.
    /// Returns false on timeout.
    pub fn run_until(&mut self, limit_ms: u64) -> bool {
        while let Some(next) = self.peek_next_event_time() {
            if next > limit_ms {
                return false;
            }
            self.step();
        }
        true
    }

    pub fn export_report(&self) -> SimulationReport {
        let entries = |events: &[(u64, WireEvent)]| {
            events
                .iter()
                .map(|(time, e)| TraceEntry {
                    time: *time,
                    event: e.to_string(),
                })
                .collect()
        };
        SimulationReport {
            config: self.config.clone(),
            duration_ms: self.time,
            delivered_bytes: self.delivered_data.len(),
            delivered_data: self.delivered_data.clone(),
            sender_packet_count: self.sender_packet_count,
            sender_events: entries(&self.sender_events),
            receiver_events: entries(&self.receiver_events),
            sender_closed_at: self.closed_at(NodeId::Sender),
            receiver_closed_at: self.closed_at(NodeId::Receiver),
            metrics: self.metrics.clone(),
            link_events: self.link_events.clone(),
        }
    }

    /// Run one protocol callback against a fresh action buffer, then apply it.
    fn dispatch<F>(&mut self, node: NodeId, callback: F)
    where
        F: FnOnce(&mut dyn TransportProtocol, &mut dyn SystemContext),
    {
        let mut buffer = ActionBuffer::default();
        {
            let mut ctx = ScopedContext::new(&mut buffer, self.time);
            let protocol = match node {
                NodeId::Sender => self.sender.as_mut(),
                NodeId::Receiver => self.receiver.as_mut(),
            };
            callback(protocol, &mut ctx);
        }
        self.process_actions(node, buffer);

        let closed = match node {
            NodeId::Sender => self.sender.is_closed(),
            NodeId::Receiver => self.receiver.is_closed(),
        };
        if closed && !self.closed_at.contains_key(&node) {
            info!(?node, time = self.time, "endpoint closed");
            self.closed_at.insert(node, self.time);
        }
    }

    fn link_event(&mut self, description: String) {
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description,
        });
    }

    fn process_actions(&mut self, source_node: NodeId, buffer: ActionBuffer) {
        for (name, value) in buffer.metrics {
            self.metrics
                .entry(name)
                .or_default()
                .push((self.time, value));
        }

        for log in buffer.logs {
            info!("[{:?}] {}", source_node, log);
        }

        for event in buffer.events {
            debug!("[{:?}] {}", source_node, event);
            match source_node {
                NodeId::Sender => self.sender_events.push((self.time, event)),
                NodeId::Receiver => self.receiver_events.push((self.time, event)),
            }
        }

        for data in buffer.delivered_data {
            self.link_event(format!(
                "[{:?}] DELIVERED {} bytes to application",
                source_node,
                data.len()
            ));
            self.delivered_data.extend_from_slice(&data);
        }

        for op in buffer.timer_ops {
            let (TimerOp::Start { timer, .. } | TimerOp::Cancel(timer)) = op;
            let generation = self.timer_generations.entry((source_node, timer)).or_insert(0);
            *generation += 1;
            let generation = *generation;
            if let TimerOp::Start { delay_ms, .. } = op {
                self.push_event(
                    self.time + delay_ms,
                    EventType::TimerExpiry {
                        node: source_node,
                        timer,
                        generation,
                    },
                );
            }
        }

        for packet in buffer.outgoing_packets {
            self.transmit(source_node, packet);
        }
    }

    /// Channel model: deterministic faults first, then random loss,
    /// corruption, latency and duplication.
    fn transmit(&mut self, source_node: NodeId, packet: Packet) {
        let h = packet.header;
        let target_node = source_node.peer();
        let mut copies = 1;

        match source_node {
            NodeId::Sender => {
                self.sender_packet_count += 1;
                if let Some(pos) = self.drop_sender_seq_once.iter().position(|s| *s == h.seq_num) {
                    self.drop_sender_seq_once.remove(pos);
                    self.link_event(format!(
                        "[Sender->Receiver] DROP (deterministic seq) seq={}",
                        h.seq_num
                    ));
                    return;
                }
            }
            NodeId::Receiver => {
                if h.acknowledges()
                    && let Some(pos) = self.drop_receiver_ack_once.iter().position(|a| *a == h.ack_num)
                {
                    self.drop_receiver_ack_once.remove(pos);
                    self.link_event(format!(
                        "[Receiver->Sender] DROP (deterministic ack) ack={}",
                        h.ack_num
                    ));
                    return;
                }
                if h.is_fin() && self.duplicate_receiver_fins > 0 {
                    self.duplicate_receiver_fins -= 1;
                    copies += 1;
                    self.link_event(format!(
                        "[Receiver->Sender] DUPLICATE (deterministic FIN) seq={}",
                        h.seq_num
                    ));
                }
            }
        }

        if self.rng.random::<f64>() < self.config.loss_rate {
            self.link_event(format!(
                "[{:?}->{:?}] DROP (random loss) seq={} ack={}",
                source_node, target_node, h.seq_num, h.ack_num
            ));
            return;
        }

        let mut datagram = packet.encode().to_vec();
        if self.rng.random::<f64>() < self.config.corrupt_rate {
            let keep = self.rng.random_range(0..PACKET_LEN);
            datagram.truncate(keep);
            self.link_event(format!(
                "[{:?}->{:?}] CORRUPT seq={} ack={} (truncated to {keep} bytes)",
                source_node, target_node, h.seq_num, h.ack_num
            ));
        }

        if self.rng.random::<f64>() < self.config.duplicate_rate {
            copies += 1;
            self.link_event(format!(
                "[{:?}->{:?}] DUPLICATE seq={} ack={}",
                source_node, target_node, h.seq_num, h.ack_num
            ));
        }

        for _ in 0..copies {
            let max_latency = self.config.max_latency.max(self.config.min_latency);
            let latency = self
                .rng
                .random_range(self.config.min_latency..=max_latency);
            self.link_event(format!(
                "[{:?}->{:?}] SEND seq={} ack={} (latency={}ms)",
                source_node, target_node, h.seq_num, h.ack_num, latency
            ));
            self.push_event(
                self.time + latency,
                EventType::PacketArrival {
                    to: target_node,
                    datagram: datagram.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeId, Simulator};
    use arq_lab_abstract::{Packet, SimConfig, SystemContext, TimerId, TransportProtocol};

    /// Arms the retransmit timer twice and the linger timer once; linger
    /// cancels retransmit.
    struct TimerProbe;

    impl TransportProtocol for TimerProbe {
        fn init(&mut self, ctx: &mut dyn SystemContext) {
            ctx.start_timer(10, TimerId::Retransmit);
            ctx.start_timer(30, TimerId::Retransmit);
            ctx.start_timer(20, TimerId::Linger);
        }

        fn on_packet(&mut self, _ctx: &mut dyn SystemContext, _packet: Packet) {}

        fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer: TimerId) {
            match timer {
                TimerId::Retransmit => ctx.record_metric("retransmit_fired", 1.0),
                TimerId::Linger => ctx.cancel_timer(TimerId::Retransmit),
            }
        }

        fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
    }

    #[test]
    fn restarted_and_cancelled_timers_do_not_fire() {
        let mut simulator = Simulator::new(
            SimConfig::default(),
            Box::new(TimerProbe),
            Box::new(TimerProbe),
        );
        simulator.run_until_complete();
        // Re-arming replaced the 10 ms deadline; the 30 ms one was cancelled at 20 ms.
        assert_eq!(simulator.current_time(), 30);
        assert!(simulator.metric_series("retransmit_fired").is_none());
        assert!(simulator.events(NodeId::Sender).is_empty());
    }
}
