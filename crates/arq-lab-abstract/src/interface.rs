use crate::event::WireEvent;
use crate::packet::Packet;
use crate::timer::TimerId;

/// The capabilities a driver (simulator or socket reactor) offers a protocol.
pub trait SystemContext {
    /// Send a packet to the network (unreliable channel).
    fn send_packet(&mut self, packet: Packet);

    /// Arm `timer` to fire after `delay_ms`. Re-arming replaces the pending
    /// deadline; a timer never fires twice for one arming.
    fn start_timer(&mut self, delay_ms: u64, timer: TimerId);

    /// Disarm `timer`. Cancelling a disarmed timer is a no-op.
    fn cancel_timer(&mut self, timer: TimerId);

    /// Hand in-order bytes to the application layer.
    fn deliver_data(&mut self, data: &[u8]);

    /// Record an observable protocol event (send/receive/timeout).
    fn trace(&mut self, event: WireEvent);

    /// Free-form diagnostic message.
    fn log(&mut self, message: &str);

    /// Current time in ms.
    fn now(&self) -> u64;

    /// Record a numeric sample (e.g. segments in flight).
    fn record_metric(&mut self, _name: &str, _value: f64) {}
}

/// One endpoint of a connection, driven entirely by callbacks.
pub trait TransportProtocol {
    /// Called once before any other callback.
    fn init(&mut self, _ctx: &mut dyn SystemContext) {}

    /// Called for every datagram that decoded successfully.
    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet);

    /// Called when an armed timer expires.
    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer: TimerId);

    /// Called when the application hands over more bytes to send.
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]);

    /// True once the endpoint has released its connection.
    fn is_closed(&self) -> bool {
        false
    }
}
