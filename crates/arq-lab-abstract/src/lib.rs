pub mod actions;
pub mod config;
pub mod event;
pub mod interface;
pub mod packet;
pub mod scenario;
pub mod seq;
pub mod timer;

pub use actions::{ActionBuffer, ScopedContext};
pub use config::{AckMode, ArqMode, ProtocolConfig, SimConfig, WINDOW_SIZE};
pub use event::WireEvent;
pub use interface::{SystemContext, TransportProtocol};
pub use packet::{PACKET_LEN, PAYLOAD_LEN, Packet, PacketError, SegmentHeader};
// Re-export flags module from packet so users can write `arq_lab_abstract::flags::SYN`
pub use packet::flags;
pub use seq::{MODULUS, SeqNum};
pub use timer::{Clock, ManualClock, SystemClock, TimerId, TimerOp, Timers};

pub use scenario::{EventKind, PayloadSpec, SimConfigOverride, TestAction, TestAssertion, TestScenario};
