//! Reliable byte-stream endpoints over an unreliable datagram service.
//!
//! [`client::Client`] opens a connection, streams its data source through a
//! sliding window and closes; [`server::Server`] is the matching responder.
//! Both implement [`arq_lab_abstract::TransportProtocol`] and are driven by
//! the simulator or a socket reactor.

mod builtin;
pub mod client;
mod names;
pub mod server;

pub use builtin::{PairRequest, load_pair, receiver, sender};
pub use client::{Client, ConnectionError, ConnectionState};
pub use names::{ack_mode_by_name, mode_by_name};
pub use server::{Server, ServerState};
