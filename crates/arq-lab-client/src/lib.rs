//! Drives a [`arq_lab_abstract::TransportProtocol`] over a real UDP socket.

mod reactor;

pub use reactor::{Reactor, ReactorError};
