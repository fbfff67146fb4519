use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use arq_lab_abstract::{
    ActionBuffer, Clock, Packet, ScopedContext, SystemClock, SystemContext, Timers,
    TransportProtocol, WireEvent,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("receiving from the socket failed")]
    Recv(#[source] io::Error),
    #[error("sending to {peer} failed")]
    Send {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}

enum Wake {
    Datagram(io::Result<(usize, SocketAddr)>),
    Timer,
}

/// Single-threaded event loop for one endpoint.
///
/// Each inbound datagram or timer expiry becomes one protocol callback; its
/// buffered effects (sends, timer changes, trace events) are applied before
/// the next one is taken.
pub struct Reactor<P> {
    socket: UdpSocket,
    /// Where sends go. A responder learns it from the first datagram.
    peer: Option<SocketAddr>,
    protocol: P,
    clock: SystemClock,
    timers: Timers,
    events: Vec<WireEvent>,
    delivered: Vec<u8>,
    echo: bool,
}

impl<P: TransportProtocol> Reactor<P> {
    pub fn new(socket: UdpSocket, peer: Option<SocketAddr>, protocol: P) -> Self {
        Self {
            socket,
            peer,
            protocol,
            clock: SystemClock::new(),
            timers: Timers::new(),
            events: Vec::new(),
            delivered: Vec::new(),
            echo: false,
        }
    }

    /// Print every wire event to stdout as it happens.
    pub fn echo_events(mut self, on: bool) -> Self {
        self.echo = on;
        self
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn events(&self) -> &[WireEvent] {
        &self.events
    }

    /// Bytes the protocol handed to the application.
    pub fn delivered(&self) -> &[u8] {
        &self.delivered
    }

    /// Run until the protocol reports itself closed.
    pub async fn run(&mut self) -> Result<(), ReactorError> {
        self.dispatch(|p, ctx| p.init(ctx)).await?;

        let mut buf = vec![0u8; 2 * arq_lab_abstract::PACKET_LEN];
        while !self.protocol.is_closed() {
            let wait = self
                .timers
                .next_deadline()
                .map(|deadline| deadline.saturating_sub(self.clock.now_ms()));
            let sleep = async {
                match wait {
                    Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let wake = tokio::select! {
                recv = self.socket.recv_from(&mut buf) => Wake::Datagram(recv),
                _ = sleep => Wake::Timer,
            };

            match wake {
                Wake::Datagram(recv) => {
                    let (len, from) = recv.map_err(ReactorError::Recv)?;
                    self.on_datagram(&buf[..len], from).await?;
                }
                Wake::Timer => {
                    for timer in self.timers.take_expired(self.clock.now_ms()) {
                        self.dispatch(|p, ctx| p.on_timer(ctx, timer)).await?;
                    }
                }
            }
        }
        info!("endpoint closed, leaving event loop");
        Ok(())
    }

    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> Result<(), ReactorError> {
        match self.peer {
            Some(peer) if peer != from => {
                debug!(%from, %peer, "datagram from unexpected address ignored");
                return Ok(());
            }
            Some(_) => {}
            None => {
                info!(%from, "peer address learned");
                self.peer = Some(from);
            }
        }
        match Packet::decode(datagram) {
            Ok(packet) => self.dispatch(|p, ctx| p.on_packet(ctx, packet)).await,
            Err(err) => {
                debug!(%err, len = datagram.len(), "discarding undecodable datagram");
                Ok(())
            }
        }
    }

    async fn dispatch<F>(&mut self, callback: F) -> Result<(), ReactorError>
    where
        F: FnOnce(&mut P, &mut dyn SystemContext),
    {
        let now = self.clock.now_ms();
        let mut buffer = ActionBuffer::default();
        callback(&mut self.protocol, &mut ScopedContext::new(&mut buffer, now));
        self.apply(buffer, now).await
    }

    async fn apply(&mut self, buffer: ActionBuffer, now: u64) -> Result<(), ReactorError> {
        for event in buffer.events {
            if self.echo {
                println!("{event}");
            }
            self.events.push(event);
        }
        for log in buffer.logs {
            debug!("{log}");
        }
        for (name, value) in buffer.metrics {
            trace!(metric = %name, value);
        }
        for data in buffer.delivered_data {
            self.delivered.extend_from_slice(&data);
        }
        for op in buffer.timer_ops {
            self.timers.apply(op, now);
        }

        let Some(peer) = self.peer else {
            if !buffer.outgoing_packets.is_empty() {
                debug!("no peer yet, dropping outgoing packets");
            }
            return Ok(());
        };
        for packet in buffer.outgoing_packets {
            self.socket
                .send_to(&packet.encode(), peer)
                .await
                .map_err(|source| ReactorError::Send { peer, source })?;
        }
        Ok(())
    }
}
