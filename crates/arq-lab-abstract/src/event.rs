use std::fmt;

use crate::packet::SegmentHeader;
use crate::seq::SeqNum;

/// Observable protocol events, printed in the reference log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEvent {
    Send { header: SegmentHeader, resend: bool },
    Recv { header: SegmentHeader },
    Timeout { seq: SeqNum },
}

impl WireEvent {
    pub fn send(header: SegmentHeader) -> Self {
        Self::Send {
            header,
            resend: false,
        }
    }

    pub fn resend(header: SegmentHeader) -> Self {
        Self::Send {
            header,
            resend: true,
        }
    }

    pub fn is_resend(&self) -> bool {
        matches!(self, Self::Send { resend: true, .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl fmt::Display for WireEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireEvent::Send { header: h, resend } => {
                let verb = if *resend { "RESEND" } else { "SEND" };
                write!(f, "{verb} {} {}", h.seq_num, h.ack_num)?;
                if h.is_syn() {
                    f.write_str(" SYN")?;
                }
                if h.is_fin() {
                    f.write_str(" FIN")?;
                }
                if h.is_ack() {
                    f.write_str(" ACK")?;
                }
                // Retransmissions never advertise DUP-ACK.
                if h.is_dupack() && !*resend {
                    f.write_str(" DUP-ACK")?;
                }
                Ok(())
            }
            WireEvent::Recv { header: h } => {
                write!(f, "RECV {} {}", h.seq_num, h.ack_num)?;
                if h.is_syn() {
                    f.write_str(" SYN")?;
                }
                if h.is_fin() {
                    f.write_str(" FIN")?;
                }
                if h.acknowledges() {
                    f.write_str(" ACK")?;
                }
                Ok(())
            }
            WireEvent::Timeout { seq } => write!(f, "TIMEOUT {seq}"),
        }
    }
}
