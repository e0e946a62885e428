//! Git wire protocol framing.
//!
//! Covers the byte-level framing shared between the on-disk and on-the-wire
//! formats: pkt-line, side-band multiplexing, capability negotiation for
//! protocol v1 and v2, and refspec parsing/matching/expansion. Connecting a
//! transport and driving a full fetch or push exchange is left to callers;
//! this crate frames and unframes bytes.

pub mod capability;
pub mod pktline;
pub mod refspec;
pub mod sideband;
pub mod v1;
pub mod v2;

/// Errors that can occur while framing or parsing wire-protocol bytes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    #[error("incomplete pkt-line: {0}")]
    IncompletePktLine(String),

    #[error("invalid pkt-line length: {0}")]
    InvalidPktLineLength(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("malformed refspec: {0}")]
    RefspecMalformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
