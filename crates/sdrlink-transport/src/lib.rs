//! Transport implementations for sdrlink.
//!
//! - [`TcpTransport`]: the newline-framed command/status connection, with
//!   the retrying connect radios need right after they are announced
//! - [`UdpTransport`]: VITA-49 telemetry and discovery datagrams

pub mod tcp;
pub mod udp;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;
