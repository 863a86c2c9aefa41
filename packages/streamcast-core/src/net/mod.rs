//! Datagram/stream socket layer.
//!
//! Built on `tokio::net::UdpSocket`/`TcpListener`, selected with
//! `tokio::select!` rather than a hand-rolled `select(2)` wrapper.

pub mod socket;

pub use socket::{DatagramSocket, StreamSocket};
