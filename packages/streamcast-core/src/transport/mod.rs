//! Server and client transports.
//!
//! The socket layer (`crate::net`) is built on `tokio::net::UdpSocket`/
//! `TcpListener`, selected with `tokio::select!` rather than a hand-rolled
//! `select(2)` wrapper: a systems-language async runtime subsumes the
//! hand-rolled Selector/readiness-multiplexing component a C++
//! implementation would need.

pub mod client;
pub mod server;

pub use client::{controller_event, discover, ClientTransport, DiscoveryDecision};
pub use server::{ConnectionAuthorizer, DiscoveryAuthorizer, ServerTransport, Subscriber};
