//! Minimal multi-client TCP message relay.
//!
//! Clients connect over TCP and exchange `<EOF>`-delimited UTF-8 text; the
//! server rebroadcasts each message to every other connected client with the
//! sender's address prepended. Each module covers one responsibility:
//!
//! - [`cli`] parses the command-line interface for serve and client modes.
//! - [`frame`] is the wire codec: an incremental `<EOF>` framer plus the
//!   encoder.
//! - [`connection`] wraps one client's write half with its identity and
//!   lifecycle state.
//! - [`registry`] is the shared live-connection set behind an
//!   add/remove/snapshot contract.
//! - [`broadcast`] fans a message out to everyone except its sender.
//! - [`server`] accepts connections and drives one handling task per client.
//! - [`client`] is a terminal client multiplexing stdin and server frames.
//!
//! Integration tests exercise the server over real sockets; the end-to-end
//! test drives the compiled binary.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod connection;
pub mod frame;
pub mod registry;
pub mod server;
