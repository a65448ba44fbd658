#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Devices send lines, and this is where they go next.
/// Tracks the connected websocket clients and fans lines out to them.
pub mod registry;

/// The open serial port, its reader task, and writes to it.
pub mod session;

/// Parsing what clients send into commands for the session.
pub mod command;

/// Glues the registry, the session and the list of ports together.
pub mod bridge;

/// Code relating to setting up a server.
pub mod server;

/// The server configuration.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Command line interface.
pub mod cli;

/// Logging setup.
pub mod logging;

/// Serial port plumbing.
pub mod serial;

pub mod mock;

pub(crate) mod websocket;
