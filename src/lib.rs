#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Owns all state: rules, log, counters and attached transports.
pub mod console;

/// Hex parsing and rendering.
pub mod encoding;

/// The engine switch and byte counters.
pub mod engine;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// The bounded transcript of everything that happened.
pub mod log_store;

/// Holds inbound data against rules.
pub mod matcher;

/// Rules and their parts.
pub mod rule;

/// Delayed responses.
pub mod scheduler;

/// The rule library and active set.
pub mod store;

/// Serial port and simulated transports.
pub mod transport;
