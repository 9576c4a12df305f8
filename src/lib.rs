//! pingwatch: records inbound ICMP echo requests delivered through NFLOG and
//! serves a bounded per-source history over a local Unix socket.

pub mod address;
pub mod capture;
pub mod cli;
pub mod error;
pub mod handlers;
pub mod install;
pub mod persistence;
pub mod ping_log;
pub mod render;
pub mod sd_notify;
pub mod server_loop;
pub mod shutdown;
pub mod types;
pub mod unix_accept_stream;
pub mod workers;
