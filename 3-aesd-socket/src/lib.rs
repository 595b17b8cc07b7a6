//! Socket front end for the bounded command log.
//!
//! Clients send newline-terminated records over TCP. Every record is appended
//! to one shared log and answered with the full log contents, unless it is an
//! `AESDCHAR_IOCSEEKTO:<cmd>,<offset>` command, which streams the log from that
//! command and offset instead. Each module focuses on one responsibility:
//!
//! - [`cli`] parses the command-line interface.
//! - [`backend`] abstracts where the log lives: an in-process ring or the
//!   `aesdchar` device node.
//! - [`command_log`] puts the backend behind the single log-wide lock.
//! - [`protocol`] frames the byte stream into records and recognises seek
//!   commands.
//! - [`worker`] serves one connection.
//! - [`marker`] appends a timestamp record on a fixed period.
//! - [`server`] accepts connections, tracks workers and drives shutdown.

pub mod backend;
pub mod cli;
pub mod command_log;
pub mod marker;
pub mod protocol;
pub mod server;
pub mod worker;
