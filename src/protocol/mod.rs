//! Command protocol
//!
//! This module provides the command model, the command text grammar and the
//! message envelope exchanged with the queue service.

pub mod command;
pub mod message;
pub mod parser;

pub use command::{Command, CommandKind};
pub use message::Message;
pub use parser::{CommandParser, CommandsParser};
