//! twirc-sdk: the protocol half of the twirc chat client.
//!
//! - [`irc`] parses and formats RFC1459 lines (with IRCv3 tags).
//! - [`ctcp`] splits message bodies into literal and control-quoted segments.
//! - [`event`] holds the typed [`Event`] handed to handlers.
//! - [`dispatch`] fans events out to handlers, isolating failures.
//! - [`client`] owns the socket and the connection state machine.

pub mod client;
pub mod ctcp;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod features;
pub mod irc;
pub mod numeric;

pub use client::{ConnectConfig, Connection, ConnectionState};
pub use dispatch::{Dispatcher, EventHandler};
pub use error::{ClientError, ParseError};
pub use event::{Event, NickMask, Tag};
