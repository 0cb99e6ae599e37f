//! twirc: a terminal chat client built on `twirc-sdk`.
//!
//! - [`terminal`] reads operator lines and owns the screen.
//! - [`plugin`] hosts hot-reloadable plugins; [`plugins`] ships the
//!   built-in ones.
//! - [`app`] and [`commands`] route events and input between them.
//! - [`session`] connects, waits for the connection to drop and
//!   reconnects with backoff.

pub mod app;
pub mod commands;
pub mod config;
pub mod plugin;
pub mod plugins;
pub mod session;
pub mod terminal;
