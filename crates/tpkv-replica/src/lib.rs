#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::as_conversions, clippy::must_use_candidate)]
#![warn(clippy::todo, clippy::dbg_macro)]

pub mod cmd;
pub mod config;
pub mod msg;
pub mod net;
pub mod replica;
pub mod store;

pub use self::replica::Replica;
