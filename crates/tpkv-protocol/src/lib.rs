#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::as_conversions, clippy::must_use_candidate)]
#![warn(clippy::todo, clippy::dbg_macro)]

pub mod rpc;

pub mod cs;
