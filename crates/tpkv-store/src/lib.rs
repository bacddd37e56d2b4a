#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::as_conversions, clippy::must_use_candidate)]
#![warn(clippy::todo, clippy::dbg_macro)]

mod file;
mod memory;

pub use self::file::FileStore;
pub use self::memory::MemStore;
