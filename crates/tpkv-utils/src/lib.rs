#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::as_conversions, clippy::must_use_candidate)]
#![warn(clippy::todo, clippy::dbg_macro)]

pub mod chan;
pub mod codec;
pub mod config;
pub mod lock;
pub mod shutdown;
pub mod tracing;

/// Clones the named bindings so that they can be moved into a closure or task.
#[macro_export]
macro_rules! clone {
    ($($name:ident),+ $(,)?) => {
        $(let $name = $name.clone();)+
    };
}
