//! An out-of-the-box agent that assembles the demo tools and model
//! providers.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring tool calling into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod session;
mod settings;
pub mod tools;

pub use session::{Session, SessionBuilder};
pub use settings::{Settings, SettingsError};

/// Re-exports of [`tagcall_core`] crate.
pub mod core {
    pub use tagcall_core::*;
}
