//! An abstraction layer for text generation engines.
//!
//! The tool-calling protocol in this workspace is purely textual, so an
//! engine only has to turn an ordered message history into a stream of
//! text deltas. Native function calling is never required.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
