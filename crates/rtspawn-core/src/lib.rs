//! rtspawn core - platform independent process spawning types
//!
//! This crate holds the error taxonomy, launch flags, spawn actions, the
//! environment transform and the traits every platform launcher implements.

mod actions;
mod config;
mod env;
mod error;
mod flags;
mod process;
mod stream;

pub use actions::*;
pub use config::*;
pub use env::*;
pub use error::*;
pub use flags::*;
pub use process::*;
pub use stream::*;
