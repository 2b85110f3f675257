#![doc = "Common types shared across the SCARA motion workspace."]

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
