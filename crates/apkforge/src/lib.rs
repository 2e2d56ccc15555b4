pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod project;
pub mod source;
pub mod stages;
pub mod toolchain;
pub mod workspace;

pub use error::{Error, Result};
