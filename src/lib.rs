//! Sandbox lifecycle and code-apply engine for AI-generated React/Vite apps.
//!
//! - [`sandbox`]: remote environments, bootstrap and the lifecycle manager
//! - [`parser`]: tagged AI output to [`parser::ParsedResponse`]
//! - [`apply`]: writes parsed output into the active sandbox
//! - [`generation`]: consumes the code-generation event stream
//! - [`gateway`]: HTTP surface

pub mod apply;
pub mod config;
pub mod error;
pub mod gateway;
pub mod generation;
pub mod parser;
pub mod sandbox;
pub mod state;
pub mod store;

pub use error::LifecycleError;
