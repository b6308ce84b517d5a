//! stepcode-core — Assignment progression and output verification.
//!
//! This crate defines the data model, the module progress state machine,
//! route authorization, sandbox session coordination, and the navigator that
//! drives an attempt through an assignment.

pub mod access;
pub mod catalog;
pub mod error;
pub mod ids;
pub mod model;
pub mod navigator;
pub mod parser;
pub mod progress;
pub mod session;
pub mod traits;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;
