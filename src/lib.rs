//! `fourst`: compiler, linker and debugging VM for the 4st stack language.
//!
//! Source flows through [`frontend`] (tokens, includes, word tree), then
//! [`bytecode`] (reachability trace and link into a [`bytecode::Program`]),
//! and runs on [`runtime`].

pub mod bytecode;
pub mod error;
pub mod frontend;
pub mod lang;
pub mod runtime;

pub use error::{Error, Result};
