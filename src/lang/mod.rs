//! # 4st language data
//!
//! Types shared by the front end, the linker and the VM.
//!
//! ## Documentation conventions
//!
//! - Stack effects are written as `( before -- after )`.
//! - Word paths are colon-joined lexical names, e.g. `outer:inner`.

pub mod position;
pub mod value;
pub mod word;

pub use position::{Position, Span};
pub use value::{ArrayRef, Value};
pub use word::{Op, OpKind, Word, WordKind};
