//! AWS-facing adapters and the handlers that drive them.
//!
//! Everything with side effects lives here. Declaration semantics stay in
//! `stack_core`.

pub mod adapters;
pub mod handlers;
