//! Shared stack declaration primitives.
//!
//! This crate owns deterministic naming, policy documents, resource
//! descriptors, the build cache decision and the declaration graph evaluator.
//! It intentionally excludes AWS SDK and process execution concerns; those
//! live behind the traits in `graph::Environment` and are implemented by
//! `stack_aws`.

pub mod build;
pub mod config;
pub mod error;
pub mod graph;
pub mod naming;
pub mod outputs;
pub mod policy;
pub mod reference;
pub mod resources;
pub mod stack;
