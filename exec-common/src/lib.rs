//! Shared types and interfaces for the test-execution engine: the job/work/template
//! data model, the response evaluator, the on-disk record codec, and the traits
//! describing every external collaborator the core `executor` crate depends on.

pub mod codec;
pub mod error;
pub mod evaluator;
pub mod health;
pub mod http_method;
pub mod interfaces;
pub mod metrics;
pub mod model;
