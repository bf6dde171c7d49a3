//! psh: a small Unix shell built around a pipeline execution engine.
//!
//! A parsed [`types::Pipeline`] goes through [`topology::build`], which
//! allocates the pipes and opens redirection files, and then through
//! [`supervisor::run`], which forks one process per stage and either waits
//! for them or leaves them to the background reaper in [`job`].

pub mod builtin;
pub mod error;
pub mod eval;
pub mod global;
pub mod input;
pub mod job;
pub mod parser;
pub mod signals;
pub mod supervisor;
pub mod topology;
pub mod types;
