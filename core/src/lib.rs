//! jobrig core — the job execution engine.
//!
//! A job is one invocation of a user command with a description, an
//! identifier, and a durable status record. The `engine` module holds
//! the two interchangeable backends behind the `JobEngine` contract:
//! local process supervision through a detached worker, and remote
//! cloud-deployment supervision over the provider API plus an SSH
//! side-channel. Everything else is the supporting cast: the job model
//! and its environment serialization, the per-job status store, and the
//! narrow I/O collaborators (cloud API, object storage, remote shell,
//! archive packing).

pub mod archive;
pub mod cli;
pub mod cloud;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod infrastructure;
pub mod job;
pub mod ssh;
pub mod storage;
pub mod store;
