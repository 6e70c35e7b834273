//! Infrastructure seams for external tool invocation.
//!
//! Every collaborator the engine reaches through a shell tool (ssh, scp,
//! tar, coscmd) goes through the `CommandRunner` trait so tests can swap
//! in a recording double and assert on the exact command strings.

pub mod runner;
