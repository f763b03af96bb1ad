//! sandrun: run a semicolon-separated chain of shell commands inside a
//! disposable working directory.
//!
//! A run provisions a workspace, optionally installs a file package into it,
//! executes the chain with fail-fast semantics while capturing stdout and
//! stderr, relays the captures to configured destinations, and finally
//! deletes, archives or retains the workspace.
//!
//! This is not a security sandbox. "Sandbox" means a throwaway directory;
//! no namespace, cgroup or seatbelt isolation is applied to the commands.

#![forbid(unsafe_code)]
// Public entry points carry docs; plain record types are self-describing.
#![allow(missing_docs)]

pub mod chain;
pub mod install;
pub mod model;
pub mod relay;
pub mod runner;
pub mod transport;
pub mod workspace;

pub use crate::model::*;
pub use crate::runner::{run_sandboxed, ErrorCode, RunOutcome, RunnerError, RunnerResult};
