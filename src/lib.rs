//! e4s-cl - Container launcher for MPI applications.
//!
//! Runs MPI programs inside containers against the host MPI stack:
//! discovers the files and shared libraries a program needs through
//! syscall tracing and ELF analysis, plans the binds that make them
//! visible in-container, drives several container runtimes behind one
//! contract, and configures an ABI-translation shim when the binary's MPI
//! family differs from the host's. Reusable settings persist as named
//! profiles in a transactional JSON store.

pub mod backends;
pub mod binds;
pub mod cli;
pub mod command_runner;
pub mod commands;
pub mod config;
pub mod elf;
pub mod error;
pub mod launchers;
pub mod ldcache;
pub mod linker;
pub mod mpi;
pub mod output;
pub mod profile;
pub mod relay;
pub mod storage;
pub mod trace;
pub mod util;
pub mod variables;
pub mod wi4mpi;

pub use cli::{Cli, Commands};
pub use error::{EXIT_FAILURE, EXIT_SUCCESS, EXIT_USAGE, EXIT_WARNING, Error, Result};
pub use variables::{ExecutionEnv, Role};
