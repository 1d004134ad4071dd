//! Process-wide execution state: dry-run mode and the parent/child role.
//!
//! The role decides who aggregates detection results and who merely prints
//! them: the parent process interprets the output of its children, while a
//! child (a per-rank sub-invocation running under the launcher) emits JSON
//! on stdout. The role crosses `exec` boundaries through an environment
//! marker, so a detect-child spawned behind an opaque launcher still knows
//! it is not the aggregator.

use std::env;

/// Environment marker set for worker (child) sub-invocations.
pub const CHILD_MARKER: &str = "__E4S_CL_WORKER";

/// Where this invocation sits in the parent/child process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Top-level invocation, aggregates and persists.
    #[default]
    Parent,
    /// Per-rank sub-invocation, emits data on stdout.
    Child,
}

/// Execution state resolved once by the CLI entry point and threaded
/// through the pipelines.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionEnv {
    /// Print the final command instead of running it.
    pub dry_run: bool,
    pub role: Role,
}

impl ExecutionEnv {
    /// Build the environment from CLI flags and the process environment.
    pub fn resolve(dry_run: bool) -> Self {
        let role = if env::var_os(CHILD_MARKER).is_some() {
            Role::Child
        } else {
            Role::Parent
        };

        Self { dry_run, role }
    }

    pub fn is_parent(&self) -> bool {
        self.role == Role::Parent
    }
}

/// Guard exporting the child marker to subprocesses for its lifetime.
///
/// Entered by the parent right before spawning per-rank children, so the
/// sub-invocations resolve to [`Role::Child`].
pub struct ParentStatus;

impl ParentStatus {
    pub fn enter() -> Self {
        unsafe { env::set_var(CHILD_MARKER, "1") };
        ParentStatus
    }
}

impl Drop for ParentStatus {
    fn drop(&mut self) {
        if env::var_os(CHILD_MARKER).is_some() {
            unsafe { env::remove_var(CHILD_MARKER) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_role_resolution() {
        unsafe { env::remove_var(CHILD_MARKER) };
        assert_eq!(ExecutionEnv::resolve(false).role, Role::Parent);

        {
            let _status = ParentStatus::enter();
            assert_eq!(ExecutionEnv::resolve(false).role, Role::Child);
        }

        // Marker is removed once the guard is dropped
        assert_eq!(ExecutionEnv::resolve(false).role, Role::Parent);
    }

    #[test]
    #[serial]
    fn test_dry_run_carried() {
        unsafe { env::remove_var(CHILD_MARKER) };
        assert!(ExecutionEnv::resolve(true).dry_run);
        assert!(!ExecutionEnv::resolve(false).dry_run);
    }
}
