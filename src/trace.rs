//! Syscall tracer listing every file opened by a command.
//!
//! Runs the target under ptrace, following forks and clones, and records
//! the resolved absolute path of every successful `open`/`openat` across
//! the whole process tree. The dependency discovery engine feeds these
//! paths to the ELF classifier.

use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::io::IoSliceMut;
use std::path::{Path, PathBuf};

use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::sys::uio::{RemoteIoVec, process_vm_readv};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::debug;

use crate::error::{Error, Result};
use crate::util;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod arch {
    use nix::unistd::Pid;

    pub const SYS_OPEN: u64 = 2;
    pub const SYS_OPENAT: u64 = 257;

    pub struct SyscallView {
        pub number: u64,
        pub args: [u64; 2],
        pub retval: i64,
    }

    pub fn view(pid: Pid) -> nix::Result<SyscallView> {
        let regs = nix::sys::ptrace::getregs(pid)?;
        Ok(SyscallView {
            number: regs.orig_rax,
            args: [regs.rdi, regs.rsi],
            retval: regs.rax as i64,
        })
    }
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
mod arch {
    use nix::unistd::Pid;

    // aarch64 has no plain open
    pub const SYS_OPEN: u64 = u64::MAX;
    pub const SYS_OPENAT: u64 = 56;

    pub struct SyscallView {
        pub number: u64,
        pub args: [u64; 2],
        pub retval: i64,
    }

    pub fn view(pid: Pid) -> nix::Result<SyscallView> {
        let regs = nix::sys::ptrace::getregset::<nix::sys::ptrace::regset::NT_PRSTATUS>(pid)?;
        Ok(SyscallView {
            number: regs.regs[8],
            args: [regs.regs[0], regs.regs[1]],
            retval: regs.regs[0] as i64,
        })
    }
}

/// A recorded open target, captured on syscall entry and committed once
/// the syscall returns success.
struct PendingOpen {
    number: u64,
    path: PathBuf,
}

/// Read a NUL-terminated string out of the tracee's address space.
fn read_string(pid: Pid, address: u64) -> Option<String> {
    const CHUNK: usize = 128;
    const LIMIT: usize = 4096;

    let mut collected = Vec::new();

    while collected.len() < LIMIT {
        let mut buffer = [0u8; CHUNK];
        let mut local = [IoSliceMut::new(&mut buffer)];
        let remote = [RemoteIoVec {
            base: address as usize + collected.len(),
            len: CHUNK,
        }];

        let read = match process_vm_readv(pid, &mut local, &remote) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        if let Some(end) = buffer[..read].iter().position(|byte| *byte == 0) {
            collected.extend_from_slice(&buffer[..end]);
            return String::from_utf8(collected).ok();
        }
        collected.extend_from_slice(&buffer[..read]);
    }

    None
}

/// Turn a path argument into an absolute path, resolving relative ones
/// against the tracee's working directory or `dirfd`.
fn absolutize(pid: Pid, dirfd: Option<i32>, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        return util::normalize(path);
    }

    let anchor = match dirfd {
        Some(fd) if fd != libc::AT_FDCWD => {
            std::fs::read_link(format!("/proc/{pid}/fd/{fd}")).ok()
        }
        _ => std::fs::read_link(format!("/proc/{pid}/cwd")).ok(),
    };

    match anchor {
        Some(base) => util::normalize(&base.join(path)),
        None => util::normalize(path),
    }
}

/// Run a command under the tracer and list the files it opens.
///
/// Returns the exit status of the target and the set of absolute paths
/// successfully opened by it or any of its descendants.
pub fn opened_files(command: &[String]) -> Result<(i32, Vec<PathBuf>)> {
    if command.is_empty() {
        return Err(Error::Usage("No command to trace".into()));
    }

    // Resolve the program up front so exec failures are reported early
    let program = util::which(&command[0])
        .unwrap_or_else(|| PathBuf::from(&command[0]));

    let c_program = CString::new(program.to_string_lossy().as_bytes())
        .map_err(|_| Error::Usage(format!("Invalid program name: {}", command[0])))?;
    let c_args: Vec<CString> = command
        .iter()
        .map(|arg| CString::new(arg.as_str()).unwrap_or_default())
        .collect();

    let root = match unsafe { fork() }.map_err(|err| Error::Internal(err.to_string()))? {
        ForkResult::Child => {
            let _ = ptrace::traceme();
            let _ = nix::unistd::execvp(&c_program, &c_args);
            // Only reached when exec fails
            unsafe { libc::_exit(127) }
        }
        ForkResult::Parent { child } => child,
    };

    // First stop is the exec trap; set follow options before resuming
    waitpid(root, None).map_err(|err| Error::Internal(err.to_string()))?;
    ptrace::setoptions(
        root,
        Options::PTRACE_O_TRACESYSGOOD
            | Options::PTRACE_O_TRACEFORK
            | Options::PTRACE_O_TRACEVFORK
            | Options::PTRACE_O_TRACECLONE
            | Options::PTRACE_O_TRACEEXEC,
    )
    .map_err(|err| Error::Internal(format!("ptrace setup failed: {err}")))?;
    ptrace::syscall(root, None).map_err(|err| Error::Internal(err.to_string()))?;

    let mut paths: HashSet<PathBuf> = HashSet::new();
    let mut in_syscall: HashSet<Pid> = HashSet::new();
    let mut pending: HashMap<Pid, PendingOpen> = HashMap::new();
    let mut known: HashSet<Pid> = HashSet::from([root]);
    let mut exit_code = 0;

    loop {
        let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
            Ok(status) => status,
            Err(nix::errno::Errno::ECHILD) => break,
            Err(err) => return Err(Error::Internal(err.to_string())),
        };

        match status {
            WaitStatus::PtraceSyscall(pid) => {
                handle_syscall(pid, &mut in_syscall, &mut pending, &mut paths);
                let _ = ptrace::syscall(pid, None);
            }
            WaitStatus::PtraceEvent(pid, _, _) => {
                let _ = ptrace::syscall(pid, None);
            }
            WaitStatus::Stopped(pid, signal) => {
                // New tracees announce themselves with a SIGSTOP
                let deliver = if known.insert(pid) && signal == Signal::SIGSTOP {
                    None
                } else {
                    Some(signal)
                };
                let _ = ptrace::syscall(pid, deliver);
            }
            WaitStatus::Exited(pid, code) => {
                cleanup(pid, &mut in_syscall, &mut pending);
                if pid == root {
                    exit_code = code;
                }
            }
            WaitStatus::Signaled(pid, signal, _) => {
                cleanup(pid, &mut in_syscall, &mut pending);
                if pid == root {
                    exit_code = 128 + signal as i32;
                }
            }
            _ => {}
        }
    }

    debug!("Traced {} opened paths from {}", paths.len(), command[0]);

    let mut sorted: Vec<PathBuf> = paths.into_iter().collect();
    sorted.sort();
    Ok((exit_code, sorted))
}

fn handle_syscall(
    pid: Pid,
    in_syscall: &mut HashSet<Pid>,
    pending: &mut HashMap<Pid, PendingOpen>,
    paths: &mut HashSet<PathBuf>,
) {
    let Ok(view) = arch::view(pid) else {
        return;
    };

    if in_syscall.insert(pid) {
        // Syscall entry: capture the path argument while the process is
        // alive and its registers describe the call
        let open = match view.number {
            number if number == arch::SYS_OPEN => {
                read_string(pid, view.args[0]).map(|path| PendingOpen {
                    number,
                    path: absolutize(pid, None, &path),
                })
            }
            number if number == arch::SYS_OPENAT => {
                read_string(pid, view.args[1]).map(|path| PendingOpen {
                    number,
                    path: absolutize(pid, Some(view.args[0] as i32), &path),
                })
            }
            _ => None,
        };

        if let Some(open) = open {
            pending.insert(pid, open);
        }
    } else {
        in_syscall.remove(&pid);
        if let Some(open) = pending.remove(&pid) {
            if open.number == view.number && view.retval >= 0 {
                paths.insert(open.path);
            }
        }
    }
}

fn cleanup(pid: Pid, in_syscall: &mut HashSet<Pid>, pending: &mut HashMap<Pid, PendingOpen>) {
    in_syscall.remove(&pid);
    pending.remove(&pid);
}
