//! Podman container manager support.
//!
//! Podman passes descriptors with `--preserve-fds=K`, where K counts the
//! inheritable descriptors above stdio, and refuses to start if any
//! descriptor in that range is missing or uninheritable. [`FdFiller`]
//! plugs the holes with `/dev/null` before the spawn.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use tracing::debug;

use super::Container;
use crate::config::Config;
use crate::error::{Error, Result};

/// Descriptors currently opened by this process.
fn opened_fds() -> Vec<i32> {
    let mut fds = Vec::new();

    let Ok(entries) = std::fs::read_dir("/proc/self/fd") else {
        return fds;
    };
    for entry in entries.flatten() {
        if let Ok(fd) = entry.file_name().to_string_lossy().parse::<i32>() {
            fds.push(fd);
        }
    }

    fds.sort_unstable();
    fds
}

/// Number of descriptors to preserve, in addition to stdio.
fn fd_count() -> usize {
    opened_fds().iter().filter(|fd| **fd > 2).count()
}

/// Guard that fills descriptor-table gaps with inheritable `/dev/null`
/// opens, releasing them when dropped.
pub(super) struct FdFiller {
    fillers: Vec<File>,
}

impl FdFiller {
    pub(super) fn fill() -> Result<Self> {
        let mut fillers = Vec::new();

        // Make every existing descriptor inheritable
        for fd in opened_fds() {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags >= 0 {
                    libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
                }
            }
        }

        loop {
            let fds = opened_fds();
            let Some(max) = fds.last().copied() else {
                break;
            };
            let missing: Vec<i32> = (0..max).filter(|fd| !fds.contains(fd)).collect();
            if missing.is_empty() {
                break;
            }

            // Opens land on the lowest free descriptor, plugging one gap
            let null = File::open("/dev/null")?;
            let fd = null.as_raw_fd();
            if !missing.contains(&fd) {
                return Err(Error::Internal(format!("Unexpected fileno: {fd}")));
            }
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags >= 0 {
                    libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
                }
            }
            fillers.push(null);
        }

        debug!("Created {} filler descriptors", fillers.len());
        Ok(Self { fillers })
    }
}

impl Drop for FdFiller {
    fn drop(&mut self) {
        self.fillers.clear();
    }
}

fn format_bound(container: &Container) -> Vec<String> {
    container
        .binds
        .bound()
        .map(|bind| {
            let mut mount = format!(
                "--mount=type=bind,src={},dst={}",
                bind.origin.display(),
                bind.destination.display()
            );
            if bind.mode == crate::binds::BindMode::ReadOnly {
                mount.push_str(",ro=true");
            }
            mount
        })
        .collect()
}

pub(super) fn prepare(
    container: &mut Container,
    command: &[String],
    overload: bool,
    config: &Config,
) -> Result<Vec<String>> {
    let executable = container.executable(config)?.display().to_string();
    let image = container.image_ref()?.to_string();

    if !overload {
        let mut argv = vec![
            executable,
            "run".to_string(),
            "--rm".to_string(),
            format!("--preserve-fds={}", fd_count()),
            image,
        ];
        argv.extend_from_slice(command);
        return Ok(argv);
    }

    let mut argv = vec![executable];
    argv.extend(config.backend_options(container.backend_name(), None));
    argv.extend([
        "run".to_string(),
        "--rm".to_string(),
        "--ipc=host".to_string(),
        "--env-host".to_string(),
        format!("--preserve-fds={}", fd_count()),
    ]);

    // Stay in the same working directory when it is made visible
    if let Ok(cwd) = std::env::current_dir() {
        if container.binds.bound().any(|bind| bind.origin == cwd) {
            argv.push("--workdir".to_string());
            argv.push(cwd.display().to_string());
        }
    }

    argv.extend(format_bound(container));

    let preload = container.preload_string();
    if !preload.is_empty() {
        argv.push(format!("--env=LD_PRELOAD={preload}"));
    }
    let library_path = container.library_path_string();
    if !library_path.is_empty() {
        argv.push(format!("--env=LD_LIBRARY_PATH={library_path}"));
    }

    argv.extend(config.backend_options(container.backend_name(), Some("run")));
    argv.push(image);
    argv.extend_from_slice(command);
    Ok(argv)
}
