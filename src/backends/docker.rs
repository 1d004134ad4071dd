//! Docker support.
//!
//! Docker runs through a daemon, so inherited descriptors cannot be
//! preserved and the host environment must be forwarded explicitly.

use super::Container;
use crate::config::Config;
use crate::error::Result;

fn format_bound(container: &Container) -> Vec<String> {
    container
        .binds
        .bound()
        .map(|bind| {
            let mut mount = format!(
                "--mount=type=bind,source={},target={}",
                bind.origin.display(),
                bind.destination.display()
            );
            if bind.mode == crate::binds::BindMode::ReadOnly {
                mount.push_str(",readonly");
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
        let mut argv = vec![executable, "run".to_string(), "--rm".to_string(), image];
        argv.extend_from_slice(command);
        return Ok(argv);
    }

    let mut argv = vec![executable];
    argv.extend(config.backend_options(container.backend_name(), None));
    argv.extend(["run".to_string(), "--rm".to_string(), "--ipc=host".to_string()]);
    argv.extend(format_bound(container));

    let preload = container.preload_string();
    if !preload.is_empty() {
        argv.push(format!("--env=LD_PRELOAD={preload}"));
    }
    let library_path = container.library_path_string();
    if !library_path.is_empty() {
        argv.push(format!("--env=LD_LIBRARY_PATH={library_path}"));
    }
    for (key, value) in container.spawn_env() {
        argv.push(format!("--env={key}={value}"));
    }

    argv.extend(config.backend_options(container.backend_name(), Some("run")));
    argv.push(image);
    argv.extend_from_slice(command);
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binds::BindMode;
    use serial_test::serial;
    use std::path::Path;

    #[test]
    #[serial]
    fn test_prepare_mounts_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        unsafe { std::env::set_var("E4S_CL_DOCKER_EXECUTABLE", &path) };

        let mut container = Container::new("docker", Some("fedora:41".to_string())).unwrap();
        container.bind_file(Path::new("/etc/hosts"), None, BindMode::ReadOnly);
        container.bind_env("WI4MPI_FROM", "mpich");

        let argv = container
            .prepare(&["./a.out".to_string()], true, &Config::default())
            .unwrap();
        unsafe { std::env::remove_var("E4S_CL_DOCKER_EXECUTABLE") };

        assert!(argv.contains(
            &"--mount=type=bind,source=/etc/hosts,target=/etc/hosts,readonly".to_string()
        ));
        assert!(argv.contains(&"--env=WI4MPI_FROM=mpich".to_string()));
        assert!(!argv.iter().any(|arg| arg.starts_with("--preserve-fds")));
    }
}
