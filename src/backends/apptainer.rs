//! Apptainer and Singularity support.
//!
//! Both runtimes consume binds through a single comma-joined variable and
//! forward environment to the contained process through prefixed host
//! variables; only the prefix spelling differs between the two.

use super::{BackendKind, Container};
use crate::config::Config;
use crate::error::Result;

fn env_prefix(container: &Container) -> &'static str {
    match container.kind() {
        BackendKind::Apptainer {
            legacy_singularity: true,
        } => "SINGULARITYENV_",
        _ => "APPTAINERENV_",
    }
}

fn bind_variable(container: &Container) -> &'static str {
    match container.kind() {
        BackendKind::Apptainer {
            legacy_singularity: true,
        } => "SINGULARITY_BIND",
        _ => "APPTAINER_BIND",
    }
}

/// Format the bind set into the vendor bind variable value.
fn format_bound(container: &Container) -> String {
    container
        .binds
        .bound()
        .map(|bind| {
            format!(
                "{}:{}:{}",
                bind.origin.display(),
                bind.destination.display(),
                bind.mode.option_string()
            )
        })
        .collect::<Vec<_>>()
        .join(",")
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
        let mut argv = vec![executable, "exec".to_string(), image];
        argv.extend_from_slice(command);
        return Ok(argv);
    }

    // The runtime injects its own libraries there; keep it reachable
    container.add_library_path(std::path::Path::new("/.singularity.d/libs"));

    let prefix = env_prefix(container);
    let preload = container.preload_string();
    let library_path = container.library_path_string();
    container.bind_env(&format!("{prefix}LD_PRELOAD"), &preload);
    container.bind_env(&format!("{prefix}LD_LIBRARY_PATH"), &library_path);

    let binds = format_bound(container);
    let bind_variable = bind_variable(container).to_string();
    container.bind_env(&bind_variable, &binds);

    let mut argv = vec![executable];
    argv.extend(config.backend_options(container.backend_name(), None));
    argv.push("exec".to_string());
    argv.extend(config.backend_options(container.backend_name(), Some("exec")));

    if let Ok(cwd) = std::env::current_dir() {
        argv.push("--pwd".to_string());
        argv.push(cwd.display().to_string());
    }

    if container.has_nvidia() {
        argv.push("--nv".to_string());
    }

    argv.push(container.image_ref()?.to_string());
    argv.extend_from_slice(command);
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binds::BindMode;
    use serial_test::serial;
    use std::path::Path;

    fn fake_executable(name: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        (dir, path.display().to_string())
    }

    #[test]
    #[serial]
    fn test_prepare_overload_sets_env() {
        let (_dir, executable) = fake_executable("apptainer");
        unsafe { std::env::set_var("E4S_CL_APPTAINER_EXECUTABLE", &executable) };

        let mut container =
            Container::new("apptainer", Some("/images/app.sif".to_string())).unwrap();
        container.bind_file(Path::new("/etc/hosts"), None, BindMode::ReadOnly);
        container.add_preload(Path::new("/opt/libshim.so"));

        let argv = container
            .prepare(&["./a.out".to_string()], true, &Config::default())
            .unwrap();
        unsafe { std::env::remove_var("E4S_CL_APPTAINER_EXECUTABLE") };

        assert_eq!(argv[0], executable);
        assert!(argv.contains(&"exec".to_string()));
        assert!(argv.contains(&"/images/app.sif".to_string()));
        assert_eq!(argv.last().unwrap(), "./a.out");

        let env = container.spawn_env();
        let find = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(find("APPTAINERENV_LD_PRELOAD").unwrap(), "/opt/libshim.so");
        assert!(find("APPTAINER_BIND").unwrap().contains("/etc/hosts:/etc/hosts:ro"));
        assert!(
            find("APPTAINERENV_LD_LIBRARY_PATH")
                .unwrap()
                .contains("/.singularity.d/libs")
        );
    }

    #[test]
    #[serial]
    fn test_singularity_prefix() {
        let (_dir, executable) = fake_executable("singularity");
        unsafe { std::env::set_var("E4S_CL_SINGULARITY_EXECUTABLE", &executable) };

        let mut container =
            Container::new("singularity", Some("/images/app.simg".to_string())).unwrap();
        let _ = container
            .prepare(&["true".to_string()], true, &Config::default())
            .unwrap();
        unsafe { std::env::remove_var("E4S_CL_SINGULARITY_EXECUTABLE") };

        let env = container.spawn_env();
        assert!(env.iter().any(|(key, _)| key == "SINGULARITY_BIND"));
        assert!(env.iter().any(|(key, _)| key == "SINGULARITYENV_LD_PRELOAD"));
    }

    #[test]
    #[serial]
    fn test_clean_invocation_is_minimal() {
        let (_dir, executable) = fake_executable("apptainer");
        unsafe { std::env::set_var("E4S_CL_APPTAINER_EXECUTABLE", &executable) };

        let mut container =
            Container::new("apptainer", Some("/images/app.sif".to_string())).unwrap();
        container.bind_file(Path::new("/etc/hosts"), None, BindMode::ReadOnly);

        let argv = container
            .prepare(&["cat".to_string(), "/etc/ld.so.cache".to_string()], false, &Config::default())
            .unwrap();
        unsafe { std::env::remove_var("E4S_CL_APPTAINER_EXECUTABLE") };

        assert_eq!(
            argv,
            vec![
                executable,
                "exec".to_string(),
                "/images/app.sif".to_string(),
                "cat".to_string(),
                "/etc/ld.so.cache".to_string(),
            ]
        );
        assert!(container.spawn_env().is_empty());
    }
}
