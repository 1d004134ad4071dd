//! Parent/child data relay.
//!
//! Detection children run behind an opaque launcher, so structured
//! results travel back over a pipe whose handle the parent exports in the
//! environment: an inherited file descriptor for in-process spawns, or a
//! named FIFO when the launcher crosses a process-manager boundary that
//! does not preserve descriptors.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{Error, Result};
use crate::util;

/// Environment handle for the inherited-descriptor variant.
pub const ENV_VAR: &str = "__E4SCL_PIPE_FD";
/// Environment handle for the named variant.
pub const ENV_VAR_NAMED: &str = "__E4SCL_PIPE_NAME";

/// Directory hosting named pipes.
pub const NAMED_PIPE_DIR: &str = "/var/tmp/e4s-cl";

/// True when a parent exported a relay handle to this process.
pub fn attached() -> bool {
    std::env::var_os(ENV_VAR).is_some() || std::env::var_os(ENV_VAR_NAMED).is_some()
}

/// Open the writing end of the relay exported by the parent.
///
/// The descriptor is switched to non-blocking: the relay is a secondary
/// channel and a full pipe must not stall the rank.
pub fn attach() -> Result<File> {
    if let Ok(fd_string) = std::env::var(ENV_VAR) {
        let fd: i32 = fd_string
            .parse()
            .map_err(|_| Error::Internal(format!("invalid relay descriptor '{fd_string}'")))?;
        let duplicated = nix::unistd::dup(fd)
            .map_err(|err| Error::Internal(format!("relay descriptor unusable: {err}")))?;
        unsafe {
            let flags = libc::fcntl(duplicated, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(duplicated, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        return Ok(unsafe { File::from_raw_fd(duplicated) });
    }

    if let Ok(path) = std::env::var(ENV_VAR_NAMED) {
        return Ok(std::fs::OpenOptions::new().write(true).open(path)?);
    }

    Err(Error::Internal("No available pipe set to send data !".into()))
}

/// Write a line of data to the relay, if one is attached.
pub fn send_line(data: &str) -> Result<()> {
    let mut writer = attach()?;
    writeln!(writer, "{data}")?;
    Ok(())
}

/// Anonymous pipe relay. Children inherit the writing end; the parent
/// reads until EOF once every child is done.
pub struct Pipe {
    read: OwnedFd,
    write: Option<OwnedFd>,
}

impl Pipe {
    pub fn new() -> Result<Self> {
        let (read, write) = nix::unistd::pipe()
            .map_err(|err| Error::Internal(format!("pipe creation failed: {err}")))?;

        debug!(
            "Creating pipe with fds {}/{}",
            read.as_raw_fd(),
            write.as_raw_fd()
        );
        unsafe { std::env::set_var(ENV_VAR, write.as_raw_fd().to_string()) };

        Ok(Self {
            read,
            write: Some(write),
        })
    }

    /// Close the local writing end and drain the pipe.
    pub fn read_to_end(mut self) -> Result<String> {
        // Children hold the only remaining writers after this drop
        self.write.take();

        let mut data = String::new();
        File::from(self.read.try_clone().map_err(Error::Io)?).read_to_string(&mut data)?;
        Ok(data)
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        if std::env::var_os(ENV_VAR).is_some() {
            unsafe { std::env::remove_var(ENV_VAR) };
        }
    }
}

/// Named FIFO relay under `/var/tmp/e4s-cl/<hash-of-pid>`, drained with a
/// non-blocking reader.
pub struct NamedPipe {
    path: PathBuf,
    reader: File,
}

impl NamedPipe {
    pub fn new() -> Result<Self> {
        let directory = PathBuf::from(NAMED_PIPE_DIR);
        std::fs::create_dir_all(&directory)?;

        let path = directory.join(util::hash256(&std::process::id().to_string()));
        match nix::unistd::mkfifo(&path, nix::sys::stat::Mode::S_IRUSR | nix::sys::stat::Mode::S_IWUSR)
        {
            Ok(()) => {}
            Err(nix::errno::Errno::EEXIST) => {}
            Err(err) => return Err(Error::Internal(format!("mkfifo failed: {err}"))),
        }

        // Opening read-side non-blocking succeeds with no writer present
        let reader = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)?;

        debug!("Creating named pipe in {}", path.display());
        unsafe { std::env::set_var(ENV_VAR_NAMED, &path) };

        Ok(Self { path, reader })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Drain whatever the children wrote so far.
    pub fn read_available(&mut self) -> Result<String> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => data.extend_from_slice(&chunk[..count]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        if std::env::var_os(ENV_VAR_NAMED).is_some() {
            unsafe { std::env::remove_var(ENV_VAR_NAMED) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_anonymous_pipe_roundtrip() {
        let pipe = Pipe::new().unwrap();
        assert!(attached());

        send_line("{\"files\": []}").unwrap();
        let data = pipe.read_to_end().unwrap();
        assert_eq!(data, "{\"files\": []}\n");

        assert!(!attached());
    }

    #[test]
    #[serial]
    fn test_named_pipe_roundtrip() {
        let mut pipe = match NamedPipe::new() {
            Ok(pipe) => pipe,
            // Restricted environments may forbid /var/tmp FIFOs
            Err(_) => return,
        };
        assert!(pipe.path().starts_with(NAMED_PIPE_DIR));

        send_line("payload").unwrap();
        let data = pipe.read_available().unwrap();
        assert_eq!(data, "payload\n");

        // Nothing more to read
        assert_eq!(pipe.read_available().unwrap(), "");
    }

    #[test]
    #[serial]
    fn test_attach_without_handle_fails() {
        unsafe {
            std::env::remove_var(ENV_VAR);
            std::env::remove_var(ENV_VAR_NAMED);
        }
        assert!(attach().is_err());
        assert!(!attached());
    }
}
