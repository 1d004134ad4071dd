//! Launcher command-line grammars.
//!
//! Each supported launcher declares its script names, a table of known
//! flags with their arities, and optionally the host directories it needs
//! access to. The generic [`Parser`] walks a command line with that table
//! to split it into launcher and program halves.

pub mod aprun;
pub mod jsrun;
pub mod mpirun;
pub mod srun;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Flag-table driven launcher command line parser.
///
/// Relies on an almost-exhaustive list of the launcher's options to
/// determine where the launcher stops and the command begins. Any
/// `--option=value` token is consumed without needing a table entry.
#[derive(Debug, Clone)]
pub struct Parser {
    arguments: BTreeMap<&'static str, usize>,
}

impl Parser {
    pub fn new(arguments: &[(&'static str, usize)]) -> Self {
        Self {
            arguments: arguments.iter().copied().collect(),
        }
    }

    fn is_assignment(token: &str) -> bool {
        token.starts_with("--")
            && token[2..]
                .split_once('=')
                .is_some_and(|(name, _)| {
                    !name.is_empty()
                        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                })
    }

    /// Separate a command line into launcher and program halves.
    ///
    /// The launcher program name is consumed first; each following token
    /// is kept on the launcher side while it is a known flag (with its
    /// arguments) or a `--name=value` assignment. The first unknown token
    /// starts the program half.
    pub fn parse(&self, command: &[String]) -> (Vec<String>, Vec<String>) {
        if command.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let mut launcher = vec![command[0].clone()];
        let mut position = 1;

        while position < command.len() {
            let flag = &command[position];

            let to_skip = if let Some(arity) = self.arguments.get(flag.as_str()) {
                *arity
            } else if Self::is_assignment(flag) {
                0
            } else {
                break;
            };

            let end = (position + to_skip + 1).min(command.len());
            launcher.extend_from_slice(&command[position..end]);
            position = end;
        }

        (launcher, command[position..].to_vec())
    }

    /// Partition an argument list into the tokens this parser understands
    /// and the leftovers, preserving order within each side.
    pub fn filter_arguments(&self, command: &[String]) -> (Vec<String>, Vec<String>) {
        let mut valid = Vec::new();
        let mut foreign = Vec::new();

        let mut position = 0;
        while position < command.len() {
            let token = &command[position];
            if let Some(arity) = self.arguments.get(token.as_str()) {
                let end = (position + arity + 1).min(command.len());
                valid.extend_from_slice(&command[position..end]);
                position = end;
            } else {
                foreign.push(token.clone());
                position += 1;
            }
        }

        (valid, foreign)
    }
}

/// A supported launcher grammar.
pub struct LauncherDef {
    /// Binary names this grammar applies to.
    pub script_names: &'static [&'static str],
    pub parser: Parser,
    /// Host directories the launcher needs to reach from inside the
    /// container (PMI sockets, spool areas).
    pub reserved_directories: &'static [&'static str],
}

/// Registry of the supported launcher grammars.
pub struct Registry {
    launchers: Vec<LauncherDef>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

impl Registry {
    /// The built-in launcher set.
    pub fn standard() -> Self {
        Self {
            launchers: vec![
                mpirun::definition(),
                srun::definition(),
                aprun::definition(),
                jsrun::definition(),
            ],
        }
    }

    /// Find the grammar matching a command's program name.
    pub fn get(&self, command: &[String]) -> Option<&LauncherDef> {
        let script = Path::new(command.first()?).file_name()?.to_str()?;
        self.launchers
            .iter()
            .find(|launcher| launcher.script_names.contains(&script))
    }

    /// Host-side directories reserved by the launcher of `command`.
    pub fn reserved_directories(&self, command: &[String]) -> Vec<PathBuf> {
        self.get(command)
            .map(|launcher| {
                launcher
                    .reserved_directories
                    .iter()
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Split a command line into launcher and program.
    ///
    /// An explicit `--` token always separates the two. Otherwise the
    /// grammar registered for the first token's basename decides; a
    /// command with no known launcher is all program. Configured extra
    /// launcher options are appended to a non-empty launcher half.
    pub fn interpret(
        &self,
        command: &[String],
        config: &Config,
    ) -> (Vec<String>, Vec<String>) {
        if command.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let (mut launcher, program) =
            if let Some(index) = command.iter().position(|token| token == "--") {
                (command[..index].to_vec(), command[index + 1..].to_vec())
            } else if let Some(definition) = self.get(command) {
                definition.parser.parse(command)
            } else {
                (Vec::new(), command.to_vec())
            };

        if !launcher.is_empty() {
            launcher.extend(config.launcher_options());
        }

        (launcher, program)
    }
}
