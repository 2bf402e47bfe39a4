//! Command-line assembly and process spawning.
//!
//! A [`CommandLine`] is an explicit list of positional arguments and option
//! descriptors that renders to a single shell command string. Named
//! parameters map onto options: `true` booleans become bare flags, `false`
//! booleans are dropped, everything else becomes `key<delimiter>value`.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info};

use sv_types::{ParameterSet, ParameterValue, SvResult};

/// Delimiter placed between an option key and its value by default.
pub const DEFAULT_DELIMITER: &str = " ";

/// A single named option on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOption {
    /// Bare flag, e.g. `-v`.
    Flag(String),
    /// Key/value pair. Keys ending in `=` are joined to the value directly.
    Value { key: String, value: String },
}

/// Builder for a shell command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    arguments: Vec<String>,
    options: Vec<CommandOption>,
    delimiter: String,
    echo: bool,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            arguments: Vec::new(),
            options: Vec::new(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            echo: true,
        }
    }

    pub fn arg(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn args<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(arguments.into_iter().map(Into::into));
        self
    }

    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.options.push(CommandOption::Flag(name.into()));
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options.push(CommandOption::Value {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    /// Append one option per parameter, in parameter order.
    pub fn parameters(mut self, parameters: &ParameterSet) -> Self {
        for (name, value) in parameters.iter() {
            self = match value {
                ParameterValue::Bool(true) => self.flag(name),
                ParameterValue::Bool(false) => self,
                other => self.option(name, other),
            };
        }
        self
    }

    /// Separator between option keys and values.
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Whether the rendered command is logged at `info` when started.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn is_echoed(&self) -> bool {
        self.echo
    }

    pub fn options(&self) -> &[CommandOption] {
        &self.options
    }

    pub fn render(&self) -> String {
        let mut cmd = self.program.clone();
        if !self.arguments.is_empty() {
            cmd.push(' ');
            cmd.push_str(&self.arguments.join(" "));
        }
        for option in &self.options {
            cmd.push(' ');
            match option {
                CommandOption::Flag(name) => cmd.push_str(name),
                CommandOption::Value { key, value } if key.ends_with('=') => {
                    cmd.push_str(key);
                    cmd.push_str(value);
                }
                CommandOption::Value { key, value } => {
                    cmd.push_str(key);
                    cmd.push_str(&self.delimiter);
                    cmd.push_str(value);
                }
            }
        }
        cmd
    }

    /// Spawn the rendered command through the platform shell without waiting
    /// for it.
    pub fn spawn(&self, options: &SpawnOptions) -> SvResult<Child> {
        let rendered = self.render();
        if self.echo {
            info!(command = %rendered, "Starting command");
        } else {
            debug!(command = %rendered, "Starting command");
        }

        let mut command = shell_command(&rendered);
        if let Some(dir) = &options.working_dir {
            command.current_dir(dir);
        }
        command.stdout(options.stdout.to_stdio()?);
        command.stderr(options.stderr.to_stdio()?);
        Ok(command.spawn()?)
    }
}

#[cfg(unix)]
fn shell_command(rendered: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(rendered);
    command
}

#[cfg(windows)]
fn shell_command(rendered: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(rendered);
    command
}

/// Where a child's output stream goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Redirect {
    #[default]
    Inherit,
    Null,
    /// Truncate/create the file and write the stream into it.
    File(PathBuf),
}

impl Redirect {
    fn to_stdio(&self) -> SvResult<Stdio> {
        Ok(match self {
            Redirect::Inherit => Stdio::inherit(),
            Redirect::Null => Stdio::null(),
            Redirect::File(path) => Stdio::from(File::create(path)?),
        })
    }
}

/// Process-level settings for [`CommandLine::spawn`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Working directory override; the caller's directory when `None`.
    pub working_dir: Option<PathBuf>,
    pub stdout: Redirect,
    pub stderr: Redirect,
}
