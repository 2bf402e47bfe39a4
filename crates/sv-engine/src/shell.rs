//! Experiment integration that runs a templated shell command.
//!
//! The command receives the data file through the `{input}` placeholder in its
//! positional arguments and the experiment parameters as options. Its score
//! is the last non-empty line it prints on stdout.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use sv_types::{ParameterSet, SvError, SvResult};

use crate::command::{CommandLine, Redirect, SpawnOptions, DEFAULT_DELIMITER};
use crate::experiment::Experiment;
use crate::process::{ProcessHandle, ProcessStatus};

/// Positional-argument placeholder replaced by the data path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// How to invoke the command for every experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub delimiter: String,
    /// Log every started command at `info`.
    pub echo: bool,
    /// Parameters applied before the per-combination overrides.
    pub defaults: ParameterSet,
    /// Where sampled data and per-experiment output files are written.
    pub output_dir: PathBuf,
    /// Seed for reproducible sampling.
    pub seed: Option<u64>,
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            working_dir: None,
            delimiter: DEFAULT_DELIMITER.to_string(),
            echo: true,
            defaults: ParameterSet::new(),
            output_dir: std::env::temp_dir().join("sieve"),
            seed: None,
        }
    }
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_defaults(mut self, defaults: ParameterSet) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Render the command line for one experiment.
    pub fn command_line(&self, data: &Path, parameters: &ParameterSet) -> CommandLine {
        let data = data.display().to_string();
        CommandLine::new(self.program.clone())
            .args(self.args.iter().map(|arg| arg.replace(INPUT_PLACEHOLDER, &data)))
            .delimiter(self.delimiter.clone())
            .echo(self.echo)
            .parameters(parameters)
    }
}

/// Input of a [`CommandExperiment`]: the shared template plus a data file.
#[derive(Debug, Clone)]
pub struct CommandInput {
    pub template: Arc<CommandTemplate>,
    pub data: PathBuf,
    /// `data` was written by [`CommandExperiment::sample`] and may be removed.
    sampled: bool,
}

impl CommandInput {
    pub fn new(template: CommandTemplate, data: impl Into<PathBuf>) -> Self {
        Self {
            template: Arc::new(template),
            data: data.into(),
            sampled: false,
        }
    }

    pub fn is_sample(&self) -> bool {
        self.sampled
    }
}

fn remove_if_present(path: &Path) -> SvResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug)]
pub struct CommandExperiment {
    id: Uuid,
    input: CommandInput,
    parameters: ParameterSet,
    process: ProcessHandle,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
}

impl CommandExperiment {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }
}

impl Experiment for CommandExperiment {
    type Input = CommandInput;

    fn default_parameters(input: &CommandInput) -> ParameterSet {
        input.template.defaults.clone()
    }

    fn create(input: CommandInput, parameters: ParameterSet) -> SvResult<Self> {
        let id = Uuid::new_v4();
        let dir = &input.template.output_dir;
        Ok(Self {
            id,
            stdout_path: dir.join(format!("{id}.out")),
            stderr_path: dir.join(format!("{id}.err")),
            input,
            parameters,
            process: ProcessHandle::new(),
        })
    }

    /// Random `size`-line subset of the data file, original order kept.
    fn sample(input: &CommandInput, size: usize) -> SvResult<CommandInput> {
        let contents = fs::read_to_string(&input.data)?;
        let lines: Vec<&str> = contents.lines().collect();
        if size >= lines.len() {
            return Ok(input.clone());
        }

        let mut picked = match input.template.seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(size as u64));
                index::sample(&mut rng, lines.len(), size).into_vec()
            }
            None => index::sample(&mut rand::rng(), lines.len(), size).into_vec(),
        };
        picked.sort_unstable();

        let dir = &input.template.output_dir;
        fs::create_dir_all(dir)?;
        let stem = input
            .data
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());
        let path = dir.join(format!("{stem}.sample{size}.{}.txt", Uuid::new_v4()));

        let mut file = io::BufWriter::new(fs::File::create(&path)?);
        for i in picked {
            writeln!(file, "{}", lines[i])?;
        }
        file.flush()?;
        debug!(size, path = %path.display(), "Wrote data sample");

        Ok(CommandInput {
            template: Arc::clone(&input.template),
            data: path,
            sampled: true,
        })
    }

    /// Removes the sample file. The caller's own data file is never touched.
    fn discard_sample(sample: &CommandInput) -> SvResult<()> {
        if !sample.sampled {
            return Ok(());
        }
        debug!(path = %sample.data.display(), "Removing data sample");
        remove_if_present(&sample.data)
    }

    fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    fn describe_input(&self) -> String {
        self.input.data.display().to_string()
    }

    fn process(&self) -> Option<&ProcessHandle> {
        Some(&self.process)
    }

    fn process_mut(&mut self) -> Option<&mut ProcessHandle> {
        Some(&mut self.process)
    }

    fn start(&mut self) -> SvResult<()> {
        let template = &self.input.template;
        fs::create_dir_all(&template.output_dir)?;
        let command = template.command_line(&self.input.data, &self.parameters);
        let options = SpawnOptions {
            working_dir: template.working_dir.clone(),
            stdout: Redirect::File(self.stdout_path.clone()),
            stderr: Redirect::File(self.stderr_path.clone()),
        };
        self.process.launch(&command, &options)?;
        Ok(())
    }

    fn score(&self) -> SvResult<f64> {
        if self.process.status() != ProcessStatus::Completed {
            return Err(SvError::NotFinished { operation: "score" });
        }
        let output = fs::read_to_string(&self.stdout_path)?;
        let line = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| SvError::ScoreParse {
                message: format!("{} is empty", self.stdout_path.display()),
            })?;
        line.parse::<f64>().map_err(|e| SvError::ScoreParse {
            message: format!("{line:?}: {e}"),
        })
    }

    fn delete(&mut self) -> SvResult<()> {
        self.process.kill()?;
        remove_if_present(&self.stdout_path)?;
        remove_if_present(&self.stderr_path)
    }
}
