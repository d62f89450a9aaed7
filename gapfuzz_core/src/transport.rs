use crate::gap::SubstitutionMap;
use crate::location::Span;
use crate::message::MarkedMessage;
use crate::process::{Execution, ExecutionStatus, FuzzProcess, FuzzProcessFactory, ProcessOutput};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn default_timeout() -> Duration {
    Duration::from_millis(2000)
}

/// How the rendered message reaches the target command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDelivery {
    StdIn,
    /// Written to a temporary file whose path replaces `{}` in the template.
    /// The expanded template is split on whitespace and appended as
    /// arguments.
    File(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSettings {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl CommandSettings {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            input_delivery: InputDelivery::StdIn,
            timeout: default_timeout(),
            working_dir: None,
        }
    }
}

/// Sends one message to an external command and collects its reply.
///
/// A non-zero exit or a terminating signal is a [`ExecutionStatus::Crash`],
/// running past the timeout is a [`ExecutionStatus::Timeout`]. Failing to
/// start the command at all is an error.
pub struct CommandProcess {
    settings: Arc<CommandSettings>,
    input: Vec<u8>,
}

impl CommandProcess {
    pub fn new(settings: Arc<CommandSettings>, input: impl Into<Vec<u8>>) -> Self {
        Self {
            settings,
            input: input.into(),
        }
    }

    fn wait_with_timeout(&self, child: &mut Child) -> Result<Option<ExitStatus>, anyhow::Error> {
        let start_time = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {
                    if start_time.elapsed() > self.settings.timeout {
                        log::debug!("Target timed out after {:?}, killing", self.settings.timeout);
                        kill_process_group(child)
                            .map_err(|e| anyhow::anyhow!("Failed to kill timed-out process: {e}"))?;
                        let _ = child.wait();
                        return Ok(None);
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(anyhow::anyhow!("Error waiting for child: {e}")),
            }
        }
    }
}

impl FuzzProcess for CommandProcess {
    fn execute(&mut self) -> Result<Execution, anyhow::Error> {
        let (program, args) = self
            .settings
            .command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Target command is empty"))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &self.settings.working_dir {
            cmd.current_dir(cwd);
        }

        let mut temp_file: Option<tempfile::NamedTempFile> = None;
        match &self.settings.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let mut file = tempfile::NamedTempFile::new()
                    .map_err(|e| anyhow::anyhow!("Failed to create temp file: {e}"))?;
                file.as_file_mut()
                    .write_all(&self.input)
                    .and_then(|()| file.as_file_mut().flush())
                    .map_err(|e| {
                        anyhow::anyhow!("Failed to write to temp file {:?}: {}", file.path(), e)
                    })?;
                let path = file
                    .path()
                    .to_str()
                    .ok_or_else(|| anyhow::anyhow!("Temp file path is not valid UTF-8"))?;
                for part in arg_template.replace("{}", path).split_whitespace() {
                    cmd.arg(part);
                }
                cmd.stdin(Stdio::null());
                temp_file = Some(file);
            }
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a timeout also reaches forked grandchildren
            // holding the output pipes.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| {
            anyhow::anyhow!("Failed to spawn command '{:?}': {}", self.settings.command, e)
        })?;

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);
        let stdin_writer = child.stdin.take().map(|mut stdin| {
            let input = self.input.clone();
            thread::spawn(move || match stdin.write_all(&input) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
                    log::debug!("Error writing to child stdin: {e}");
                }
                _ => {}
            })
        });

        let waited = self.wait_with_timeout(&mut child);
        if waited.is_err() {
            let _ = kill_process_group(&mut child);
            let _ = child.wait();
        }

        if let Some(writer) = stdin_writer {
            let _ = writer.join();
        }
        let output = ProcessOutput {
            stdout: collect_reader(stdout_reader),
            stderr: collect_reader(stderr_reader),
            exit_code: None,
            signal: None,
        };
        drop(temp_file);

        match waited? {
            None => Ok(Execution::with_status(ExecutionStatus::Timeout, output)),
            Some(status) => Ok(classify_exit(status, output)),
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) takes no pointers. The child was spawned with
    // `process_group(0)`, so its pid is the group id.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // Group already gone.
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            log::debug!("Error reading child output: {e}");
        }
        buf
    })
}

fn collect_reader(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn classify_exit(status: ExitStatus, mut output: ProcessOutput) -> Execution {
    output.exit_code = status.code();
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        output.signal = status.signal();
    }

    if status.success() {
        return Execution::ok(output);
    }
    let desc = match (output.exit_code, output.signal) {
        (Some(code), _) => format!("Exited with code {code}"),
        (None, Some(signal)) => format!("Terminated by signal {signal}"),
        (None, None) => "Exited abnormally".to_string(),
    };
    Execution::with_status(ExecutionStatus::Crash(desc), output)
}

fn render_failure(index: u64, error: crate::message::MessageError) -> Box<dyn FuzzProcess> {
    Box::new(move || -> Result<Execution, anyhow::Error> {
        Err(anyhow::anyhow!("Cannot render combination {index}: {error}"))
    })
}

/// Renders each combination into the message and pipes it to a command.
pub struct CommandProcessFactory {
    message: Arc<MarkedMessage>,
    settings: Arc<CommandSettings>,
}

impl CommandProcessFactory {
    pub fn new(message: Arc<MarkedMessage>, settings: CommandSettings) -> Self {
        Self {
            message,
            settings: Arc::new(settings),
        }
    }
}

impl FuzzProcessFactory<Span> for CommandProcessFactory {
    fn create(&self, substitutions: SubstitutionMap<Span>, index: u64) -> Box<dyn FuzzProcess> {
        match self.message.render(&substitutions) {
            Ok(rendered) => Box::new(CommandProcess::new(Arc::clone(&self.settings), rendered)),
            Err(e) => render_failure(index, e),
        }
    }
}

/// Dry run: the rendered message becomes the process output, nothing is
/// executed.
pub struct EchoProcessFactory {
    message: Arc<MarkedMessage>,
}

impl EchoProcessFactory {
    pub fn new(message: Arc<MarkedMessage>) -> Self {
        Self { message }
    }
}

impl FuzzProcessFactory<Span> for EchoProcessFactory {
    fn create(&self, substitutions: SubstitutionMap<Span>, index: u64) -> Box<dyn FuzzProcess> {
        match self.message.render(&substitutions) {
            Ok(rendered) => Box::new(move || -> Result<Execution, anyhow::Error> {
                Ok(Execution::ok(ProcessOutput {
                    stdout: rendered.clone(),
                    ..ProcessOutput::default()
                }))
            }),
            Err(e) => render_failure(index, e),
        }
    }
}
