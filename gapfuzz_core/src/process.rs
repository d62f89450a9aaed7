use crate::gap::SubstitutionMap;
use crate::location::Location;
use serde::Serialize;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    /// The target misbehaved (non-zero exit, signal). A finding, not a
    /// fuzzer failure.
    Crash(String),
    /// The process itself failed: transport error, panic, bad template.
    Failed(String),
    Other(String),
}

impl ExecutionStatus {
    /// `true` when the combination could not be exercised at all.
    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionStatus::Failed(_) | ExecutionStatus::Other(_))
    }
}

/// What the target sent back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub status: ExecutionStatus,
    pub output: ProcessOutput,
}

impl Execution {
    pub fn ok(output: ProcessOutput) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            output,
        }
    }

    pub fn with_status(status: ExecutionStatus, output: ProcessOutput) -> Self {
        Self { status, output }
    }
}

/// One unit of fuzzing work: send one mutated message and collect the reply.
///
/// A process is created for a single combination, executed exactly once on
/// a worker thread and then dropped. Any pre-processing of the payloads or
/// the message and any post-processing of the reply happen inside
/// `execute`.
pub trait FuzzProcess: Send {
    fn execute(&mut self) -> Result<Execution, anyhow::Error>;
}

impl<F> FuzzProcess for F
where
    F: FnMut() -> Result<Execution, anyhow::Error> + Send,
{
    fn execute(&mut self) -> Result<Execution, anyhow::Error> {
        self()
    }
}

/// Builds the process for one combination.
///
/// Called on the driver thread, once per dispatched combination index.
pub trait FuzzProcessFactory<L: Location>: Send + Sync {
    fn create(&self, substitutions: SubstitutionMap<L>, index: u64) -> Box<dyn FuzzProcess>;
}

impl<L, F> FuzzProcessFactory<L> for F
where
    L: Location,
    F: Fn(SubstitutionMap<L>, u64) -> Box<dyn FuzzProcess> + Send + Sync,
{
    fn create(&self, substitutions: SubstitutionMap<L>, index: u64) -> Box<dyn FuzzProcess> {
        self(substitutions, index)
    }
}

/// Outcome of one combination, as handed to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuzzResult {
    pub index: u64,
    /// Chosen literal per gap, in gap order.
    pub payloads: Vec<String>,
    pub status: ExecutionStatus,
    pub output: ProcessOutput,
    pub elapsed_ms: u64,
}

impl FuzzResult {
    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }
}

/// Executes `process` and turns whatever happens, including a panic, into a
/// [`FuzzResult`].
pub fn run_process(
    index: u64,
    payloads: Vec<String>,
    mut process: Box<dyn FuzzProcess>,
) -> FuzzResult {
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| process.execute()));

    let (status, output) = match outcome {
        Ok(Ok(execution)) => (execution.status, execution.output),
        Ok(Err(e)) => {
            log::warn!("Combination {index} failed: {e:#}");
            (ExecutionStatus::Failed(format!("{e:#}")), ProcessOutput::default())
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            log::warn!("Combination {index} panicked: {msg}");
            (
                ExecutionStatus::Failed(format!("panicked: {msg}")),
                ProcessOutput::default(),
            )
        }
    };

    FuzzResult {
        index,
        payloads,
        status,
        output,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Span;

    fn payloads() -> Vec<String> {
        vec!["a".to_string()]
    }

    #[test]
    fn successful_process_is_reported_as_is() {
        let process: Box<dyn FuzzProcess> = Box::new(|| -> Result<Execution, anyhow::Error> {
            Ok(Execution::ok(ProcessOutput {
                stdout: "pong".to_string(),
                ..ProcessOutput::default()
            }))
        });
        let result = run_process(7, payloads(), process);
        assert_eq!(result.index, 7);
        assert_eq!(result.payloads, vec!["a"]);
        assert_eq!(result.status, ExecutionStatus::Ok);
        assert_eq!(result.output.stdout, "pong");
        assert!(!result.is_error());
    }

    #[test]
    fn crash_status_is_a_finding_not_an_error() {
        let process: Box<dyn FuzzProcess> = Box::new(|| -> Result<Execution, anyhow::Error> {
            Ok(Execution::with_status(
                ExecutionStatus::Crash("Exited with code 139".to_string()),
                ProcessOutput::default(),
            ))
        });
        let result = run_process(0, payloads(), process);
        assert!(matches!(result.status, ExecutionStatus::Crash(_)));
        assert!(!result.is_error());
    }

    #[test]
    fn process_error_becomes_failed_result() {
        let process: Box<dyn FuzzProcess> = Box::new(|| -> Result<Execution, anyhow::Error> {
            Err(anyhow::anyhow!("connection refused"))
        });
        let result = run_process(3, payloads(), process);
        match &result.status {
            ExecutionStatus::Failed(msg) => assert!(msg.contains("connection refused")),
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert!(result.is_error());
    }

    #[test]
    fn process_panic_is_caught() {
        let process: Box<dyn FuzzProcess> = Box::new(|| -> Result<Execution, anyhow::Error> {
            panic!("Boom!");
        });
        let result = run_process(1, payloads(), process);
        match &result.status {
            ExecutionStatus::Failed(msg) => assert!(msg.contains("Boom!")),
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn closure_factory_creates_processes() {
        let factory = |map: SubstitutionMap<Span>, index: u64| -> Box<dyn FuzzProcess> {
            let joined = map.values().join(",");
            Box::new(move || -> Result<Execution, anyhow::Error> {
                Ok(Execution::ok(ProcessOutput {
                    stdout: format!("{index}:{joined}"),
                    ..ProcessOutput::default()
                }))
            })
        };
        let map = SubstitutionMap::from_entries(vec![
            (Span::new(0, 1), "x".to_string()),
            (Span::new(2, 3), "y".to_string()),
        ]);
        let mut process = FuzzProcessFactory::create(&factory, map, 4);
        assert_eq!(process.execute().unwrap().output.stdout, "4:x,y");
    }
}
