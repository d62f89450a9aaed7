pub mod config;
pub mod fuzzer;
pub mod gap;
pub mod listener;
pub mod location;
pub mod message;
pub mod payload;
pub mod pool;
pub mod process;
pub mod regex;
pub mod scheduler;
pub mod transport;

pub use config::GapfuzzConfig;
pub use fuzzer::{Fuzzer, FuzzerControl, FuzzerError, FuzzerHandle, RunSettings, RunSummary};
pub use gap::{Gap, GapError, GapSet, SubstitutionMap};
pub use listener::{FuzzerListener, ListenerSet, NoOpListener};
pub use location::{Location, Span};
pub use message::{MarkedMessage, MessageError};
pub use payload::{Payload, PayloadError, PayloadKind, PayloadResolver, PayloadSource};
pub use pool::{GateState, PauseGate, PoolError, PoolStats, WorkerPool};
pub use process::{
    Execution, ExecutionStatus, FuzzProcess, FuzzProcessFactory, FuzzResult, ProcessOutput,
};
pub use scheduler::{CombinationScheduler, SchedulerError, Strides};
pub use transport::{CommandProcess, CommandProcessFactory, CommandSettings, EchoProcessFactory};
