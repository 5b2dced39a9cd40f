//! Application services.

mod supervisor;

pub use supervisor::{
    FlushOutcome, RunningSupervisor, ShutdownReport, Supervisor, SupervisorConfig, WorkerOutcome,
};
