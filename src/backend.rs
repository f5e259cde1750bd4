use std::path::PathBuf;

use crate::{MachineId, ProcessId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Command,
    Terminal,
}

impl ProcessKind {
    pub fn label(self) -> &'static str {
        match self {
            ProcessKind::Command => "command",
            ProcessKind::Terminal => "terminal",
        }
    }

    pub(crate) fn id_prefix(self) -> &'static str {
        match self {
            ProcessKind::Command => "cmd",
            ProcessKind::Terminal => "term",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MachineDescriptor {
    pub id: MachineId,
    pub name: String,
    #[serde(default)]
    pub dev_machine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExecSpec {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ExecSpec {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub status: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend error status={}: {}", self.status, self.message)
    }
}

impl std::error::Error for BackendError {}

/// Completions and streamed output posted by a backend onto the event
/// channel. Submission calls on [`MachineBackend`] return immediately; the
/// matching acknowledgment arrives here, tagged with the id it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    MachineStarted {
        machine: MachineDescriptor,
    },
    MachineStartFailed {
        context_id: String,
        error: BackendError,
    },
    ExecStarted {
        process_id: ProcessId,
    },
    ExecFailed {
        process_id: ProcessId,
        error: BackendError,
    },
    Output {
        process_id: ProcessId,
        chunk: Vec<u8>,
    },
    ProcessStopped {
        process_id: ProcessId,
    },
    ProcessExited {
        process_id: ProcessId,
        diagnostic: String,
    },
}

pub trait MachineBackend {
    fn list_machines(&self, context_id: &str) -> Result<Vec<MachineDescriptor>, BackendError>;

    fn start_machine(&mut self, context_id: &str) -> Result<(), BackendError>;

    fn stop_machine(&mut self, machine_id: &str) -> Result<(), BackendError>;

    fn exec_process(
        &mut self,
        machine_id: &str,
        process_id: &str,
        kind: ProcessKind,
        spec: &ExecSpec,
    ) -> Result<(), BackendError>;

    fn stop_process(&mut self, process_id: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
#[path = "tests/json_contract_tests.rs"]
mod tests;
