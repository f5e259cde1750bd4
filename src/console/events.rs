use crate::machine::MachineStatus;
use crate::{MachineId, ProcessId};

use super::ProcessState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Notifications fanned out to subscribers after each observable mutation.
/// Each carries the affected id and the new value; subscribers own any
/// rendering or relay decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    NodeAdded {
        node_id: String,
    },
    NodeRemoved {
        node_id: String,
    },
    SelectionChanged {
        node_id: Option<String>,
    },
    ProcessStateChanged {
        process_id: ProcessId,
        state: ProcessState,
    },
    OutputVisibilityChanged {
        process_id: Option<ProcessId>,
    },
    MachineRecorded {
        machine_id: MachineId,
        status: MachineStatus,
    },
    MachineRemoved {
        machine_id: MachineId,
    },
    DevMachineChanged {
        machine_id: Option<MachineId>,
    },
    Notice {
        level: NoticeLevel,
        message: String,
    },
}

/// Explicit subscriber list owned by the orchestrator; there is no shared
/// bus. Subscribers are invoked in registration order.
#[derive(Default)]
pub(super) struct Subscribers {
    callbacks: Vec<Box<dyn FnMut(&ConsoleEvent)>>,
}

impl Subscribers {
    pub(super) fn subscribe(&mut self, callback: Box<dyn FnMut(&ConsoleEvent)>) {
        self.callbacks.push(callback);
    }

    pub(super) fn emit(&mut self, event: &ConsoleEvent) {
        for callback in &mut self.callbacks {
            callback(event);
        }
    }
}
