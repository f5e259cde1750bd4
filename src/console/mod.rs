use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use indexmap::IndexMap;

use crate::backend::{
    BackendError, BackendEvent, ExecSpec, MachineBackend, MachineDescriptor, ProcessKind,
};
use crate::config::GantryConfig;
use crate::diagnostics::RuntimeDiagnostics;
use crate::machine::{Machine, MachineRegistry, MachineStatus, RegistryError};
use crate::output::{OutputError, OutputMultiplexer, OutputSink};
use crate::tree::{NodeKind, ProcessNode, ProcessTree, TreeError};
use crate::{MachineId, ProcessId};

pub mod events;

use events::{ConsoleEvent, NoticeLevel, Subscribers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub id: ProcessId,
    pub machine_id: MachineId,
    pub kind: ProcessKind,
    pub display_name: String,
    pub state: ProcessState,
}

#[derive(Debug)]
pub enum OrchestratorError {
    Registry(RegistryError),
    Tree(TreeError),
    Output(OutputError),
    Backend(BackendError),
    ProcessNotFound { process_id: ProcessId },
    ProcessStillActive { process_id: ProcessId, state: ProcessState },
    NoDevMachine,
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::Registry(error) => write!(f, "{error}"),
            OrchestratorError::Tree(error) => write!(f, "{error}"),
            OrchestratorError::Output(error) => write!(f, "{error}"),
            OrchestratorError::Backend(error) => write!(f, "{error}"),
            OrchestratorError::ProcessNotFound { process_id } => {
                write!(f, "unknown process `{process_id}`")
            }
            OrchestratorError::ProcessStillActive { process_id, state } => {
                write!(
                    f,
                    "process `{process_id}` is still {state}; stop it before closing"
                )
            }
            OrchestratorError::NoDevMachine => write!(f, "no dev machine is set"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<RegistryError> for OrchestratorError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<TreeError> for OrchestratorError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

impl From<OutputError> for OrchestratorError {
    fn from(value: OutputError) -> Self {
        Self::Output(value)
    }
}

impl From<BackendError> for OrchestratorError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

/// Lifecycle controller for machines and the processes running inside them.
///
/// The orchestrator is the sole writer of process state and the only
/// component that mutates the registry, the tree, and the sink store. The
/// backend posts completions and output onto an mpsc channel; `pump` drains
/// that channel from the caller's context, so no locking is involved
/// anywhere in the core.
pub struct ConsoleOrchestrator {
    config: GantryConfig,
    backend: Box<dyn MachineBackend>,
    backend_events: Receiver<BackendEvent>,
    registry: MachineRegistry,
    tree: ProcessTree,
    output: OutputMultiplexer,
    processes: IndexMap<ProcessId, Process>,
    stop_deadlines: HashMap<ProcessId, Instant>,
    next_ordinal: usize,
    subscribers: Subscribers,
    diagnostics: RuntimeDiagnostics,
}

impl ConsoleOrchestrator {
    pub fn new(
        config: GantryConfig,
        backend: Box<dyn MachineBackend>,
        backend_events: Receiver<BackendEvent>,
    ) -> Self {
        Self {
            config,
            backend,
            backend_events,
            registry: MachineRegistry::new(),
            tree: ProcessTree::new(),
            output: OutputMultiplexer::new(),
            processes: IndexMap::new(),
            stop_deadlines: HashMap::new(),
            next_ordinal: 0,
            subscribers: Subscribers::default(),
            diagnostics: RuntimeDiagnostics::from_env(),
        }
    }

    pub fn subscribe(&mut self, callback: Box<dyn FnMut(&ConsoleEvent)>) {
        self.subscribers.subscribe(callback);
    }

    pub fn registry(&self) -> &MachineRegistry {
        &self.registry
    }

    pub fn tree(&self) -> &ProcessTree {
        &self.tree
    }

    pub fn output(&self) -> &OutputMultiplexer {
        &self.output
    }

    pub fn process(&self, process_id: &str) -> Option<&Process> {
        self.processes.get(process_id)
    }

    pub fn processes(&self) -> Vec<&Process> {
        self.processes.values().collect()
    }

    pub fn diagnostics(&self) -> &RuntimeDiagnostics {
        &self.diagnostics
    }

    /// Loads the machines of a workspace context. An empty listing submits a
    /// machine start instead; the started machine is recorded (and becomes
    /// the dev machine) once its acknowledgment is pumped.
    pub fn open_context(&mut self, context_id: &str) -> Result<(), OrchestratorError> {
        let machines = self.backend.list_machines(context_id)?;
        if machines.is_empty() {
            self.backend.start_machine(context_id)?;
            return Ok(());
        }
        let dev_id = machines
            .iter()
            .find(|descriptor| descriptor.dev_machine)
            .or_else(|| machines.first())
            .map(|descriptor| descriptor.id.clone());
        for descriptor in &machines {
            self.record_machine(descriptor, MachineStatus::Running);
        }
        if let Some(machine_id) = dev_id {
            self.registry.set_dev_machine(&machine_id)?;
            self.emit(ConsoleEvent::DevMachineChanged {
                machine_id: Some(machine_id),
            });
        }
        Ok(())
    }

    /// Local teardown of everything the context accumulated: processes are
    /// forced to `Stopped`, nodes and sinks released, the registry cleared.
    /// No backend stop calls are issued.
    pub fn close_context(&mut self) {
        let selected_before = self.tree.selected().map(str::to_owned);
        for machine_id in self.registry.ids() {
            if let Ok(subtree) = self.tree.remove_node(&machine_id) {
                for child in subtree.removed_children {
                    self.finalize_removed_process(&child.id);
                    self.emit(ConsoleEvent::NodeRemoved { node_id: child.id });
                }
                self.emit(ConsoleEvent::NodeRemoved {
                    node_id: machine_id.clone(),
                });
            }
            self.emit(ConsoleEvent::MachineRemoved {
                machine_id: machine_id.clone(),
            });
        }
        let had_dev = self.registry.dev_machine().is_some();
        self.registry.clear();
        if had_dev {
            self.emit(ConsoleEvent::DevMachineChanged { machine_id: None });
        }
        if selected_before.is_some() {
            self.emit(ConsoleEvent::SelectionChanged { node_id: None });
        }
        if self.output.visible().is_some() {
            self.emit(ConsoleEvent::OutputVisibilityChanged { process_id: None });
        }
        self.tree.clear();
        self.output.clear();
        self.processes.clear();
        self.stop_deadlines.clear();
    }

    /// Creates the node and the process synchronously in `Starting`, then
    /// submits the exec request. Failures (submission or asynchronous) drive
    /// the process to `Failed` and leave the node in place for inspection.
    pub fn launch(
        &mut self,
        machine_id: &str,
        kind: ProcessKind,
        display_name: &str,
        spec: ExecSpec,
    ) -> Result<ProcessId, OrchestratorError> {
        self.registry.get(machine_id)?;
        self.next_ordinal += 1;
        let process_id = format!("{}-{}", kind.id_prefix(), self.next_ordinal);
        let node_kind = match kind {
            ProcessKind::Command => NodeKind::Command,
            ProcessKind::Terminal => NodeKind::Terminal,
        };
        self.tree.add_node(ProcessNode::process(
            process_id.clone(),
            node_kind,
            machine_id,
            display_name,
        ))?;
        self.processes.insert(
            process_id.clone(),
            Process {
                id: process_id.clone(),
                machine_id: machine_id.to_owned(),
                kind,
                display_name: display_name.to_owned(),
                state: ProcessState::Starting,
            },
        );
        self.emit(ConsoleEvent::NodeAdded {
            node_id: process_id.clone(),
        });
        self.emit(ConsoleEvent::ProcessStateChanged {
            process_id: process_id.clone(),
            state: ProcessState::Starting,
        });
        self.diagnostics.record_launch(&process_id, machine_id);
        if let Err(error) = self.backend.exec_process(machine_id, &process_id, kind, &spec) {
            self.fail_process(&process_id, &error);
        }
        Ok(process_id)
    }

    /// Launches on the current dev machine, the default execution target.
    pub fn launch_on_dev_machine(
        &mut self,
        kind: ProcessKind,
        display_name: &str,
        spec: ExecSpec,
    ) -> Result<ProcessId, OrchestratorError> {
        let machine_id = self
            .registry
            .dev_machine()
            .map(|machine| machine.id.clone())
            .ok_or(OrchestratorError::NoDevMachine)?;
        self.launch(&machine_id, kind, display_name, spec)
    }

    /// Optimistic stop: the state moves to `Stopping` immediately and the
    /// backend call is fire-and-forget; acknowledgment (or the stop timeout)
    /// finalizes the state. A no-op for processes already winding down.
    pub fn stop(&mut self, process_id: &str) -> Result<(), OrchestratorError> {
        let state = self
            .processes
            .get(process_id)
            .map(|process| process.state)
            .ok_or_else(|| OrchestratorError::ProcessNotFound {
                process_id: process_id.to_owned(),
            })?;
        if matches!(
            state,
            ProcessState::Stopping | ProcessState::Stopped | ProcessState::Failed
        ) {
            return Ok(());
        }
        self.set_state(process_id, ProcessState::Stopping);
        self.stop_deadlines.insert(
            process_id.to_owned(),
            Instant::now() + self.config.stop_timeout,
        );
        self.diagnostics.record_stop(process_id);
        if let Err(error) = self.backend.stop_process(process_id) {
            self.fail_process(process_id, &error);
        }
        Ok(())
    }

    /// Removing the node and releasing the sink is only legal once the
    /// process has reached a terminal state.
    pub fn close(&mut self, process_id: &str) -> Result<(), OrchestratorError> {
        let state = self
            .processes
            .get(process_id)
            .map(|process| process.state)
            .ok_or_else(|| OrchestratorError::ProcessNotFound {
                process_id: process_id.to_owned(),
            })?;
        if !state.is_terminal() {
            return Err(OrchestratorError::ProcessStillActive {
                process_id: process_id.to_owned(),
                state,
            });
        }
        let selected_before = self.tree.selected().map(str::to_owned);
        self.tree.remove_node(process_id)?;
        self.finalize_removed_process(process_id);
        self.emit(ConsoleEvent::NodeRemoved {
            node_id: process_id.to_owned(),
        });
        if selected_before.as_deref() == Some(process_id) {
            self.emit(ConsoleEvent::SelectionChanged { node_id: None });
        }
        self.diagnostics.record_close(process_id);
        Ok(())
    }

    /// Forces every descendant to `Stopped` in index order, releases their
    /// nodes and sinks, then removes the machine locally and asks the
    /// backend to stop it. A backend stop failure is surfaced as a notice;
    /// local removal is already done at that point.
    pub fn terminate_machine(&mut self, machine_id: &str) -> Result<(), OrchestratorError> {
        self.registry.get(machine_id)?;
        let was_dev = self
            .registry
            .dev_machine()
            .is_some_and(|machine| machine.id == machine_id);
        let selected_before = self.tree.selected().map(str::to_owned);
        let subtree = self.tree.remove_node(machine_id)?;
        for child in subtree.removed_children {
            self.finalize_removed_process(&child.id);
            self.emit(ConsoleEvent::NodeRemoved { node_id: child.id });
        }
        self.emit(ConsoleEvent::NodeRemoved {
            node_id: machine_id.to_owned(),
        });
        if selected_before.is_some() && self.tree.selected().is_none() {
            self.emit(ConsoleEvent::SelectionChanged { node_id: None });
        }
        if let Err(error) = self.backend.stop_machine(machine_id) {
            self.notice(
                NoticeLevel::Error,
                format!("failed to stop machine `{machine_id}`: {error}"),
            );
        }
        self.registry.remove(machine_id);
        if was_dev {
            self.emit(ConsoleEvent::DevMachineChanged { machine_id: None });
        }
        self.emit(ConsoleEvent::MachineRemoved {
            machine_id: machine_id.to_owned(),
        });
        Ok(())
    }

    /// Caller-validated selection: an unknown id is a silent no-op reporting
    /// `false`. Selecting a process node also makes its output visible.
    pub fn select_node(&mut self, node_id: &str) -> bool {
        if !self.tree.select(node_id) {
            return false;
        }
        self.emit(ConsoleEvent::SelectionChanged {
            node_id: Some(node_id.to_owned()),
        });
        let is_process = self
            .tree
            .get(node_id)
            .is_some_and(|node| node.kind.is_process());
        if is_process && self.output.is_attached(node_id) {
            self.show_output(node_id);
        }
        true
    }

    pub fn can_stop(&self, process_id: &str) -> bool {
        self.processes
            .get(process_id)
            .is_some_and(|process| {
                matches!(process.state, ProcessState::Starting | ProcessState::Running)
            })
    }

    /// Drains pending backend events, bounded per call, applying them in
    /// arrival order. Events for ids no longer known are dropped.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0usize;
        while applied < self.config.max_events_per_pump {
            let Ok(event) = self.backend_events.try_recv() else {
                break;
            };
            self.apply_event(event);
            applied += 1;
        }
        applied
    }

    /// Expires stop deadlines: a process still `Stopping` past its deadline
    /// is forced to `Failed` so no entry can be stuck forever.
    pub fn tick(&mut self, now: Instant) -> usize {
        let expired = self
            .stop_deadlines
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(process_id, _)| process_id.clone())
            .collect::<Vec<String>>();
        let mut forced = 0usize;
        for process_id in expired {
            self.stop_deadlines.remove(&process_id);
            let still_stopping = self
                .processes
                .get(&process_id)
                .is_some_and(|process| process.state == ProcessState::Stopping);
            if !still_stopping {
                continue;
            }
            self.set_state(&process_id, ProcessState::Failed);
            self.notice(
                NoticeLevel::Error,
                format!("process `{process_id}` did not acknowledge stop in time"),
            );
            self.diagnostics
                .record_forced_failure(&process_id, "stop-timeout");
            forced += 1;
        }
        forced
    }

    fn apply_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::MachineStarted { machine } => {
                self.record_machine(&machine, MachineStatus::Running);
                if self.registry.dev_machine().is_none()
                    && self.registry.set_dev_machine(&machine.id).is_ok()
                {
                    self.emit(ConsoleEvent::DevMachineChanged {
                        machine_id: Some(machine.id),
                    });
                }
            }
            BackendEvent::MachineStartFailed { context_id, error } => {
                self.notice(
                    NoticeLevel::Error,
                    format!("failed to start a machine for `{context_id}`: {error}"),
                );
            }
            BackendEvent::ExecStarted { process_id } => {
                let Some(process) = self.processes.get(&process_id) else {
                    self.drop_stale(&format!("exec-started process={process_id}"));
                    return;
                };
                let kind = process.kind;
                let starting = process.state == ProcessState::Starting;
                self.ensure_sink(&process_id, kind);
                if starting {
                    self.set_state(&process_id, ProcessState::Running);
                    self.show_output(&process_id);
                }
            }
            BackendEvent::ExecFailed { process_id, error } => {
                let known = self
                    .processes
                    .get(&process_id)
                    .is_some_and(|process| !process.state.is_terminal());
                if !known {
                    self.drop_stale(&format!("exec-failed process={process_id}"));
                    return;
                }
                self.fail_process(&process_id, &error);
            }
            BackendEvent::Output { process_id, chunk } => {
                if !self.output.write(&process_id, &chunk) {
                    self.diagnostics.record_dropped_chunk(&process_id, chunk.len());
                }
            }
            BackendEvent::ProcessStopped { process_id } => {
                let known = self
                    .processes
                    .get(&process_id)
                    .is_some_and(|process| !process.state.is_terminal());
                if !known {
                    self.drop_stale(&format!("process-stopped process={process_id}"));
                    return;
                }
                self.stop_deadlines.remove(&process_id);
                self.output.push_line(&process_id, "stopped");
                self.set_state(&process_id, ProcessState::Stopped);
            }
            BackendEvent::ProcessExited {
                process_id,
                diagnostic,
            } => {
                let Some(state) = self
                    .processes
                    .get(&process_id)
                    .map(|process| process.state)
                else {
                    self.drop_stale(&format!("process-exited process={process_id}"));
                    return;
                };
                if state.is_terminal() {
                    self.drop_stale(&format!("process-exited process={process_id}"));
                    return;
                }
                self.stop_deadlines.remove(&process_id);
                self.output.push_line(&process_id, &diagnostic);
                if state == ProcessState::Stopping || diagnostic == "exit=0" {
                    self.set_state(&process_id, ProcessState::Stopped);
                } else {
                    self.set_state(&process_id, ProcessState::Failed);
                    self.notice(
                        NoticeLevel::Error,
                        format!("process `{process_id}` ended abnormally ({diagnostic})"),
                    );
                }
            }
        }
    }

    fn record_machine(&mut self, descriptor: &MachineDescriptor, status: MachineStatus) {
        let is_new = !self.registry.contains(&descriptor.id);
        self.registry
            .upsert(Machine::from_descriptor(descriptor, status));
        if is_new {
            let node = ProcessNode::machine(descriptor.id.clone(), descriptor.name.clone());
            if self.tree.add_node(node).is_ok() {
                self.emit(ConsoleEvent::NodeAdded {
                    node_id: descriptor.id.clone(),
                });
            }
        }
        self.emit(ConsoleEvent::MachineRecorded {
            machine_id: descriptor.id.clone(),
            status,
        });
    }

    fn fail_process(&mut self, process_id: &str, error: &BackendError) {
        let Some(kind) = self
            .processes
            .get(process_id)
            .map(|process| process.kind)
        else {
            return;
        };
        self.stop_deadlines.remove(process_id);
        self.ensure_sink(process_id, kind);
        self.output.push_line(process_id, &error.to_string());
        self.set_state(process_id, ProcessState::Failed);
        self.notice(
            NoticeLevel::Error,
            format!("process `{process_id}` failed: {error}"),
        );
    }

    fn finalize_removed_process(&mut self, process_id: &str) {
        let still_active = self
            .processes
            .get(process_id)
            .is_some_and(|process| !process.state.is_terminal());
        if still_active {
            self.set_state(process_id, ProcessState::Stopped);
        }
        self.processes.shift_remove(process_id);
        self.stop_deadlines.remove(process_id);
        let was_visible = self.output.visible() == Some(process_id);
        if self.output.detach(process_id).is_some() && was_visible {
            self.emit(ConsoleEvent::OutputVisibilityChanged { process_id: None });
        }
    }

    fn ensure_sink(&mut self, process_id: &str, kind: ProcessKind) {
        if self.output.is_attached(process_id) {
            return;
        }
        let sink = OutputSink::new(kind, &self.config);
        let _ = self.output.attach(process_id, sink);
    }

    fn show_output(&mut self, process_id: &str) {
        let changed = self.output.visible() != Some(process_id);
        if self.output.show(process_id) && changed {
            self.emit(ConsoleEvent::OutputVisibilityChanged {
                process_id: Some(process_id.to_owned()),
            });
        }
    }

    fn set_state(&mut self, process_id: &str, state: ProcessState) {
        let Some(process) = self.processes.get_mut(process_id) else {
            return;
        };
        if process.state == state {
            return;
        }
        process.state = state;
        self.emit(ConsoleEvent::ProcessStateChanged {
            process_id: process_id.to_owned(),
            state,
        });
    }

    fn drop_stale(&mut self, description: &str) {
        self.diagnostics.record_stale_event(description);
    }

    fn notice(&mut self, level: NoticeLevel, message: String) {
        self.emit(ConsoleEvent::Notice { level, message });
    }

    fn emit(&mut self, event: ConsoleEvent) {
        self.subscribers.emit(&event);
    }
}

#[cfg(test)]
#[path = "../tests/console_tests.rs"]
mod tests;
