use std::collections::HashMap;
#[cfg(unix)]
use std::io::ErrorKind;
use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::{setpgid, Pid};

use crate::backend::{
    BackendError, BackendEvent, ExecSpec, MachineBackend, MachineDescriptor, ProcessKind,
};
use crate::{MachineId, ProcessId};

pub const DEFAULT_GRACE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK_BYTES: usize = 8 * 1024;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(40);

struct LocalMachine {
    name: String,
    root: PathBuf,
}

struct ShellChild {
    machine_id: MachineId,
    child: Arc<Mutex<Child>>,
}

type ChildMap = Arc<Mutex<HashMap<ProcessId, ShellChild>>>;

/// Backend that treats each machine as a named local workspace directory and
/// runs processes under `sh -lc` inside it, each in its own process group.
/// Output chunks, exec acknowledgments, and exit reports are posted onto the
/// event channel handed in at construction.
pub struct ShellBackend {
    events_tx: Sender<BackendEvent>,
    grace_timeout: Duration,
    machines: IndexMap<MachineId, LocalMachine>,
    children: ChildMap,
    next_machine_ordinal: usize,
}

impl ShellBackend {
    pub fn new(events_tx: Sender<BackendEvent>) -> Self {
        Self::with_grace_timeout(events_tx, DEFAULT_GRACE_TIMEOUT)
    }

    pub fn with_grace_timeout(events_tx: Sender<BackendEvent>, grace_timeout: Duration) -> Self {
        Self {
            events_tx,
            grace_timeout,
            machines: IndexMap::new(),
            children: Arc::new(Mutex::new(HashMap::new())),
            next_machine_ordinal: 0,
        }
    }

    /// Registers a workspace directory as a machine without going through
    /// `start_machine`; the machine shows up in subsequent listings.
    pub fn register_machine(
        &mut self,
        name: &str,
        root: PathBuf,
    ) -> Result<MachineId, BackendError> {
        let root = validate_root(root)?;
        let machine_id = self.next_machine_id();
        self.machines.insert(
            machine_id.clone(),
            LocalMachine {
                name: name.to_owned(),
                root,
            },
        );
        Ok(machine_id)
    }

    fn next_machine_id(&mut self) -> MachineId {
        self.next_machine_ordinal += 1;
        format!("local-{}", self.next_machine_ordinal)
    }

    fn spawn_readers(&self, process_id: &str, child: &mut Child) -> Result<(), BackendError> {
        let stdout = child.stdout.take().ok_or_else(|| {
            BackendError::new(500, format!("process `{process_id}` missing stdout pipe"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            BackendError::new(500, format!("process `{process_id}` missing stderr pipe"))
        })?;
        for mut stream in [
            Box::new(stdout) as Box<dyn Read + Send>,
            Box::new(stderr) as Box<dyn Read + Send>,
        ] {
            let tx = self.events_tx.clone();
            let process_id = process_id.to_owned();
            thread::spawn(move || {
                let mut buffer = [0u8; READ_CHUNK_BYTES];
                loop {
                    match stream.read(&mut buffer) {
                        Ok(0) | Err(_) => break,
                        Ok(read) => {
                            let sent = tx.send(BackendEvent::Output {
                                process_id: process_id.clone(),
                                chunk: buffer[..read].to_vec(),
                            });
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        Ok(())
    }

    fn spawn_waiter(&self, process_id: &str, child: Arc<Mutex<Child>>) {
        let tx = self.events_tx.clone();
        let children = Arc::clone(&self.children);
        let process_id = process_id.to_owned();
        thread::spawn(move || loop {
            let status = child.lock().expect("child lock").try_wait();
            match status {
                Ok(Some(status)) => {
                    children
                        .lock()
                        .expect("child registry lock")
                        .remove(&process_id);
                    let _ = tx.send(BackendEvent::ProcessExited {
                        process_id: process_id.clone(),
                        diagnostic: format_exit_diagnostic(status),
                    });
                    break;
                }
                Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
                Err(err) => {
                    children
                        .lock()
                        .expect("child registry lock")
                        .remove(&process_id);
                    let _ = tx.send(BackendEvent::ProcessExited {
                        process_id: process_id.clone(),
                        diagnostic: format!("wait-error={err}"),
                    });
                    break;
                }
            }
        });
    }

    fn signal_then_escalate(&self, child: Arc<Mutex<Child>>) {
        {
            let mut child = child.lock().expect("child lock");
            #[cfg(unix)]
            {
                let _ = signal_process_group(&mut child, Signal::SIGTERM);
            }
            #[cfg(not(unix))]
            {
                let _ = child.kill();
            }
        }
        let grace_timeout = self.grace_timeout;
        thread::spawn(move || {
            thread::sleep(grace_timeout);
            let mut child = child.lock().expect("child lock");
            let still_running = child.try_wait().ok().flatten().is_none();
            if !still_running {
                return;
            }
            #[cfg(unix)]
            {
                let _ = signal_process_group(&mut child, Signal::SIGKILL);
            }
            #[cfg(not(unix))]
            {
                let _ = child.kill();
            }
        });
    }
}

impl MachineBackend for ShellBackend {
    fn list_machines(&self, _context_id: &str) -> Result<Vec<MachineDescriptor>, BackendError> {
        Ok(self
            .machines
            .iter()
            .map(|(machine_id, machine)| MachineDescriptor {
                id: machine_id.clone(),
                name: machine.name.clone(),
                dev_machine: false,
            })
            .collect())
    }

    fn start_machine(&mut self, context_id: &str) -> Result<(), BackendError> {
        let root = validate_root(PathBuf::from(context_id))?;
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        let machine_id = self.next_machine_id();
        self.machines.insert(
            machine_id.clone(),
            LocalMachine {
                name: name.clone(),
                root,
            },
        );
        let _ = self.events_tx.send(BackendEvent::MachineStarted {
            machine: MachineDescriptor {
                id: machine_id,
                name,
                dev_machine: false,
            },
        });
        Ok(())
    }

    fn stop_machine(&mut self, machine_id: &str) -> Result<(), BackendError> {
        if self.machines.shift_remove(machine_id).is_none() {
            return Err(BackendError::new(
                404,
                format!("unknown machine `{machine_id}`"),
            ));
        }
        let survivors = {
            let children = self.children.lock().expect("child registry lock");
            children
                .values()
                .filter(|entry| entry.machine_id == machine_id)
                .map(|entry| Arc::clone(&entry.child))
                .collect::<Vec<Arc<Mutex<Child>>>>()
        };
        for child in survivors {
            self.signal_then_escalate(child);
        }
        Ok(())
    }

    fn exec_process(
        &mut self,
        machine_id: &str,
        process_id: &str,
        kind: ProcessKind,
        spec: &ExecSpec,
    ) -> Result<(), BackendError> {
        let Some(machine) = self.machines.get(machine_id) else {
            return Err(BackendError::new(
                404,
                format!("unknown machine `{machine_id}`"),
            ));
        };
        if self
            .children
            .lock()
            .expect("child registry lock")
            .contains_key(process_id)
        {
            return Err(BackendError::new(
                409,
                format!("process id `{process_id}` already in use"),
            ));
        }
        let cwd = spec.cwd.clone().unwrap_or_else(|| machine.root.clone());
        let mut command = match kind {
            ProcessKind::Terminal => terminal_command(&spec.command, &cwd),
            ProcessKind::Command => shell_command(&spec.command, &cwd),
        };
        let mut child = command.spawn().map_err(|error| {
            BackendError::new(500, format!("failed to spawn `{}`: {error}", spec.command))
        })?;
        self.spawn_readers(process_id, &mut child)?;
        let child = Arc::new(Mutex::new(child));
        self.children.lock().expect("child registry lock").insert(
            process_id.to_owned(),
            ShellChild {
                machine_id: machine_id.to_owned(),
                child: Arc::clone(&child),
            },
        );
        self.spawn_waiter(process_id, child);
        let _ = self.events_tx.send(BackendEvent::ExecStarted {
            process_id: process_id.to_owned(),
        });
        Ok(())
    }

    fn stop_process(&mut self, process_id: &str) -> Result<(), BackendError> {
        let child = {
            let children = self.children.lock().expect("child registry lock");
            children
                .get(process_id)
                .map(|entry| Arc::clone(&entry.child))
        };
        let Some(child) = child else {
            return Err(BackendError::new(
                404,
                format!("unknown process `{process_id}`"),
            ));
        };
        self.signal_then_escalate(child);
        Ok(())
    }
}

fn validate_root(root: PathBuf) -> Result<PathBuf, BackendError> {
    if !root.is_dir() {
        return Err(BackendError::new(
            400,
            format!("workspace root `{}` is not a directory", root.display()),
        ));
    }
    Ok(root)
}

fn shell_command(run: &str, cwd: &Path) -> ProcessCommand {
    let mut command = ProcessCommand::new("sh");
    command
        .arg("-lc")
        .arg(run)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    apply_process_group(&mut command);
    command
}

// Terminals want a pty; `script` provides one where available, otherwise the
// plain shell pipeline still captures everything line-buffered.
fn terminal_command(run: &str, cwd: &Path) -> ProcessCommand {
    #[cfg(target_os = "macos")]
    {
        let mut command = ProcessCommand::new("script");
        command
            .arg("-q")
            .arg("/dev/null")
            .arg("sh")
            .arg("-lc")
            .arg(run)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        apply_process_group(&mut command);
        return command;
    }

    #[allow(unreachable_code)]
    shell_command(run, cwd)
}

fn apply_process_group(command: &mut ProcessCommand) {
    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(|error| std::io::Error::new(ErrorKind::Other, error.to_string()))
        });
    }
    #[cfg(not(unix))]
    {
        let _ = command;
    }
}

fn format_exit_diagnostic(status: std::process::ExitStatus) -> String {
    #[cfg(unix)]
    {
        if let Some(code) = status.code() {
            return format!("exit={code}");
        }
        if let Some(signal) = status.signal() {
            return format!("signal={signal}");
        }
        "exit=unknown".to_owned()
    }
    #[cfg(not(unix))]
    {
        format!("exit={}", status.code().unwrap_or(-1))
    }
}

#[cfg(unix)]
fn signal_process_group(child: &mut Child, signal: Signal) -> Result<(), nix::Error> {
    let pid = child.id() as i32;
    if pid > 0 {
        kill(Pid::from_raw(-pid), signal)
    } else {
        Ok(())
    }
}
