use indexmap::IndexMap;

use crate::backend::MachineDescriptor;
use crate::MachineId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl MachineStatus {
    pub fn label(self) -> &'static str {
        match self {
            MachineStatus::Starting => "starting",
            MachineStatus::Running => "running",
            MachineStatus::Stopped => "stopped",
            MachineStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub name: String,
    pub dev_machine: bool,
    pub status: MachineStatus,
}

impl Machine {
    pub fn from_descriptor(descriptor: &MachineDescriptor, status: MachineStatus) -> Self {
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            dev_machine: descriptor.dev_machine,
            status,
        }
    }
}

#[derive(Debug)]
pub enum RegistryError {
    MachineNotFound { machine_id: MachineId },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::MachineNotFound { machine_id } => {
                write!(f, "unknown machine `{machine_id}`")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// In-memory machine store. Insertion order is preserved for `list`, and at
/// most one machine carries the dev-machine flag; reassignment clears the
/// old holder in the same mutation.
#[derive(Default)]
pub struct MachineRegistry {
    machines: IndexMap<MachineId, Machine>,
    dev_machine_id: Option<MachineId>,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, mut machine: Machine) {
        if machine.dev_machine {
            self.clear_dev_flag();
            self.dev_machine_id = Some(machine.id.clone());
        } else if self.dev_machine_id.as_deref() == Some(machine.id.as_str()) {
            machine.dev_machine = true;
        }
        self.machines.insert(machine.id.clone(), machine);
    }

    pub fn set_dev_machine(&mut self, machine_id: &str) -> Result<(), RegistryError> {
        if !self.machines.contains_key(machine_id) {
            return Err(RegistryError::MachineNotFound {
                machine_id: machine_id.to_owned(),
            });
        }
        self.clear_dev_flag();
        if let Some(machine) = self.machines.get_mut(machine_id) {
            machine.dev_machine = true;
        }
        self.dev_machine_id = Some(machine_id.to_owned());
        Ok(())
    }

    pub fn clear_dev_machine(&mut self) -> Option<MachineId> {
        self.clear_dev_flag();
        self.dev_machine_id.take()
    }

    pub fn dev_machine(&self) -> Option<&Machine> {
        self.dev_machine_id
            .as_deref()
            .and_then(|machine_id| self.machines.get(machine_id))
    }

    pub fn get(&self, machine_id: &str) -> Result<&Machine, RegistryError> {
        self.machines
            .get(machine_id)
            .ok_or_else(|| RegistryError::MachineNotFound {
                machine_id: machine_id.to_owned(),
            })
    }

    pub fn contains(&self, machine_id: &str) -> bool {
        self.machines.contains_key(machine_id)
    }

    pub fn set_status(&mut self, machine_id: &str, status: MachineStatus) -> Result<(), RegistryError> {
        let Some(machine) = self.machines.get_mut(machine_id) else {
            return Err(RegistryError::MachineNotFound {
                machine_id: machine_id.to_owned(),
            });
        };
        machine.status = status;
        Ok(())
    }

    pub fn list(&self) -> Vec<&Machine> {
        self.machines.values().collect()
    }

    pub fn ids(&self) -> Vec<MachineId> {
        self.machines.keys().cloned().collect()
    }

    pub fn remove(&mut self, machine_id: &str) -> Option<Machine> {
        let removed = self.machines.shift_remove(machine_id);
        if removed.is_some() && self.dev_machine_id.as_deref() == Some(machine_id) {
            self.dev_machine_id = None;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.machines.clear();
        self.dev_machine_id = None;
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    fn clear_dev_flag(&mut self) {
        if let Some(previous) = self.dev_machine_id.as_deref() {
            if let Some(machine) = self.machines.get_mut(previous) {
                machine.dev_machine = false;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
