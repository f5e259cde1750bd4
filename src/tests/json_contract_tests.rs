use serde_json::{json, Value};

use super::{ExecSpec, MachineDescriptor, ProcessKind};
use crate::machine::{Machine, MachineStatus};

#[test]
fn machine_descriptor_shape_is_stable() {
    let descriptor = MachineDescriptor {
        id: "m1".to_owned(),
        name: "dev m1".to_owned(),
        dev_machine: true,
    };
    let value = serde_json::to_value(&descriptor).expect("serialize");
    assert_eq!(
        value,
        json!({
            "id": "m1",
            "name": "dev m1",
            "dev_machine": true,
        })
    );
}

#[test]
fn machine_descriptor_dev_flag_defaults_to_false() {
    let descriptor =
        serde_json::from_value::<MachineDescriptor>(json!({ "id": "m1", "name": "dev m1" }))
            .expect("deserialize");
    assert!(!descriptor.dev_machine);
}

#[test]
fn exec_spec_omits_cwd_until_set() {
    let spec = ExecSpec::shell("cargo build");
    let value = serde_json::to_value(&spec).expect("serialize");
    assert_eq!(value["command"], Value::from("cargo build"));
    assert_eq!(value["cwd"], Value::Null);

    let parsed =
        serde_json::from_value::<ExecSpec>(json!({ "command": "ls" })).expect("deserialize");
    assert!(parsed.cwd.is_none());
}

#[test]
fn process_kind_serializes_as_its_label() {
    for kind in [ProcessKind::Command, ProcessKind::Terminal] {
        assert_eq!(
            serde_json::to_value(kind).expect("serialize"),
            Value::from(kind.label())
        );
    }
    assert_eq!(
        serde_json::from_value::<ProcessKind>(Value::from("terminal")).expect("deserialize"),
        ProcessKind::Terminal
    );
}

#[test]
fn machine_status_serializes_as_its_label() {
    let machine = Machine {
        id: "m1".to_owned(),
        name: "dev m1".to_owned(),
        dev_machine: false,
        status: MachineStatus::Starting,
    };
    let value = serde_json::to_value(&machine).expect("serialize");
    assert_eq!(value["status"], Value::from(MachineStatus::Starting.label()));
}
