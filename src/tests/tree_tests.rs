use super::{NodeKind, ProcessNode, ProcessTree, TreeError};

fn tree_with_machine(machine_id: &str) -> ProcessTree {
    let mut tree = ProcessTree::new();
    tree.add_node(ProcessNode::machine(machine_id, format!("dev {machine_id}")))
        .expect("add machine");
    tree
}

#[test]
fn duplicate_id_is_rejected_and_tree_unchanged() {
    let mut tree = tree_with_machine("m1");
    tree.add_node(ProcessNode::process("p1", NodeKind::Command, "m1", "build"))
        .expect("add p1");

    let before = tree
        .flattened()
        .iter()
        .map(|node| node.id.clone())
        .collect::<Vec<String>>();
    let error = tree
        .add_node(ProcessNode::process("p1", NodeKind::Terminal, "m1", "again"))
        .expect_err("duplicate id");
    assert!(matches!(error, TreeError::DuplicateId { node_id } if node_id == "p1"));

    let after = tree
        .flattened()
        .iter()
        .map(|node| node.id.clone())
        .collect::<Vec<String>>();
    assert_eq!(before, after);
    assert_eq!(tree.find_by_id("p1").expect("p1").kind, NodeKind::Command);
}

#[test]
fn process_node_requires_existing_machine_parent() {
    let mut tree = tree_with_machine("m1");

    let error = tree
        .add_node(ProcessNode::process("p1", NodeKind::Command, "ghost", "build"))
        .expect_err("missing parent");
    assert!(matches!(error, TreeError::OrphanNode { .. }));

    tree.add_node(ProcessNode::process("p1", NodeKind::Command, "m1", "build"))
        .expect("add p1");
    let error = tree
        .add_node(ProcessNode::process("p2", NodeKind::Terminal, "p1", "term"))
        .expect_err("parent is not a machine node");
    assert!(matches!(error, TreeError::OrphanNode { .. }));

    let error = tree
        .add_node(ProcessNode {
            id: "p3".to_owned(),
            kind: NodeKind::Command,
            parent_id: None,
            display_name: "loose".to_owned(),
        })
        .expect_err("missing parent id");
    assert!(matches!(error, TreeError::OrphanNode { parent_id: None, .. }));
}

#[test]
fn machine_node_must_not_have_a_parent() {
    let mut tree = tree_with_machine("m1");
    let error = tree
        .add_node(ProcessNode {
            id: "m2".to_owned(),
            kind: NodeKind::Machine,
            parent_id: Some("m1".to_owned()),
            display_name: "nested".to_owned(),
        })
        .expect_err("machine with parent");
    assert!(matches!(error, TreeError::UnexpectedParent { node_id } if node_id == "m2"));
}

#[test]
fn flattened_order_is_depth_first_in_insertion_order() {
    let mut tree = ProcessTree::new();
    tree.add_node(ProcessNode::machine("m1", "dev m1")).expect("m1");
    tree.add_node(ProcessNode::machine("m2", "dev m2")).expect("m2");
    tree.add_node(ProcessNode::process("p1", NodeKind::Command, "m1", "build"))
        .expect("p1");
    tree.add_node(ProcessNode::process("p2", NodeKind::Terminal, "m2", "term"))
        .expect("p2");
    tree.add_node(ProcessNode::process("p3", NodeKind::Terminal, "m1", "term"))
        .expect("p3");

    let ids = tree
        .flattened()
        .iter()
        .map(|node| node.id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(ids, vec!["m1", "p1", "p3", "m2", "p2"]);

    assert_eq!(tree.index_of("p3"), Some(2));
    assert_eq!(tree.index_of("m2"), Some(3));
    assert_eq!(tree.index_of("ghost"), None);
    assert_eq!(tree.find_by_index(1).expect("index 1").id, "p1");

    let error = tree.find_by_index(5).expect_err("past the end");
    assert!(matches!(error, TreeError::IndexOutOfRange { index: 5, len: 5 }));
}

#[test]
fn removing_a_machine_cascades_children_in_index_order() {
    let mut tree = ProcessTree::new();
    tree.add_node(ProcessNode::machine("m1", "dev m1")).expect("m1");
    tree.add_node(ProcessNode::machine("m2", "dev m2")).expect("m2");
    tree.add_node(ProcessNode::process("p1", NodeKind::Command, "m1", "build"))
        .expect("p1");
    tree.add_node(ProcessNode::process("p2", NodeKind::Terminal, "m1", "term"))
        .expect("p2");
    tree.add_node(ProcessNode::process("p3", NodeKind::Command, "m2", "lint"))
        .expect("p3");

    let removed = tree.remove_node("m1").expect("remove m1");
    assert_eq!(removed.node.id, "m1");
    let removed_ids = removed
        .removed_children
        .iter()
        .map(|node| node.id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(removed_ids, vec!["p1", "p2"]);

    assert!(!tree.contains("m1"));
    assert!(!tree.contains("p1"));
    assert!(!tree.contains("p2"));
    let ids = tree
        .flattened()
        .iter()
        .map(|node| node.id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(ids, vec!["m2", "p3"]);
}

#[test]
fn removing_a_process_node_leaves_siblings_alone() {
    let mut tree = tree_with_machine("m1");
    tree.add_node(ProcessNode::process("p1", NodeKind::Command, "m1", "build"))
        .expect("p1");
    tree.add_node(ProcessNode::process("p2", NodeKind::Command, "m1", "lint"))
        .expect("p2");

    let removed = tree.remove_node("p1").expect("remove p1");
    assert!(removed.removed_children.is_empty());
    assert!(tree.contains("p2"));
    assert_eq!(tree.len(), 2);
}

#[test]
fn remove_unknown_node_is_rejected() {
    let mut tree = tree_with_machine("m1");
    let error = tree.remove_node("ghost").expect_err("unknown node");
    assert!(matches!(error, TreeError::NotFound { node_id } if node_id == "ghost"));
}

#[test]
fn selection_tracks_one_node_and_drops_with_it() {
    let mut tree = tree_with_machine("m1");
    tree.add_node(ProcessNode::process("p1", NodeKind::Command, "m1", "build"))
        .expect("p1");

    assert!(!tree.select("ghost"));
    assert!(tree.selected().is_none());

    assert!(tree.select("p1"));
    assert_eq!(tree.selected(), Some("p1"));

    tree.remove_node("p1").expect("remove p1");
    assert!(tree.selected().is_none());
}

#[test]
fn selection_survives_unrelated_removal() {
    let mut tree = tree_with_machine("m1");
    tree.add_node(ProcessNode::process("p1", NodeKind::Command, "m1", "build"))
        .expect("p1");
    tree.add_node(ProcessNode::process("p2", NodeKind::Command, "m1", "lint"))
        .expect("p2");

    assert!(tree.select("p2"));
    tree.remove_node("p1").expect("remove p1");
    assert_eq!(tree.selected(), Some("p2"));
}

#[test]
fn children_of_reports_only_direct_children() {
    let mut tree = ProcessTree::new();
    tree.add_node(ProcessNode::machine("m1", "dev m1")).expect("m1");
    tree.add_node(ProcessNode::machine("m2", "dev m2")).expect("m2");
    tree.add_node(ProcessNode::process("p1", NodeKind::Command, "m1", "build"))
        .expect("p1");
    tree.add_node(ProcessNode::process("p2", NodeKind::Command, "m2", "lint"))
        .expect("p2");

    let children = tree
        .children_of("m1")
        .iter()
        .map(|node| node.id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(children, vec!["p1"]);
}
