//! Path and diff helpers for common translation scenarios

use fwd_translate::DataTreeDiff;
use fwd_types::SchemaPath;
use serde_json::{json, Value};

/// Parse a textual path, panicking on malformed input
pub fn path(s: &str) -> SchemaPath {
    match s.parse() {
        Ok(path) => path,
        Err(e) => panic!("bad test path {s:?}: {e}"),
    }
}

/// Parse several textual paths
pub fn paths(items: &[&str]) -> Vec<SchemaPath> {
    items.iter().map(|s| path(s)).collect()
}

/// Diff creating every given node
pub fn creates(nodes: &[(&str, Value)]) -> DataTreeDiff {
    nodes
        .iter()
        .fold(DataTreeDiff::default(), |diff, (p, v)| diff.create(path(p), v.clone()))
}

/// Diff deleting every given node
pub fn deletes(nodes: &[(&str, Value)]) -> DataTreeDiff {
    nodes
        .iter()
        .fold(DataTreeDiff::default(), |diff, (p, v)| diff.delete(path(p), v.clone()))
}

/// Interface and sub-interface scenario fixtures
pub mod interface_fixtures {
    use super::*;

    /// Interface node value
    pub fn interface(name: &str, mtu: u32) -> Value {
        json!({"name": name, "mtu": mtu, "enabled": true})
    }

    /// Sub-interface node value
    pub fn sub_interface(index: u32, vlan: u16) -> Value {
        json!({"index": index, "vlan-id": vlan})
    }

    /// Address node value
    pub fn address(ip: &str, prefix_length: u8) -> Value {
        json!({"ip": ip, "prefix-length": prefix_length})
    }

    /// Creates `/if[<name>]` together with `/if[<name>]/sub-if[<index>]`
    pub fn interface_with_sub_interface(name: &str, index: u32) -> DataTreeDiff {
        DataTreeDiff::default()
            .create(path(&format!("/if[{name}]")), interface(name, 1500))
            .create(
                path(&format!("/if[{name}]/sub-if[{index}]")),
                sub_interface(index, 100),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwd_translate::ChangeKind;

    #[test]
    fn test_creates_builds_changes() {
        let diff = creates(&[("/a", json!(1)), ("/b", json!(2))]);
        assert_eq!(diff.changes().len(), 2);
        assert!(diff.changes().iter().all(|c| c.kind == ChangeKind::Create));
        assert_eq!(diff.after(&path("/b")), Some(&json!(2)));
    }

    #[test]
    fn test_interface_fixture() {
        let diff = interface_fixtures::interface_with_sub_interface("eth0", 100);
        assert!(diff.after(&path("/if[eth0]/sub-if[100]")).is_some());
    }
}
