//! Process ancestry reconstruction from captured exec events.

use std::collections::BTreeMap;

use serde::Serialize;

/// The fields triage pulls out of one exec event.
#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub pid: i64,
    pub ppid: Option<i64>,
    pub command: Option<String>,
    pub parent_command: Option<String>,
    pub responsible_command: Option<String>,
}

/// One process in the report's ancestry tree, keyed by pid.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessNode {
    pub command: String,
    pub parent_command: String,
    pub responsible_command: String,
    pub children: Vec<i64>,
}

/// Builds the pid-sorted ancestry tree. A pid seen more than once keeps its
/// first commands; parents referenced before their own exec get a placeholder
/// node so the child link is never lost.
pub fn build(records: &[ExecRecord]) -> BTreeMap<i64, ProcessNode> {
    let mut tree: BTreeMap<i64, ProcessNode> = BTreeMap::new();

    for record in records {
        let node = tree.entry(record.pid).or_default();
        if node.command.is_empty() {
            node.command = record.command.clone().unwrap_or_default();
            node.parent_command = record.parent_command.clone().unwrap_or_default();
            node.responsible_command = record.responsible_command.clone().unwrap_or_default();
        }

        if let Some(ppid) = record.ppid {
            if ppid != record.pid {
                let parent = tree.entry(ppid).or_default();
                if !parent.children.contains(&record.pid) {
                    parent.children.push(record.pid);
                }
            }
        }
    }

    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exec(pid: i64, ppid: i64, command: &str) -> ExecRecord {
        ExecRecord {
            pid,
            ppid: Some(ppid),
            command: Some(command.to_string()),
            parent_command: Some("/sbin/launchd".to_string()),
            responsible_command: Some(command.to_string()),
        }
    }

    #[test]
    fn test_children_attach_to_parent() {
        let tree = build(&[
            exec(100, 1, "/bin/zsh run.sh"),
            exec(101, 100, "/usr/bin/curl http://example.test"),
            exec(102, 100, "/usr/bin/unzip payload.zip"),
        ]);

        assert_eq!(tree[&100].children, vec![101, 102]);
        assert!(tree[&101].children.is_empty());
        // launchd shows up as a placeholder parent
        assert_eq!(tree[&1].command, "");
        assert_eq!(tree[&1].children, vec![100]);
    }

    #[test]
    fn test_re_exec_keeps_first_command_without_duplicate_links() {
        let tree = build(&[
            exec(200, 1, "/usr/bin/env sh"),
            exec(200, 1, "/bin/sh -c whoami"),
        ]);

        assert_eq!(tree[&200].command, "/usr/bin/env sh");
        assert_eq!(tree[&1].children, vec![200]);
    }

    #[test]
    fn test_tree_iterates_in_pid_order() {
        let tree = build(&[exec(300, 1, "c"), exec(42, 1, "a"), exec(150, 1, "b")]);
        let pids: Vec<i64> = tree.keys().copied().collect();
        assert_eq!(pids, vec![1, 42, 150, 300]);
    }

    #[test]
    fn test_self_parent_never_links() {
        let tree = build(&[exec(1, 1, "/sbin/launchd")]);
        assert!(tree[&1].children.is_empty());
    }
}
