//! Canonical signature derivation.
//!
//! A signature is the comma-joined sequence of an event's kind, the emitting
//! process path, and the kind's stable fields. Two detonations of the same
//! benign workload produce identical signatures even though pids, inodes, and
//! timestamps differ, which is what makes goodlist matching possible.

use std::fmt::Display;

use super::payload::{EventPayload, FileRef};
use super::CapturedEvent;

/// Why a signature could not be derived. The event itself is still stored;
/// only the dedup key is lost.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("event is missing required field: {0}")]
    Missing(&'static str),
}

fn opt<T: Display>(value: Option<&T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".to_string(),
    }
}

fn opt_path(file: Option<&FileRef>) -> String {
    match file {
        Some(f) => f.path.clone(),
        None => "None".to_string(),
    }
}

fn enrichment<'a>(
    value: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, SignatureError> {
    value.as_deref().ok_or(SignatureError::Missing(name))
}

pub(super) fn build(event: &CapturedEvent) -> Result<String, SignatureError> {
    let process_path = event
        .process_path()
        .ok_or(SignatureError::Missing("process_path"))?;
    let mut parts: Vec<String> = vec![event.kind().to_string(), process_path.to_string()];

    match &event.event {
        EventPayload::Access(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.mode.to_string());
        }
        EventPayload::Authentication(e) => {
            parts.push(e.data.od.instigator.executable.path.clone());
            parts.push(e.success.to_string());
            parts.push(e.auth_type.to_string());
            parts.push(e.data.od.node_name.to_string());
            parts.push(e.data.od.record_type.to_string());
            parts.push(e.data.od.record_name.to_string());
            parts.push(e.data.od.db_path.to_string());
        }
        EventPayload::Chdir(e)
        | EventPayload::Dup(e)
        | EventPayload::Fsgetpath(e)
        | EventPayload::Getattrlist(e)
        | EventPayload::Listextattr(e)
        | EventPayload::Readdir(e)
        | EventPayload::Searchfs(e)
        | EventPayload::Stat(e)
        | EventPayload::Truncate(e)
        | EventPayload::Utimes(e)
        | EventPayload::Write(e) => {
            parts.push(e.target.path.clone());
        }
        EventPayload::Clone(e) => {
            // A clone without a destination still signs on source and name.
            parts.push(e.source.path.clone());
            parts.push(opt_path(e.destination()));
            parts.push(e.target_name.clone());
        }
        EventPayload::Close(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.modified.to_string());
            parts.push(opt(e.was_mapped_writable.as_ref()));
        }
        EventPayload::Create(e) => {
            parts.push(e.destination.existing_file.path.clone());
            parts.push(opt(e.acl.as_ref()));
        }
        EventPayload::Exec(e) => {
            parts.push(enrichment(&event.parent_command, "parent_command")?.to_string());
            parts.push(enrichment(&event.responsible_command, "responsible_command")?.to_string());
            parts.push(enrichment(&event.command, "command")?.to_string());
            parts.push(opt_path(e.script.as_ref()));
        }
        EventPayload::Exit(e) => {
            parts.push(e.stat.to_string());
        }
        EventPayload::Extattr(e) => {
            parts.push(e.target.path.clone());
            parts.push(opt(e.flags.as_ref()));
        }
        EventPayload::Fcntl(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.cmd.to_string());
        }
        EventPayload::Fork(e) => {
            parts.push(e.child.executable.path.clone());
        }
        EventPayload::GetTask(e) | EventPayload::GetTaskName(e) | EventPayload::GetTaskRead(e) => {
            parts.push(e.target.executable.path.clone());
            parts.push(e.task_type.to_string());
        }
        EventPayload::Getextattr(e) | EventPayload::Setextattr(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.extattr.to_string());
        }
        EventPayload::IokitOpen(e) => {
            parts.push(e.user_client_class.clone());
            parts.push(e.user_client_type.to_string());
        }
        EventPayload::Lookup(e) => {
            parts.push(e.source_dir.path.clone());
            parts.push(e.relative_target.clone());
        }
        EventPayload::Mmap(e) => {
            parts.push(e.source.path.clone());
            parts.push(e.flags.to_string());
            parts.push(e.protection.to_string());
            parts.push(e.max_protection.to_string());
        }
        EventPayload::Mount(e) | EventPayload::Unmount(e) => {
            parts.push(e.stat_fs.f_mntfromname.clone());
            parts.push(e.stat_fs.f_mntonname.clone());
        }
        EventPayload::Mprotect(e) => {
            parts.push(e.protection.to_string());
        }
        EventPayload::Open(e) => {
            parts.push(e.file.path.clone());
            parts.push(e.fflag.to_string());
        }
        EventPayload::ProcCheck(e) => {
            if let Some(target) = &e.target {
                parts.push(target.executable.path.clone());
            }
            parts.push(e.check_type.to_string());
            parts.push(e.flavor.to_string());
        }
        EventPayload::ProcSuspendResume(e) => {
            parts.push(e.target.executable.path.clone());
        }
        EventPayload::Readlink(e) => {
            parts.push(e.source.path.clone());
        }
        EventPayload::Rename(e) => {
            parts.push(e.source.path.clone());
            match (&e.new_path, &e.existing_file) {
                (Some(new_path), _) => {
                    parts.push(new_path.dir.path.clone());
                    parts.push(new_path.filename.clone());
                }
                (None, Some(existing)) => {
                    parts.push(existing.path.clone());
                }
                (None, None) => return Err(SignatureError::Missing("rename destination")),
            }
            parts.push(e.destination_type.clone());
        }
        EventPayload::Setattrlist(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.attrlist.bitmapcount.to_string());
            parts.push(e.attrlist.commonattr.to_string());
            parts.push(e.attrlist.dirattr.to_string());
            parts.push(e.attrlist.fileattr.to_string());
            parts.push(e.attrlist.forkattr.to_string());
        }
        EventPayload::Setegid(e) => {
            parts.push(e.egid.to_string());
        }
        EventPayload::Seteuid(e) => {
            parts.push(e.euid.to_string());
        }
        EventPayload::Setflags(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.flags.to_string());
        }
        EventPayload::Setgid(e) => {
            parts.push(e.gid.to_string());
        }
        EventPayload::Setmode(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.mode.to_string());
        }
        EventPayload::Setowner(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.uid.to_string());
            parts.push(e.gid.to_string());
        }
        EventPayload::Setuid(e) => {
            parts.push(e.uid.to_string());
        }
        EventPayload::Signal(e) => {
            parts.push(e.sig.to_string());
            parts.push(e.target.executable.path.clone());
        }
        EventPayload::UipcBind(e) => {
            parts.push(e.dir.path.clone());
            parts.push(e.filename.clone());
            parts.push(e.mode.to_string());
        }
        EventPayload::UipcConnect(e) => {
            parts.push(e.file.path.clone());
            parts.push(e.domain.to_string());
            parts.push(e.protocol.to_string());
            parts.push(e.socket_type.to_string());
        }
        EventPayload::Unlink(e) => {
            parts.push(e.target.path.clone());
            parts.push(e.parent_dir.path.clone());
        }
    }

    Ok(parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::super::CapturedEvent;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> CapturedEvent {
        serde_json::from_str(json).expect("event should deserialize")
    }

    #[test]
    fn test_open_signature_ignores_volatile_fields() {
        let first = parse(
            r#"{
                "mach_time": 181634171842,
                "pid": 311,
                "process_path": "/usr/libexec/trustd",
                "process": {"executable": {"path": "/usr/libexec/trustd"}, "audit_token": {"pid": 311}},
                "event": {"open": {"file": {"path": "/Library/Keychains/System.keychain"}, "fflag": 1}}
            }"#,
        );
        let second = parse(
            r#"{
                "mach_time": 999999999999,
                "pid": 4207,
                "process_path": "/usr/libexec/trustd",
                "process": {"executable": {"path": "/usr/libexec/trustd"}, "audit_token": {"pid": 4207}},
                "event": {"open": {"file": {"path": "/Library/Keychains/System.keychain"}, "fflag": 1}}
            }"#,
        );

        let sig = first.signature().unwrap();
        assert_eq!(sig, second.signature().unwrap());
        assert_eq!(
            sig,
            "open,/usr/libexec/trustd,/Library/Keychains/System.keychain,1"
        );
    }

    #[test]
    fn test_exec_signature_uses_command_enrichment() {
        let event = parse(
            r#"{
                "process_path": "/bin/zsh",
                "parent_command": "/sbin/launchd",
                "responsible_command": "/bin/zsh",
                "command": "/usr/bin/curl http://example.test/payload",
                "event": {"exec": {"script": null}}
            }"#,
        );
        assert_eq!(
            event.signature().unwrap(),
            "exec,/bin/zsh,/sbin/launchd,/bin/zsh,/usr/bin/curl http://example.test/payload,None"
        );
    }

    #[test]
    fn test_exec_signature_requires_enrichment() {
        let event = parse(
            r#"{
                "process_path": "/bin/zsh",
                "event": {"exec": {"script": {"path": "/tmp/run.sh"}}}
            }"#,
        );
        let err = event.signature().unwrap_err();
        assert!(err.to_string().contains("parent_command"));
    }

    #[test]
    fn test_close_signature_renders_absent_option_as_none() {
        let event = parse(
            r#"{
                "process_path": "/usr/bin/tar",
                "event": {"close": {"target": {"path": "/tmp/out.txt", "stat": {"st_size": 42}}, "modified": true}}
            }"#,
        );
        assert_eq!(
            event.signature().unwrap(),
            "close,/usr/bin/tar,/tmp/out.txt,true,None"
        );
    }

    #[test]
    fn test_rename_signature_both_destination_forms() {
        let to_new_path = parse(
            r#"{
                "process_path": "/usr/bin/mv",
                "event": {"rename": {
                    "source": {"path": "/tmp/a"},
                    "new_path": {"dir": {"path": "/tmp"}, "filename": "b"},
                    "destination_type": "new_path"
                }}
            }"#,
        );
        assert_eq!(
            to_new_path.signature().unwrap(),
            "rename,/usr/bin/mv,/tmp/a,/tmp,b,new_path"
        );

        let to_existing = parse(
            r#"{
                "process_path": "/usr/bin/mv",
                "event": {"rename": {
                    "source": {"path": "/tmp/a"},
                    "existing_file": {"path": "/tmp/b"},
                    "destination_type": "existing_file"
                }}
            }"#,
        );
        assert_eq!(
            to_existing.signature().unwrap(),
            "rename,/usr/bin/mv,/tmp/a,/tmp/b,existing_file"
        );
    }

    #[test]
    fn test_proc_check_signature_with_null_target() {
        let event = parse(
            r#"{
                "process_path": "/usr/sbin/cfprefsd",
                "event": {"proc_check": {"target": null, "type": 2, "flavor": 68}}
            }"#,
        );
        assert_eq!(
            event.signature().unwrap(),
            "proc_check,/usr/sbin/cfprefsd,2,68"
        );
    }

    #[test]
    fn test_missing_process_path_is_an_error() {
        let event = parse(r#"{"event": {"mprotect": {"protection": 3}}}"#);
        assert!(matches!(
            event.signature(),
            Err(super::SignatureError::Missing("process_path"))
        ));
    }

    #[test]
    fn test_unknown_kind_fails_deserialization() {
        let result: Result<CapturedEvent, _> = serde_json::from_str(
            r#"{"process_path": "/bin/ls", "event": {"frobnicate": {"target": {"path": "/"}}}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_signature_survives_bson_round_trip() {
        let event = parse(
            r#"{
                "process_path": "/usr/libexec/xpcproxy",
                "event": {"signal": {"sig": 9, "target": {"executable": {"path": "/usr/bin/yes"}}}}
            }"#,
        );
        let doc = bson::to_document(&event).unwrap();
        let back: CapturedEvent = bson::from_document(doc).unwrap();
        assert_eq!(event.signature().unwrap(), back.signature().unwrap());
        assert_eq!(
            back.signature().unwrap(),
            "signal,/usr/libexec/xpcproxy,9,/usr/bin/yes"
        );
    }
}
