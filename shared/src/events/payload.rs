//! Kind-variant event payloads.
//!
//! One struct per event kind, holding exactly the fields that are
//! semantically stable for that kind. The enum is externally tagged so the
//! wire shape `{"event": {"open": {...}}}` resolves the variant directly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar that different logger versions emit as a number, bool, or string.
/// Rendered without quoting either way so signatures stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Bool(v) => write!(f, "{}", v),
            Field::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    #[serde(default)]
    pub st_size: i64,
}

/// A file operand. `stat` is only populated on kinds that carry one, such as
/// close targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<FileStat>,
}

impl FileRef {
    pub fn size(&self) -> i64 {
        self.stat.as_ref().map(|s| s.st_size).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFile {
    pub target: FileRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub source: FileRef,
}

/// A process operand, as nested under task and signal targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcRef {
    pub executable: FileRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    pub target: FileRef,
    pub mode: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdAuthData {
    pub instigator: ProcRef,
    pub node_name: Field,
    pub record_type: Field,
    pub record_name: Field,
    pub db_path: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationData {
    pub od: OdAuthData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationEvent {
    pub success: bool,
    #[serde(rename = "type")]
    pub auth_type: Field,
    pub data: AuthenticationData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneEvent {
    pub source: FileRef,
    #[serde(default)]
    pub target: Option<FileRef>,
    #[serde(default)]
    pub target_dir: Option<FileRef>,
    pub target_name: String,
}

impl CloneEvent {
    /// Whichever destination form the logger emitted, if any.
    pub fn destination(&self) -> Option<&FileRef> {
        self.target.as_ref().or(self.target_dir.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseEvent {
    pub target: FileRef,
    pub modified: bool,
    #[serde(default)]
    pub was_mapped_writable: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDestination {
    pub existing_file: FileRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEvent {
    pub destination: CreateDestination,
    #[serde(default)]
    pub acl: Option<Field>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecEvent {
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub script: Option<FileRef>,
}

impl ExecEvent {
    /// The replacement image's full command line, when the logger carried it.
    pub fn command_line(&self) -> Option<String> {
        self.args.as_ref().map(|args| args.join(" "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitEvent {
    pub stat: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtattrEvent {
    pub target: FileRef,
    #[serde(default)]
    pub flags: Option<Field>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcntlEvent {
    pub target: FileRef,
    pub cmd: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkEvent {
    pub child: ProcRef,
}

/// Shared by get_task, get_task_name, and get_task_read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub target: ProcRef,
    #[serde(rename = "type")]
    pub task_type: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedExtattrEvent {
    pub target: FileRef,
    pub extattr: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IokitOpenEvent {
    pub user_client_class: String,
    pub user_client_type: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupEvent {
    pub source_dir: FileRef,
    pub relative_target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmapEvent {
    pub source: FileRef,
    pub flags: Field,
    pub protection: Field,
    pub max_protection: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatFs {
    pub f_mntfromname: String,
    pub f_mntonname: String,
}

/// Shared by mount and unmount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountEvent {
    #[serde(alias = "statfs")]
    pub stat_fs: StatFs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MprotectEvent {
    pub protection: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenEvent {
    pub file: FileRef,
    pub fflag: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcCheckEvent {
    /// Null for checks against the kernel rather than a process
    #[serde(default)]
    pub target: Option<ProcRef>,
    #[serde(rename = "type")]
    pub check_type: Field,
    pub flavor: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcSuspendResumeEvent {
    pub target: ProcRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPath {
    pub dir: FileRef,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameEvent {
    pub source: FileRef,
    #[serde(default)]
    pub new_path: Option<NewPath>,
    #[serde(default)]
    pub existing_file: Option<FileRef>,
    pub destination_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attrlist {
    pub bitmapcount: Field,
    pub commonattr: Field,
    pub dirattr: Field,
    pub fileattr: Field,
    pub forkattr: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetattrlistEvent {
    pub target: FileRef,
    pub attrlist: Attrlist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetegidEvent {
    pub egid: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeteuidEvent {
    pub euid: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetflagsEvent {
    pub target: FileRef,
    pub flags: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetgidEvent {
    pub gid: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetmodeEvent {
    pub target: FileRef,
    pub mode: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetownerEvent {
    pub target: FileRef,
    pub uid: Field,
    pub gid: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetuidEvent {
    pub uid: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub sig: Field,
    pub target: ProcRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UipcBindEvent {
    pub dir: FileRef,
    pub filename: String,
    pub mode: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UipcConnectEvent {
    pub file: FileRef,
    pub domain: Field,
    pub protocol: Field,
    #[serde(rename = "type")]
    pub socket_type: Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkEvent {
    pub target: FileRef,
    pub parent_dir: FileRef,
}

/// Every event kind the capture pipeline understands. Unknown kinds fail
/// deserialization and are handled as canonicalization failures upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    Access(AccessEvent),
    Authentication(AuthenticationEvent),
    Chdir(TargetFile),
    Clone(CloneEvent),
    Close(CloseEvent),
    Create(CreateEvent),
    Dup(TargetFile),
    Exec(ExecEvent),
    Exit(ExitEvent),
    Extattr(ExtattrEvent),
    Fcntl(FcntlEvent),
    Fork(ForkEvent),
    Fsgetpath(TargetFile),
    GetTask(TaskEvent),
    GetTaskName(TaskEvent),
    GetTaskRead(TaskEvent),
    Getattrlist(TargetFile),
    Getextattr(NamedExtattrEvent),
    IokitOpen(IokitOpenEvent),
    Listextattr(TargetFile),
    Lookup(LookupEvent),
    Mmap(MmapEvent),
    Mount(MountEvent),
    Mprotect(MprotectEvent),
    Open(OpenEvent),
    ProcCheck(ProcCheckEvent),
    ProcSuspendResume(ProcSuspendResumeEvent),
    Readdir(TargetFile),
    Readlink(SourceFile),
    Rename(RenameEvent),
    Searchfs(TargetFile),
    Setattrlist(SetattrlistEvent),
    Setegid(SetegidEvent),
    Seteuid(SeteuidEvent),
    Setextattr(NamedExtattrEvent),
    Setflags(SetflagsEvent),
    Setgid(SetgidEvent),
    Setmode(SetmodeEvent),
    Setowner(SetownerEvent),
    Setuid(SetuidEvent),
    Signal(SignalEvent),
    Stat(TargetFile),
    Truncate(TargetFile),
    UipcBind(UipcBindEvent),
    UipcConnect(UipcConnectEvent),
    Unlink(UnlinkEvent),
    Unmount(MountEvent),
    Utimes(TargetFile),
    Write(TargetFile),
}

impl EventPayload {
    /// Every wire kind name, in the order the logger lists them. The agent
    /// subscribes to exactly this set.
    pub const ALL_KINDS: [&'static str; 49] = [
        "access",
        "authentication",
        "chdir",
        "clone",
        "close",
        "create",
        "dup",
        "exec",
        "exit",
        "extattr",
        "fcntl",
        "fork",
        "fsgetpath",
        "get_task",
        "get_task_name",
        "get_task_read",
        "getattrlist",
        "getextattr",
        "iokit_open",
        "listextattr",
        "lookup",
        "mmap",
        "mount",
        "mprotect",
        "open",
        "proc_check",
        "proc_suspend_resume",
        "readdir",
        "readlink",
        "rename",
        "searchfs",
        "setattrlist",
        "setegid",
        "seteuid",
        "setextattr",
        "setflags",
        "setgid",
        "setmode",
        "setowner",
        "setuid",
        "signal",
        "stat",
        "truncate",
        "uipc_bind",
        "uipc_connect",
        "unlink",
        "unmount",
        "utimes",
        "write",
    ];

    /// Wire name of this kind, matching the logger's type description.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Access(_) => "access",
            EventPayload::Authentication(_) => "authentication",
            EventPayload::Chdir(_) => "chdir",
            EventPayload::Clone(_) => "clone",
            EventPayload::Close(_) => "close",
            EventPayload::Create(_) => "create",
            EventPayload::Dup(_) => "dup",
            EventPayload::Exec(_) => "exec",
            EventPayload::Exit(_) => "exit",
            EventPayload::Extattr(_) => "extattr",
            EventPayload::Fcntl(_) => "fcntl",
            EventPayload::Fork(_) => "fork",
            EventPayload::Fsgetpath(_) => "fsgetpath",
            EventPayload::GetTask(_) => "get_task",
            EventPayload::GetTaskName(_) => "get_task_name",
            EventPayload::GetTaskRead(_) => "get_task_read",
            EventPayload::Getattrlist(_) => "getattrlist",
            EventPayload::Getextattr(_) => "getextattr",
            EventPayload::IokitOpen(_) => "iokit_open",
            EventPayload::Listextattr(_) => "listextattr",
            EventPayload::Lookup(_) => "lookup",
            EventPayload::Mmap(_) => "mmap",
            EventPayload::Mount(_) => "mount",
            EventPayload::Mprotect(_) => "mprotect",
            EventPayload::Open(_) => "open",
            EventPayload::ProcCheck(_) => "proc_check",
            EventPayload::ProcSuspendResume(_) => "proc_suspend_resume",
            EventPayload::Readdir(_) => "readdir",
            EventPayload::Readlink(_) => "readlink",
            EventPayload::Rename(_) => "rename",
            EventPayload::Searchfs(_) => "searchfs",
            EventPayload::Setattrlist(_) => "setattrlist",
            EventPayload::Setegid(_) => "setegid",
            EventPayload::Seteuid(_) => "seteuid",
            EventPayload::Setextattr(_) => "setextattr",
            EventPayload::Setflags(_) => "setflags",
            EventPayload::Setgid(_) => "setgid",
            EventPayload::Setmode(_) => "setmode",
            EventPayload::Setowner(_) => "setowner",
            EventPayload::Setuid(_) => "setuid",
            EventPayload::Signal(_) => "signal",
            EventPayload::Stat(_) => "stat",
            EventPayload::Truncate(_) => "truncate",
            EventPayload::UipcBind(_) => "uipc_bind",
            EventPayload::UipcConnect(_) => "uipc_connect",
            EventPayload::Unlink(_) => "unlink",
            EventPayload::Unmount(_) => "unmount",
            EventPayload::Utimes(_) => "utimes",
            EventPayload::Write(_) => "write",
        }
    }
}
