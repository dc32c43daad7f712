pub mod error;
pub mod job;
pub mod machine;

pub use error::CoreError;
pub use job::{Job, Progress, CAPTURE_MARGIN_SECS};
pub use machine::{Machine, MachineKind};
