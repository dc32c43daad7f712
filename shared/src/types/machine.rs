use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a machine is brought back to a clean state and whether the scheduler
/// must probe it before binding work to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineKind {
    /// Bare hardware; must answer a liveness probe before binding
    Physical,
    /// Hypervisor guest; bound unconditionally and started on demand
    Virtual,
}

/// One analysis machine in the fleet.
///
/// Created at fleet-configuration time. After registration the only mutable
/// field is `assigned_job`: null means idle, anything else means busy. That
/// nullable reference is the entire idle/busy protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    #[serde(rename = "_id")]
    pub name: String,

    /// Network address the scheduler probes and the proxy is keyed on
    pub address: String,

    pub kind: MachineKind,

    /// Listen port of the intercepting proxy fronting this machine
    pub proxy_port: u16,

    #[serde(default)]
    pub assigned_job: Option<Uuid>,
}

impl Machine {
    pub fn is_idle(&self) -> bool {
        self.assigned_job.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_signal_is_assignment() {
        let mut machine = Machine {
            name: "macos13-1".to_string(),
            address: "192.168.1.198".to_string(),
            kind: MachineKind::Physical,
            proxy_port: 8080,
            assigned_job: None,
        };
        assert!(machine.is_idle());
        machine.assigned_job = Some(Uuid::new_v4());
        assert!(!machine.is_idle());
    }
}
