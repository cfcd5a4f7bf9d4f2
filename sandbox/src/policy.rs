//! Security policies attached to sandboxed executions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource ceilings and access policy for one sandboxed execution.
///
/// Every execution carries a policy, either the global default or a per-tool
/// override stored on the tool's registry entry. Policies are plain data and
/// serialize with the entry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Maximum address space in bytes (`RLIMIT_AS`).
    pub memory_limit_bytes: u64,

    /// Maximum CPU time (`RLIMIT_CPU`, whole seconds).
    pub cpu_time_limit: Duration,

    /// Network access policy.
    pub network: NetworkPolicy,

    /// Filesystem access policy.
    pub filesystem: FilesystemPolicy,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 256 * 1024 * 1024, // 256 MiB
            cpu_time_limit: Duration::from_secs(30),
            network: NetworkPolicy::Disabled,
            filesystem: FilesystemPolicy::default(),
        }
    }
}

impl SecurityPolicy {
    /// Set the memory ceiling.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Set the CPU-time ceiling.
    pub fn with_cpu_limit(mut self, limit: Duration) -> Self {
        self.cpu_time_limit = limit;
        self
    }

    /// CPU ceiling in whole seconds, rounded up and never zero.
    pub fn cpu_limit_secs(&self) -> u64 {
        let secs = self.cpu_time_limit.as_secs();
        if self.cpu_time_limit.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Network access policy for sandboxed code.
///
/// Tool executions never get network access; the variant exists so the policy
/// document stays explicit about what was enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// No network: the child runs in a detached network namespace.
    #[default]
    Disabled,
}

/// Filesystem access policy for sandboxed code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemPolicy {
    /// Roots the child may read from. Everything else is unreachable where
    /// the kernel supports Landlock.
    pub readonly_roots: Vec<PathBuf>,

    /// Extra writable paths beyond the scratch directory. Validation adds
    /// the artifact's working directory here so compilers and test runners
    /// can drop their caches next to the files under test.
    #[serde(default)]
    pub writable_paths: Vec<PathBuf>,

    /// Parent directory for per-invocation scratch directories. Defaults to
    /// the system temp dir.
    pub scratch_parent: Option<PathBuf>,
}

impl Default for FilesystemPolicy {
    fn default() -> Self {
        Self {
            readonly_roots: vec![PathBuf::from("/")],
            writable_paths: Vec::new(),
            scratch_parent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_policy_denies_network() {
        let policy = SecurityPolicy::default();
        assert_eq!(policy.network, NetworkPolicy::Disabled);
        assert!(policy.memory_limit_bytes > 0);
    }

    #[test]
    fn cpu_limit_rounds_up_and_is_nonzero() {
        let policy = SecurityPolicy::default().with_cpu_limit(Duration::from_millis(1500));
        assert_eq!(policy.cpu_limit_secs(), 2);

        let policy = SecurityPolicy::default().with_cpu_limit(Duration::ZERO);
        assert_eq!(policy.cpu_limit_secs(), 1);

        let policy = SecurityPolicy::default().with_cpu_limit(Duration::from_secs(30));
        assert_eq!(policy.cpu_limit_secs(), 30);
    }

    #[test]
    fn policy_round_trips_through_json() {
        let policy = SecurityPolicy::default().with_memory_limit(1024);
        let json = serde_json::to_string(&policy).unwrap();
        let back: SecurityPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.memory_limit_bytes, 1024);
        assert_eq!(back.network, NetworkPolicy::Disabled);
    }
}
