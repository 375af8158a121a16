use std::path::PathBuf;

/// CFS scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuLimits {
    pub shares: u64,
    pub quota_us: i64,
    pub period_us: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLimits {
    pub limit_bytes: i64,
    /// Memory + swap ceiling. Equal to `limit_bytes` means no swap headroom.
    pub swap_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlimitKind {
    Cpu,
    Fsize,
    Nofile,
    Nproc,
    Stack,
}

impl RlimitKind {
    /// POSIX name, as used in OCI runtime specs.
    pub fn posix_name(self) -> &'static str {
        match self {
            Self::Cpu => "RLIMIT_CPU",
            Self::Fsize => "RLIMIT_FSIZE",
            Self::Nofile => "RLIMIT_NOFILE",
            Self::Nproc => "RLIMIT_NPROC",
            Self::Stack => "RLIMIT_STACK",
        }
    }

    /// Short name, as used by `ulimit`-style interfaces.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Fsize => "fsize",
            Self::Nofile => "nofile",
            Self::Nproc => "nproc",
            Self::Stack => "stack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rlimit {
    pub kind: RlimitKind,
    pub soft: u64,
    pub hard: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSpec {
    Tmpfs {
        destination: String,
        options: Vec<String>,
    },
    Bind {
        source: PathBuf,
        destination: String,
        read_only: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeccompProfile {
    /// The runtime's built-in default allow-list.
    RuntimeDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Loopback only.
    None,
}

/// Resource ceilings and hardening applied to one sandbox.
///
/// Values come from fixed defaults; nothing the submitter sends can reach
/// this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationPolicy {
    pub cpu: CpuLimits,
    pub memory: MemoryLimits,
    pub pids_limit: i64,
    pub rlimits: Vec<Rlimit>,
    pub mounts: Vec<MountSpec>,
    /// Capabilities kept. Empty drops every capability.
    pub capabilities: Vec<String>,
    pub no_new_privileges: bool,
    pub masked_paths: Vec<String>,
    pub readonly_paths: Vec<String>,
    pub seccomp: SeccompProfile,
    /// `uid:gid` the workload runs as.
    pub user: String,
    pub readonly_rootfs: bool,
    pub network: NetworkMode,
    /// Run a minimal init as PID 1 so signals reach the workload.
    pub init_process: bool,
}
