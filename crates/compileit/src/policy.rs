use std::path::Path;

use sandbox::{
    CpuLimits, IsolationPolicy, MemoryLimits, MountSpec, NetworkMode, Rlimit, RlimitKind,
    SeccompProfile,
};

const MIB: u64 = 1024 * 1024;

const CPU_SHARES: u64 = 256;
/// 10% of one CPU.
const CPU_QUOTA_US: i64 = 10_000;
const CPU_PERIOD_US: u64 = 100_000;
const MEMORY_BYTES: i64 = 128 * 1024 * 1024;
const PIDS_LIMIT: i64 = 64;

const RLIMIT_CPU_SECS: u64 = 4;
const RLIMIT_FSIZE_BYTES: u64 = 8 * MIB;
const RLIMIT_NOFILE: u64 = 256;
const RLIMIT_NPROC: u64 = 64;
const RLIMIT_STACK_BYTES: u64 = 8 * MIB;

const SCRATCH_MOUNT: &str = "/tmp";
const SCRATCH_OPTIONS: &[&str] = &["rw", "nosuid", "nodev", "mode=1777", "size=64m"];
/// Where the toolchain directory appears inside the sandbox.
pub(crate) const TOOLCHAIN_MOUNT: &str = "/lang";

const SANDBOX_USER: &str = "1000:1000";

const MASKED_PATHS: &[&str] = &[
    "/proc/kcore",
    "/proc/timer_list",
    "/proc/sched_debug",
    "/proc/scsi",
    "/sys/firmware",
    "/sys/fs/selinux",
];

const READONLY_PATHS: &[&str] = &[
    "/proc/asound",
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

fn rlimit(kind: RlimitKind, value: u64) -> Rlimit {
    Rlimit {
        kind,
        soft: value,
        hard: value,
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Build the isolation policy for one sandbox.
///
/// Everything is fixed except the host directory mounted read-only at
/// [`TOOLCHAIN_MOUNT`].
pub fn build(toolchain_dir: &Path) -> IsolationPolicy {
    IsolationPolicy {
        cpu: CpuLimits {
            shares: CPU_SHARES,
            quota_us: CPU_QUOTA_US,
            period_us: CPU_PERIOD_US,
        },
        memory: MemoryLimits {
            limit_bytes: MEMORY_BYTES,
            swap_bytes: MEMORY_BYTES,
        },
        pids_limit: PIDS_LIMIT,
        rlimits: vec![
            rlimit(RlimitKind::Cpu, RLIMIT_CPU_SECS),
            rlimit(RlimitKind::Fsize, RLIMIT_FSIZE_BYTES),
            rlimit(RlimitKind::Nofile, RLIMIT_NOFILE),
            rlimit(RlimitKind::Nproc, RLIMIT_NPROC),
            rlimit(RlimitKind::Stack, RLIMIT_STACK_BYTES),
        ],
        mounts: vec![
            MountSpec::Tmpfs {
                destination: SCRATCH_MOUNT.to_string(),
                options: owned(SCRATCH_OPTIONS),
            },
            MountSpec::Bind {
                source: toolchain_dir.to_path_buf(),
                destination: TOOLCHAIN_MOUNT.to_string(),
                read_only: true,
            },
        ],
        capabilities: Vec::new(),
        no_new_privileges: true,
        masked_paths: owned(MASKED_PATHS),
        readonly_paths: owned(READONLY_PATHS),
        seccomp: SeccompProfile::RuntimeDefault,
        user: SANDBOX_USER.to_string(),
        readonly_rootfs: true,
        network: NetworkMode::None,
        init_process: true,
    }
}
