mod error;
mod output;
mod policy;
mod runtime;
mod spec;
mod types;

pub use error::{Result, SandboxError};
pub use output::{OutputBuffer, TRUNCATION_MARKER};
pub use policy::{
    CpuLimits, IsolationPolicy, MemoryLimits, MountSpec, NetworkMode, Rlimit, RlimitKind,
    SeccompProfile,
};
pub use runtime::ContainerRuntime;
pub use spec::ContainerSpec;
pub use types::{BaseImage, ExitStatus, ExitWatch, Signal};
