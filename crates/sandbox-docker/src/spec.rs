use std::collections::HashMap;

use bollard::models::{ContainerCreateBody, HostConfig, ResourcesUlimits};
use sandbox::{ContainerSpec, IsolationPolicy, MountSpec, NetworkMode, SeccompProfile};

/// Label recording the snapshot name on the container.
pub(crate) const SNAPSHOT_LABEL: &str = "compileit.snapshot";

/// Translate a backend-neutral spec into a Docker container create body.
///
/// The container's writable layer is the sandbox snapshot; removing the
/// container with volumes removes it.
pub(crate) fn container_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let policy = &spec.policy;
    ContainerCreateBody {
        image: Some(spec.image.id.clone()),
        cmd: Some(spec.args.clone()),
        env: Some(spec.env.clone()),
        hostname: Some(spec.hostname.clone()),
        user: Some(policy.user.clone()),
        network_disabled: Some(matches!(policy.network, NetworkMode::None)),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        labels: Some(HashMap::from([(
            SNAPSHOT_LABEL.to_string(),
            spec.snapshot.clone(),
        )])),
        host_config: Some(host_config(&spec.runtime, policy)),
        ..Default::default()
    }
}

fn host_config(runtime: &str, policy: &IsolationPolicy) -> HostConfig {
    let mut tmpfs = HashMap::new();
    let mut binds = Vec::new();
    for mount in &policy.mounts {
        match mount {
            MountSpec::Tmpfs {
                destination,
                options,
            } => {
                tmpfs.insert(destination.clone(), options.join(","));
            }
            MountSpec::Bind {
                source,
                destination,
                read_only,
            } => {
                let mode = if *read_only { "ro" } else { "rw" };
                binds.push(format!("{}:{destination}:{mode}", source.display()));
            }
        }
    }

    let ulimits = policy
        .rlimits
        .iter()
        .map(|r| ResourcesUlimits {
            name: Some(r.kind.short_name().to_string()),
            soft: Some(clamp_i64(r.soft)),
            hard: Some(clamp_i64(r.hard)),
        })
        .collect();

    let mut security_opt = Vec::new();
    if policy.no_new_privileges {
        security_opt.push("no-new-privileges:true".to_string());
    }
    // The engine applies its default seccomp profile unless overridden.
    match policy.seccomp {
        SeccompProfile::RuntimeDefault => {}
    }

    let network_mode = match policy.network {
        NetworkMode::None => "none",
    };

    HostConfig {
        runtime: Some(runtime.to_string()),
        cpu_shares: Some(clamp_i64(policy.cpu.shares)),
        cpu_quota: Some(policy.cpu.quota_us),
        cpu_period: Some(clamp_i64(policy.cpu.period_us)),
        memory: Some(policy.memory.limit_bytes),
        memory_swap: Some(policy.memory.swap_bytes),
        pids_limit: Some(policy.pids_limit),
        ulimits: Some(ulimits),
        tmpfs: Some(tmpfs),
        binds: Some(binds),
        cap_drop: Some(vec!["ALL".to_string()]),
        cap_add: Some(policy.capabilities.clone()),
        security_opt: Some(security_opt),
        masked_paths: Some(policy.masked_paths.clone()),
        readonly_paths: Some(policy.readonly_paths.clone()),
        readonly_rootfs: Some(policy.readonly_rootfs),
        network_mode: Some(network_mode.to_string()),
        init: Some(policy.init_process),
        auto_remove: Some(false),
        ..Default::default()
    }
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
