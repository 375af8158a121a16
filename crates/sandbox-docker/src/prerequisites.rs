use std::path::Path;

use bollard::Docker;
use nix::unistd::{AccessFlags, access};
use sandbox::SandboxError;

/// Verify the host can run sandboxes before the runtime is handed out.
///
/// Checks socket presence and permissions, engine reachability, and that the
/// configured isolation runtime is registered. Collects all failures and
/// returns them in a single `BackendNotAvailable` error.
pub async fn check_prerequisites(
    docker: &Docker,
    socket_path: &Path,
    runtime: &str,
) -> Result<(), SandboxError> {
    let mut errors = Vec::new();

    check_socket(socket_path, &mut errors);
    // Talking to an inaccessible socket only repeats the same failure.
    if errors.is_empty() {
        check_engine(docker, runtime, &mut errors).await;
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SandboxError::BackendNotAvailable(errors.join("; ")))
    }
}

fn check_socket(path: &Path, errors: &mut Vec<String>) {
    if !path.exists() {
        errors.push(format!("engine socket not found: {}", path.display()));
        return;
    }
    if let Err(e) = access(path, AccessFlags::R_OK | AccessFlags::W_OK) {
        errors.push(format!(
            "engine socket not accessible: {} ({e}); \
             run as root or as a member of the socket's group",
            path.display()
        ));
    }
}

async fn check_engine(docker: &Docker, runtime: &str, errors: &mut Vec<String>) {
    if let Err(e) = docker.ping().await {
        errors.push(format!("engine not reachable: {e}"));
        return;
    }
    match docker.info().await {
        Ok(info) => {
            let registered = info
                .runtimes
                .as_ref()
                .is_some_and(|runtimes| runtimes.contains_key(runtime));
            if !registered {
                errors.push(format!("runtime not registered with engine: {runtime}"));
            }
        }
        Err(e) => errors.push(format!("engine info: {e}")),
    }
}
