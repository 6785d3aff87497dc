use std::{
    io::{BufRead, BufReader, Read},
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
};
use tracing::{debug, info, warn};

use crate::config::TunnelSpec;
use crate::error::LaunchError;
use crate::port::{self, PROBE_TIMEOUT};

const SSH_PROGRAM: &str = "ssh";

/// Host and SSH port a tunnel dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Prefers the local alias when it answers, else the remote host.
pub fn select_endpoint<P>(spec: &TunnelSpec, probe: P) -> Endpoint
where
    P: Fn(&str, u16) -> bool,
{
    if let Some(local_host) = spec.host_local.as_deref() {
        let local_port = spec.local_ssh_port();
        if probe(local_host, local_port) {
            return Endpoint { host: local_host.to_string(), port: local_port };
        }
        debug!(tunnel = %spec.name, host = local_host, port = local_port, "local alias unreachable, using remote host");
    }
    Endpoint { host: spec.host.clone(), port: spec.port }
}

pub fn ssh_args(spec: &TunnelSpec, endpoint: &Endpoint) -> Vec<String> {
    let mut args = vec![
        "-N".to_string(),
        "-i".to_string(),
        spec.identity_path().display().to_string(),
        format!("{}@{}", spec.user, endpoint.host),
        "-p".to_string(),
        endpoint.port.to_string(),
    ];
    for mapping in &spec.ports {
        args.push("-L".to_string());
        args.push(format!("127.0.0.1:{}:127.0.0.1:{}", mapping.local, mapping.remote));
    }
    args
}

/// Probes for the endpoint and spawns `ssh`. Returns as soon as the child exists.
pub fn launch(spec: &TunnelSpec) -> Result<Child, LaunchError> {
    let endpoint = select_endpoint(spec, |host, port| port::is_reachable(host, port, PROBE_TIMEOUT));
    spawn(SSH_PROGRAM, spec, &endpoint)
}

pub fn spawn(program: &str, spec: &TunnelSpec, endpoint: &Endpoint) -> Result<Child, LaunchError> {
    let args = ssh_args(spec, endpoint);
    let command_line = format!("{} {}", program, args.join(" "));
    info!(tunnel = %spec.name, command = %command_line, "starting ssh tunnel");

    let mut command = Command::new(program);
    command.args(&args);
    detach(&mut command);

    let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
        name: spec.name.clone(),
        source,
    })?;
    debug!(tunnel = %spec.name, pid = child.id(), "ssh spawned");
    if let Some(stderr) = child.stderr.take() {
        log_stderr(spec.name.clone(), stderr);
    }
    Ok(child)
}

/// Cuts the child off from the dashboard's terminal.
///
/// On Unix the child starts a new session, so it has no controlling tty:
/// ssh cannot prompt for a passphrase or host key and fails instead of
/// stopping on terminal input.
pub fn detach(command: &mut Command) {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid(2) is async-signal-safe and touches no parent memory.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
}

/// Logs each line ssh writes to stderr until the pipe closes.
///
/// The thread returns the lines it saw.
pub fn log_stderr<R>(tunnel: String, stderr: R) -> Option<JoinHandle<Vec<String>>>
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("ssh-stderr".into())
        .spawn(move || {
            let mut lines = Vec::new();
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let line = line.trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                debug!(tunnel = %tunnel, stderr = %line, "ssh output");
                lines.push(line);
            }
            lines
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "could not spawn stderr reader");
            None
        }
    }
}
