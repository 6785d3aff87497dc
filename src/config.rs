use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::error::ConfigError;

const APP_DIR: &str = "portdeck";
const CONFIG_FILE: &str = "portdeck.yml";
const HOME_DOTFILE: &str = ".portdeck.yml";

/// A local port forwarded to a port on the far side of the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct PortMapping {
    pub local: u16,
    pub remote: u16,
}

impl TryFrom<String> for PortMapping {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        let (local, remote) = parse_ports(&value)?;
        Ok(PortMapping { local, remote })
    }
}

/// Parses `LOCAL:REMOTE`, or a bare `PORT` used on both ends.
pub fn parse_ports(ports: &str) -> Result<(u16, u16)> {
    if ports.contains(':') {
        let parts: Vec<&str> = ports.split(':').collect();
        if parts.len() != 2 {
            anyhow::bail!("Invalid format '{}'. Use LOCAL:REMOTE or just PORT", ports);
        }

        let local = parts[0].trim().parse::<u16>()
            .with_context(|| format!("Invalid local port in '{}'", ports))?;
        let remote = parts[1].trim().parse::<u16>()
            .with_context(|| format!("Invalid remote port in '{}'", ports))?;
        Ok((local, remote))
    } else {
        let port = ports.trim().parse::<u16>()
            .with_context(|| format!("Invalid port number '{}'", ports))?;
        Ok((port, port))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSpec {
    pub name: String,
    pub host: String,
    #[serde(rename = "host-local", default)]
    pub host_local: Option<String>,
    pub user: String,
    pub port: u16,
    #[serde(rename = "port-local", default)]
    pub port_local: Option<u16>,
    pub identity_file: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

impl TunnelSpec {
    /// SSH port to use when dialing the local alias.
    pub fn local_ssh_port(&self) -> u16 {
        self.port_local.unwrap_or(self.port)
    }

    /// Local ports bound by this tunnel, in declared order.
    pub fn local_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|m| m.local).collect()
    }

    pub fn identity_path(&self) -> PathBuf {
        expand_home(&self.identity_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditorProject {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Services {
    #[serde(default)]
    pub ssh: Vec<TunnelSpec>,
    #[serde(default)]
    pub vscode: Vec<EditorProject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub services: Services,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yaml_ng::Error> {
        serde_yaml_ng::from_str(contents)
    }

    pub fn tunnels(&self) -> &[TunnelSpec] {
        &self.services.ssh
    }

    pub fn projects(&self) -> &[EditorProject] {
        &self.services.vscode
    }

    /// Every local port any tunnel forwards, deduplicated, in declared order.
    pub fn all_local_ports(&self) -> Vec<u16> {
        let mut ports = Vec::new();
        for port in self.tunnels().iter().flat_map(|t| t.local_ports()) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }
}

/// Default lookup order: user config dir, home dotfile, current directory.
pub fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(APP_DIR).join(CONFIG_FILE));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(HOME_DOTFILE));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(CONFIG_FILE));
    }
    candidates
}

pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    resolve_from(explicit, &default_candidates())
}

/// An explicit path wins when it exists; otherwise the first existing candidate.
pub fn resolve_from(explicit: Option<&Path>, candidates: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    let mut searched = Vec::new();

    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        warn!(path = %path.display(), "config file given on the command line does not exist, trying defaults");
        searched.push(path.to_path_buf());
    }

    for candidate in candidates {
        debug!(path = %candidate.display(), "looking for config");
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
        searched.push(candidate.clone());
    }

    Err(ConfigError::NotFound { searched })
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
