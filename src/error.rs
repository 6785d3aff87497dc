use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating or loading the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
}

/// A tunnel subprocess could not be started.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to start ssh for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// One editor command failed; the remaining commands still run.
#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Status { command: String, status: std::process::ExitStatus },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_every_searched_path() {
        let err = ConfigError::NotFound {
            searched: vec![PathBuf::from("/a/portdeck.yml"), PathBuf::from("portdeck.yml")],
        };
        assert_eq!(
            err.to_string(),
            "Configuration file not found (searched: /a/portdeck.yml, portdeck.yml)"
        );
    }
}
