use std::path::{Path, PathBuf};
use std::{env, fs, io};

use tempo_lsp::ClientSettings;
use thiserror::Error;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "TEMPO_CLIENT_CONFIG";
const CONFIG_FILE: &str = "tempo-client.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// `$TEMPO_CLIENT_CONFIG`, else `<config dir>/tempo/tempo-client.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("tempo").join(CONFIG_FILE))
}

/// Load settings, or `None` when there is no config file.
pub fn load() -> Result<Option<ClientSettings>, ConfigError> {
    let Some(path) = config_path() else {
        return Ok(None);
    };
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<Option<ClientSettings>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
