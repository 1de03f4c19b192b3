use std::path::{Path, PathBuf};
use tag_controller_core::Settings;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read settings from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Loads settings from a YAML file. Patterns are compiled while parsing, so
/// an invalid pattern fails the load.
pub fn load(path: &Path) -> Result<Settings, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse(text: &str) -> Result<Settings, serde_yaml::Error> {
    // An empty document means "all defaults".
    if text.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(text)
}
