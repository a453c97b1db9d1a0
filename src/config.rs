//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the path given with `-f`
//! 2. `$MAIRIX_CONFIG`
//! 3. `~/.config/mairix/config.toml`
//!
//! The folder-list values use the same syntax as the search folders they
//! describe: colon-separated paths relative to `folder_base`, `\:` for a
//! literal colon, a trailing `...` for recursion, shell wildcards in the
//! last component. The `MAIRIX_*` environment variables override the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{MairixError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Common ancestor directory of all the folders.
    pub folder_base: Option<String>,
    /// Maildir folder specification.
    pub maildir: Option<String>,
    /// MH folder specification.
    pub mh: Option<String>,
    /// Mbox file specification.
    pub mbox: Option<String>,
    /// Glob patterns for folders to skip while scanning.
    pub omit: Vec<String>,
    /// Where search results are materialised.
    pub mfolder: Option<String>,
    /// Output format: "maildir", "mh", "mbox", "raw" or "excerpt".
    pub mformat: Option<String>,
    /// Path of the index file.
    pub database: Option<String>,
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Default config file location.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAIRIX_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mairix").join("config.toml"))
}

/// Load configuration from `explicit` or the standard location, then apply
/// the environment overrides.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => config_file_path().filter(|p| p.exists()),
    };

    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                MairixError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            let config: Config = toml::from_str(&contents).map_err(|e| {
                MairixError::Config(format!("cannot parse {}: {e}", path.display()))
            })?;
            info!(path = %path.display(), "Loaded config");
            config
        }
        None => Config::default(),
    };

    let env_override = |slot: &mut Option<String>, var: &str| {
        if let Ok(value) = std::env::var(var) {
            *slot = Some(value);
        }
    };
    env_override(&mut config.folder_base, "MAIRIX_FOLDER_BASE");
    env_override(&mut config.maildir, "MAIRIX_MAILDIR_FOLDERS");
    env_override(&mut config.mh, "MAIRIX_MH_FOLDERS");
    env_override(&mut config.mbox, "MAIRIX_MBOXEN");
    env_override(&mut config.mfolder, "MAIRIX_MFOLDER");
    env_override(&mut config.database, "MAIRIX_DATABASE");

    Ok(config)
}

impl Config {
    /// The folder base, required for any indexing or folder output.
    pub fn folder_base(&self) -> Result<PathBuf> {
        self.folder_base
            .as_deref()
            .map(expand_tilde)
            .ok_or_else(|| {
                MairixError::Config("no folder_base/MAIRIX_FOLDER_BASE set".to_string())
            })
    }

    /// The index file path.
    pub fn database_path(&self) -> Result<PathBuf> {
        self.database.as_deref().map(expand_tilde).ok_or_else(|| {
            MairixError::Config("no database/MAIRIX_DATABASE set".to_string())
        })
    }

    /// Resolve the output folder: absolute paths stand alone, anything
    /// else lives under the folder base.
    pub fn resolve_mfolder(&self, override_path: Option<&str>) -> Result<PathBuf> {
        let mfolder = override_path
            .map(str::to_string)
            .or_else(|| self.mfolder.clone())
            .ok_or_else(|| MairixError::Config("no mfolder/MAIRIX_MFOLDER set".to_string()))?;
        let expanded = expand_tilde(&mfolder);
        if expanded.is_absolute() {
            Ok(expanded)
        } else {
            Ok(self.folder_base()?.join(expanded))
        }
    }

    /// True when at least one folder specification is present.
    pub fn has_any_folders(&self) -> bool {
        self.maildir.is_some() || self.mh.is_some() || self.mbox.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
folder_base = "/home/user/mail"
maildir = "inbox:archive..."
mbox = "backups/*.mbox"
omit = ["spam*"]
mfolder = "mf"
mformat = "maildir"
database = "/home/user/.mairix_db"
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.folder_base.as_deref(), Some("/home/user/mail"));
        assert_eq!(cfg.maildir.as_deref(), Some("inbox:archive..."));
        assert_eq!(cfg.omit, ["spam*"]);
        assert_eq!(cfg.mformat.as_deref(), Some("maildir"));
        assert!(cfg.has_any_folders());
    }

    #[test]
    fn test_partial_config_defaults() {
        let cfg: Config = toml::from_str("database = \"/tmp/db\"").unwrap();
        assert!(cfg.folder_base().is_err());
        assert_eq!(cfg.database_path().unwrap(), PathBuf::from("/tmp/db"));
        assert!(!cfg.has_any_folders());
    }

    #[test]
    fn test_resolve_mfolder() {
        let cfg: Config = toml::from_str("folder_base = \"/mail\"\nmfolder = \"mf\"").unwrap();
        assert_eq!(cfg.resolve_mfolder(None).unwrap(), PathBuf::from("/mail/mf"));
        assert_eq!(
            cfg.resolve_mfolder(Some("/elsewhere/out")).unwrap(),
            PathBuf::from("/elsewhere/out")
        );
    }
}
