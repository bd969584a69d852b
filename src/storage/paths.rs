//! Application paths for config and data.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Data directory (history database, saved token).
    pub data: PathBuf,
}

impl AppPaths {
    /// Create paths for the fleetwatch application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("io", "fleetwatch", "fleetwatch") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            // Fallback to home directory
            let home = directories::BaseDirs::new()
                .map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
            Self {
                config: home.join(".config/fleetwatch"),
                data: home.join(".local/share/fleetwatch"),
            }
        }
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Path to the saved access token.
    #[must_use]
    pub fn token_file(&self) -> PathBuf {
        self.data.join("token.json")
    }

    /// Path to history database file.
    #[must_use]
    pub fn history_db_file(&self) -> PathBuf {
        self.data.join("fleetwatch.sqlite")
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
