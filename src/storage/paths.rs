//! Application paths for config and cache.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application paths.
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Cache directory.
    pub cache: PathBuf,
}

impl AppPaths {
    /// Create paths for the meterbar engine.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("com", "meterbar", "meterbar") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                cache: proj_dirs.cache_dir().to_path_buf(),
            }
        } else {
            let home = directories::BaseDirs::new()
                .map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
            Self {
                config: home.join(".config/meterbar"),
                cache: home.join(".cache/meterbar"),
            }
        }
    }

    /// Paths rooted under a custom directory. Used by tests.
    #[must_use]
    pub fn under(root: &std::path::Path) -> Self {
        Self {
            config: root.join("config"),
            cache: root.join("cache"),
        }
    }

    /// Path to the engine settings file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Directory holding per-provider snapshot cache entries.
    #[must_use]
    pub fn usage_cache_dir(&self) -> PathBuf {
        self.cache.join("usage")
    }

    /// Ensure all directories exist.
    ///
    /// # Errors
    ///
    /// Propagates directory-creation failures.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(self.usage_cache_dir())?;
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
