use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Overrides the default `~/.agentlink` root when set and non-empty.
pub const HOME_ENV: &str = "AGENTLINK_HOME";
const DEFAULT_DIR: &str = ".agentlink";

/// Where the client keeps its profile file and session cache.
///
/// The directory holds bearer tokens and gateway secrets, so on unix it is
/// created owner-only.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    base: PathBuf,
}

impl ConfigPaths {
    /// Resolves `~/.agentlink`, or `$AGENTLINK_HOME` when set.
    pub fn new() -> anyhow::Result<Self> {
        Self::resolve(None)
    }

    /// Picks the root in order: `explicit`, `$AGENTLINK_HOME`, then
    /// `~/.agentlink`.
    pub fn resolve(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        pick_base(explicit, std::env::var_os(HOME_ENV), dirs::home_dir())
            .map(Self::with_base)
            .ok_or_else(|| {
                anyhow::anyhow!("Could not determine home directory; set {HOME_ENV}")
            })
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_dir(&self) -> &Path {
        &self.base
    }

    /// Server profiles and the default selection.
    pub fn config_path(&self) -> PathBuf {
        self.base.join("config.toml")
    }

    /// SQLite file behind the session cache.
    pub fn cache_db_path(&self) -> PathBuf {
        self.base.join("cache.db")
    }

    pub fn ensure_config_dir(&self) -> anyhow::Result<PathBuf> {
        if !self.base.exists() {
            std::fs::create_dir_all(&self.base)?;
            restrict_to_owner(&self.base)?;
        }
        Ok(self.base.clone())
    }
}

fn pick_base(
    explicit: Option<PathBuf>,
    env: Option<OsString>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    explicit
        .or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .or_else(|| home.map(|h| h.join(DEFAULT_DIR)))
}

#[cfg(unix)]
fn restrict_to_owner(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_to_owner(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
