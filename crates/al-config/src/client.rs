use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::background::BackgroundConfig;
use crate::paths::ConfigPaths;
use crate::profile::ServerProfile;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<Uuid>,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub profiles: Vec<ServerProfile>,
    #[serde(skip)]
    paths: Option<ConfigPaths>,
}

impl ClientConfig {
    /// Returns the `ConfigPaths` for this config, falling back to the
    /// default location when none were set.
    pub fn paths(&self) -> anyhow::Result<ConfigPaths> {
        match &self.paths {
            Some(p) => Ok(p.clone()),
            None => ConfigPaths::new(),
        }
    }

    pub fn set_paths(&mut self, paths: ConfigPaths) {
        self.paths = Some(paths);
    }

    /// Load config from the default location (`~/.agentlink/config.toml`).
    pub fn load() -> anyhow::Result<Self> {
        let paths = ConfigPaths::new()?;
        Self::load_from(&paths)
    }

    pub fn load_from(paths: &ConfigPaths) -> anyhow::Result<Self> {
        let config_file = paths.config_path();
        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)?;
            let config: ClientConfig = toml::from_str(&content)?;
            config
        } else {
            Self::default()
        };
        config.paths = Some(paths.clone());
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, paths: &ConfigPaths) -> anyhow::Result<()> {
        self.validate()?;
        paths.ensure_config_dir()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(paths.config_path(), content)?;
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let paths = self.paths()?;
        self.save_to(&paths)
    }

    /// Validate config values. Called automatically by `load_from` / `save_to`.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.id) {
                anyhow::bail!("duplicate profile id {}", profile.id);
            }
            if profile.name.trim().is_empty() {
                anyhow::bail!("profile {} must have a name", profile.id);
            }
            if profile.host.trim().is_empty() {
                anyhow::bail!("profile {} must have a host", profile.id);
            }
        }
        if let Some(default_id) = self.default_profile {
            if self.profile(&default_id).is_none() {
                anyhow::bail!("default_profile {} does not name a profile", default_id);
            }
        }
        Ok(())
    }

    pub fn profile(&self, id: &Uuid) -> Option<&ServerProfile> {
        self.profiles.iter().find(|p| p.id == *id)
    }

    pub fn default_profile(&self) -> Option<&ServerProfile> {
        match self.default_profile {
            Some(id) => self.profile(&id),
            None => self.profiles.first(),
        }
    }

    pub fn add_profile(&mut self, profile: ServerProfile) -> anyhow::Result<()> {
        if self.profile(&profile.id).is_some() {
            anyhow::bail!("profile {} already exists", profile.id);
        }
        self.profiles.push(profile);
        Ok(())
    }

    /// Removes the profile and clears the default pointer if it named it.
    pub fn remove_profile(&mut self, id: &Uuid) -> Option<ServerProfile> {
        let index = self.profiles.iter().position(|p| p.id == *id)?;
        if self.default_profile == Some(*id) {
            self.default_profile = None;
        }
        Some(self.profiles.remove(index))
    }
}
