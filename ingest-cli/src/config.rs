//! On-disk configuration of the `bingest` binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bili_ingest::{Credential, CredentialEntry, CredentialPool, IngestConfig, RosterEntry};
use serde::{Deserialize, Serialize};

/// A pooled credential as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub cookies: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Static fallback cookie string, used while the pool is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,

    #[serde(flatten)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,

    #[serde(default)]
    pub roster: Vec<RosterEntry>,
}

impl AppConfig {
    /// `<config dir>/bingest/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bingest").join("config.toml"))
    }

    pub fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => Self::default_path().context("could not determine the user config directory"),
        }
    }

    /// Load the file at `path`, or the default location. A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))?;
        config
            .ingest
            .validate()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, self.show()?)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }

    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }

    /// Build the credential pool from `[[credentials]]`.
    pub fn build_pool(&self) -> Result<CredentialPool> {
        let pool = CredentialPool::new(self.ingest.pool.clone());
        for entry in &self.credentials {
            let credential = Credential::parse(&entry.cookies)
                .with_context(|| format!("credential {:?} has an invalid cookie string", entry.id))?;
            let name = if entry.name.is_empty() { &entry.id } else { &entry.name };
            pool.add_credential(CredentialEntry::new(entry.id.clone(), name.clone(), credential));
            if !entry.active {
                pool.set_active(&entry.id, false)?;
            }
        }
        Ok(pool)
    }

    pub fn fallback_credential(&self) -> Result<Option<Credential>> {
        self.cookies
            .as_deref()
            .map(|c| Credential::parse(c).context("invalid fallback cookie string"))
            .transpose()
    }

    pub fn add_credential(&mut self, id: String, name: Option<String>, cookies: String) -> Result<()> {
        if self.credentials.iter().any(|c| c.id == id) {
            bail!("credential {id:?} already exists");
        }
        Credential::parse(&cookies).context("invalid cookie string")?;
        self.credentials.push(CredentialConfig {
            name: name.unwrap_or_else(|| id.clone()),
            id,
            cookies,
            active: true,
        });
        Ok(())
    }

    pub fn remove_credential(&mut self, id: &str) -> Result<()> {
        let before = self.credentials.len();
        self.credentials.retain(|c| c.id != id);
        if self.credentials.len() == before {
            bail!("unknown credential {id:?}");
        }
        Ok(())
    }

    pub fn set_credential_active(&mut self, id: &str, active: bool) -> Result<()> {
        let entry = self
            .credentials
            .iter_mut()
            .find(|c| c.id == id)
            .with_context(|| format!("unknown credential {id:?}"))?;
        entry.active = active;
        Ok(())
    }
}

/// Parse `mid` or `mid:name` roster arguments.
pub fn parse_roster_args(args: &[String]) -> Result<Vec<RosterEntry>> {
    args.iter()
        .map(|arg| {
            let (id, name) = arg.split_once(':').unwrap_or((arg.as_str(), ""));
            let id = id.trim();
            if id.parse::<u64>().is_err() {
                bail!("invalid creator id {id:?}");
            }
            Ok(RosterEntry::new(id, name.trim()))
        })
        .collect()
}
