//! Named benchmark targets kept in a YAML file.
//!
//! ```yaml
//! sweep:
//!   levels: [1, 2, 4, 8]
//!   cooldown_secs: 2
//! providers:
//!   - name: lmstudio
//!     url: http://localhost:1234/v1/chat/completions
//!     model: gemma3
//!     api_key: test
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{SweepOverrides, TargetConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the key, used when `api_key` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ProviderEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            model: model.into(),
            api_key: None,
            api_key_env: None,
            prompt: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
        })
    }

    pub fn target(&self) -> Result<TargetConfig> {
        let mut target = TargetConfig::try_new(&self.url, self.api_key(), &self.model)
            .with_context(|| format!("provider {} is misconfigured", self.name))?;
        if let Some(prompt) = &self.prompt {
            target = target.with_prompt(prompt.clone());
        }
        if let Some(max_tokens) = self.max_tokens {
            target = target.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            target = target.with_temperature(temperature);
        }
        Ok(target)
    }
}

/// Provider names end up in file names, so only ASCII letters, digits and `_` are allowed.
pub fn validate_provider_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow!(
            "provider name {:?} should only contain letters, numbers, and underscores",
            name
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub sweep: SweepOverrides,
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

impl Registry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: Registry =
            serde_yaml::from_str(text).context("provider registry is not valid YAML")?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read provider registry {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Loads `path`, or starts an empty registry if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self).context("failed to encode provider registry")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, text)
            .with_context(|| format!("failed to write provider registry {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            validate_provider_name(&provider.name)?;
            if !seen.insert(provider.name.as_str()) {
                return Err(anyhow!("provider {} is defined more than once", provider.name));
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// The entries to benchmark: all of them, or the named ones in the order given.
    pub fn select(&self, names: &[String], all: bool) -> Result<Vec<&ProviderEntry>> {
        if all {
            return Ok(self.providers.iter().collect());
        }
        if names.is_empty() {
            return Err(anyhow!(
                "no providers selected; pass --all or --providers (available: {})",
                self.names().join(", ")
            ));
        }
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| {
                    anyhow!(
                        "unknown provider {} (available: {})",
                        name,
                        self.names().join(", ")
                    )
                })
            })
            .collect()
    }

    /// Adds `entry`; an existing entry of the same name is replaced only with `overwrite`.
    pub fn add(&mut self, entry: ProviderEntry, overwrite: bool) -> Result<()> {
        validate_provider_name(&entry.name)?;
        entry.target()?;
        match self.providers.iter_mut().find(|p| p.name == entry.name) {
            Some(existing) if overwrite => *existing = entry,
            Some(_) => {
                return Err(anyhow!(
                    "provider {} already exists; use --force to overwrite",
                    entry.name
                ))
            }
            None => self.providers.push(entry),
        }
        Ok(())
    }
}
