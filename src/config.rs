use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_PROMPT: &str = "write me a 1000 word essay on AI";
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Connection pool floor used when no explicit pool limit is configured.
pub const DEFAULT_POOL_FLOOR: usize = 100;

/// Where requests go and what they carry.
#[derive(Clone, Debug)]
pub struct TargetConfig {
    pub endpoint: Url,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub headers: HeaderMap,
}

impl TargetConfig {
    pub fn try_new(
        endpoint: impl AsRef<str>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }

        let endpoint = Url::parse(endpoint.as_ref())
            .with_context(|| format!("invalid endpoint URL: {}", endpoint.as_ref()))?;

        let mut headers = HeaderMap::new();
        if let Some(api_key) = api_key {
            if !api_key.is_empty() {
                let auth_value = format!("Bearer {}", api_key);
                let header_value = HeaderValue::from_str(&auth_value)
                    .context("failed to build Authorization header from api_key")?;
                headers.insert(AUTHORIZATION, header_value);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            endpoint,
            model,
            prompt: DEFAULT_PROMPT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            headers,
        })
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        if max_tokens > 0 {
            self.max_tokens = max_tokens;
        }
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// The fixed chat-completion payload sent by every attempt.
    pub fn request_body(&self) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": self.prompt,
                }
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

/// Knobs for one scaling sweep.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub levels: Vec<usize>,
    pub request_timeout: Duration,
    pub cooldown: Duration,
    /// Pause launching after every `stagger_every` attempts. Zero disables staggering.
    pub stagger_every: usize,
    pub stagger_pause: Duration,
    /// `None` sizes the pool per level as `max(concurrency, DEFAULT_POOL_FLOOR)`.
    pub pool_limit: Option<usize>,
    pub timestamp_format: String,
    /// How many failing attempts per batch get a diagnostic log line.
    pub diagnostic_sample: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        let mut levels: Vec<usize> = (1..=8).collect();
        levels.extend([16, 32, 64, 128, 256]);
        Self {
            levels,
            request_timeout: Duration::from_secs(600),
            cooldown: Duration::from_secs(2),
            stagger_every: 100,
            stagger_pause: Duration::from_millis(50),
            pool_limit: None,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            diagnostic_sample: 2,
        }
    }
}

impl SweepConfig {
    pub fn try_new(levels: Vec<usize>) -> Result<Self> {
        Self::default().with_levels(levels)
    }

    pub fn with_levels(mut self, levels: Vec<usize>) -> Result<Self> {
        if levels.is_empty() {
            return Err(anyhow!("at least one concurrency level is required"));
        }
        if levels.iter().any(|level| *level == 0) {
            return Err(anyhow!("concurrency levels must be greater than zero"));
        }
        self.levels = levels;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        if !request_timeout.is_zero() {
            self.request_timeout = request_timeout;
        }
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_stagger(mut self, every: usize, pause: Duration) -> Self {
        self.stagger_every = every;
        self.stagger_pause = pause;
        self
    }

    pub fn with_pool_limit(mut self, pool_limit: usize) -> Result<Self> {
        if pool_limit == 0 {
            return Err(anyhow!("pool_limit must be greater than zero"));
        }
        self.pool_limit = Some(pool_limit);
        Ok(self)
    }

    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    pub fn with_diagnostic_sample(mut self, sample: usize) -> Self {
        self.diagnostic_sample = sample;
        self
    }

    pub fn pool_limit_for(&self, concurrency: usize) -> usize {
        self.pool_limit
            .unwrap_or_else(|| concurrency.max(DEFAULT_POOL_FLOOR))
    }

    /// Applies the optional overrides from a registry file.
    pub fn apply(mut self, overrides: &SweepOverrides) -> Result<Self> {
        if let Some(levels) = &overrides.levels {
            self = self.with_levels(levels.clone())?;
        }
        if let Some(secs) = overrides.timeout_secs {
            self = self.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = overrides.cooldown_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(anyhow!("cooldown_secs must be a non-negative number"));
            }
            self = self.with_cooldown(Duration::from_secs_f64(secs));
        }
        if let Some(every) = overrides.stagger_every {
            self.stagger_every = every;
        }
        if let Some(ms) = overrides.stagger_ms {
            self.stagger_pause = Duration::from_millis(ms);
        }
        if let Some(limit) = overrides.pool_limit {
            self = self.with_pool_limit(limit)?;
        }
        if let Some(format) = &overrides.timestamp_format {
            self = self.with_timestamp_format(format.clone());
        }
        Ok(self)
    }
}

/// Sweep settings as they appear in a provider registry file.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SweepOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stagger_every: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stagger_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_format: Option<String>,
}
