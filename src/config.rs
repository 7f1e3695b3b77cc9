use crate::error::ConfigError;
use crate::identity::{is_valid_company_id, MeterIdentity};
use serde_derive::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use std::{env, fs};

pub const DEFAULT_BASE_URL: &str = "https://wl.tap-water.cn";

#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    pub name: String,
    pub water_meter_no: String,
    pub water_company_id: String,
    pub auth_token: String,
    pub user_id: String,
    pub authorization_t: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_update_interval_hours")]
    pub update_interval_hours: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub meters: Vec<MeterConfig>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_update_interval_hours() -> u64 {
    12
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_bind_addr() -> String {
    "0.0.0.0:8123".to_string()
}

impl AppConfig {
    /// Loads the TOML file named by `WATER_METER_CONFIG` (default `water-meter.toml`)
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            env::var("WATER_METER_CONFIG").unwrap_or_else(|_| "water-meter.toml".to_string());
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_hours * 60 * 60)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Validates every `[[meters]]` entry and turns it into an identity.
    /// Fails on the first invalid entry or on a repeated company/meter pair.
    pub fn identities(&self) -> Result<Vec<MeterIdentity>, ConfigError> {
        let mut seen = HashSet::new();
        let mut identities = Vec::with_capacity(self.meters.len());

        for meter in &self.meters {
            let identity = meter.validate()?;
            if !seen.insert(identity.device_id()) {
                return Err(ConfigError::DuplicateMeter {
                    company_id: identity.company_id,
                    meter_no: identity.meter_no,
                });
            }
            identities.push(identity);
        }

        Ok(identities)
    }
}

impl MeterConfig {
    fn validate(&self) -> Result<MeterIdentity, ConfigError> {
        let fields = [
            ("name", &self.name),
            ("water_meter_no", &self.water_meter_no),
            ("water_company_id", &self.water_company_id),
            ("auth_token", &self.auth_token),
            ("user_id", &self.user_id),
            ("authorization_t", &self.authorization_t),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    meter: self.name.clone(),
                    field,
                });
            }
        }

        let company_id = self.water_company_id.trim();
        if !is_valid_company_id(company_id) {
            return Err(ConfigError::InvalidCompanyId {
                meter: self.name.clone(),
                company_id: company_id.to_string(),
            });
        }

        Ok(MeterIdentity {
            name: self.name.trim().to_string(),
            meter_no: self.water_meter_no.trim().to_string(),
            company_id: company_id.to_string(),
            auth_token: self.auth_token.trim().to_string(),
            user_id: self.user_id.trim().to_string(),
            auth_t: self.authorization_t.trim().to_string(),
        })
    }
}
