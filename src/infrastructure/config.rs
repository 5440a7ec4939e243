use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;

pub const DEFAULT_REMOTE_FILE_NAME: &str = "vibetable_v13.json";
pub const DEFAULT_LOCAL_SLOT: &str = "vibetable_data";
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/oauth2/callback";
pub const DRIVE_APPDATA_SCOPE: &str = "https://www.googleapis.com/auth/drive.appdata";
pub const USERINFO_PROFILE_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.profile";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub app_name: String,
    pub timezone: String,
    pub remote_file_name: String,
    #[serde(default)]
    pub legacy_remote_file_names: Vec<String>,
    pub local_slot: String,
    pub focus_minutes: u32,
    pub tick_millis: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "VibeTable".to_string(),
            timezone: "UTC".to_string(),
            remote_file_name: DEFAULT_REMOTE_FILE_NAME.to_string(),
            legacy_remote_file_names: Vec::new(),
            local_slot: DEFAULT_LOCAL_SLOT.to_string(),
            focus_minutes: 25,
            tick_millis: 1000,
        }
    }
}

impl AppSettings {
    pub fn parsed_timezone(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{}': {error}", self.timezone))
        })
    }

    pub fn focus_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.focus_minutes))
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_millis)
    }

    fn validate(&self) -> Result<(), InfraError> {
        if self.remote_file_name.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "remoteFileName must not be empty".to_string(),
            ));
        }
        if self.local_slot.trim().is_empty() {
            return Err(InfraError::InvalidConfig("localSlot must not be empty".to_string()));
        }
        if self.focus_minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "focusMinutes must be greater than zero".to_string(),
            ));
        }
        if self.tick_millis == 0 {
            return Err(InfraError::InvalidConfig(
                "tickMillis must be greater than zero".to_string(),
            ));
        }
        self.parsed_timezone()?;
        Ok(())
    }
}

fn default_app_json() -> Result<serde_json::Value, InfraError> {
    let mut value = serde_json::to_value(AppSettings::default())?;
    if let Some(object) = value.as_object_mut() {
        object.insert("schema".to_string(), serde_json::json!(SUPPORTED_SCHEMA));
    }
    Ok(value)
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json()?)?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    let path = config_dir.join(APP_JSON);
    let raw = read_config(&path)?;
    let settings: AppSettings = serde_json::from_value(raw).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid settings in {}: {error}", path.display()))
    })?;
    settings.validate()?;
    Ok(settings)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

pub fn load_oauth_settings_from_env() -> Result<OAuthSettings, InfraError> {
    load_oauth_settings_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_oauth_settings_from_lookup<F>(lookup: F) -> Result<OAuthSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(
        &lookup,
        &["VIBETABLE_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"],
        "google client id",
    )?;
    let client_secret = optional_lookup_value(
        &lookup,
        &["VIBETABLE_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"],
    )
    .unwrap_or_default();
    let redirect_uri = optional_lookup_value(
        &lookup,
        &["VIBETABLE_GOOGLE_REDIRECT_URI", "GOOGLE_REDIRECT_URI"],
    )
    .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    let scopes = optional_lookup_value(&lookup, &["VIBETABLE_GOOGLE_SCOPES", "GOOGLE_SCOPES"])
        .map(|raw| parse_scope_list(&raw))
        .filter(|scopes| !scopes.is_empty())
        .unwrap_or_else(|| {
            vec![
                DRIVE_APPDATA_SCOPE.to_string(),
                USERINFO_PROFILE_SCOPE.to_string(),
            ]
        });

    Ok(OAuthSettings {
        client_id,
        client_secret,
        redirect_uri,
        scopes,
    })
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
