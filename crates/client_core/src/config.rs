//! Client settings: compiled defaults, overridden by `smartstudy.toml`,
//! overridden by `SMARTSTUDY_*` environment variables. Malformed input
//! degrades to the previous layer instead of failing startup.

use std::{collections::HashMap, fs};

pub const SETTINGS_FILE: &str = "smartstudy.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub user_id: String,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            user_id: "local-user-01".into(),
            request_timeout_secs: 30,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("server_url").and_then(|v| v.as_str()) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("user_id").and_then(|v| v.as_str()) {
        settings.user_id = v.to_string();
    }
    if let Some(v) = file_cfg
        .get("request_timeout_secs")
        .and_then(|v| v.as_integer())
    {
        if v > 0 {
            settings.request_timeout_secs = v as u64;
        }
    }
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SMARTSTUDY_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("SMARTSTUDY_USER_ID") {
        settings.user_id = v;
    }
    if let Some(v) = lookup("SMARTSTUDY_REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            if parsed > 0 {
                settings.request_timeout_secs = parsed;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
