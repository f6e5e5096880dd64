use std::path::Path;

use serde::Deserialize;

/// Tunables loaded from `lark_config.json` in the data dir. Every field has a
/// default so a missing or partial file behaves like stock configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct CoreConfig {
    pub history_page_size: usize,
    /// Seconds after which an un-refreshed typing signal counts as stopped.
    pub typing_expiry_secs: i64,
    /// Minimum gap between outbound typing signals per chat.
    pub typing_debounce_secs: i64,
    pub call_connect_timeout_secs: u64,
    /// How long a confirmed client temp id stays in the dedup map.
    pub temp_id_ttl_secs: i64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history_page_size: 50,
            typing_expiry_secs: 10,
            typing_debounce_secs: 5,
            call_connect_timeout_secs: 30,
            temp_id_ttl_secs: 300,
        }
    }
}

pub(crate) fn load_core_config(data_dir: &str) -> CoreConfig {
    let path = Path::new(data_dir).join("lark_config.json");
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(%e, path = %path.display(), "invalid config, using defaults");
                CoreConfig::default()
            }
        },
        Err(_) => CoreConfig::default(),
    }
}
