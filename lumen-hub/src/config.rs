use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    pub listen_port: u16,
    pub store_path: PathBuf,
    pub heartbeat_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            store_path: PathBuf::from("./data/lamps.json"),
            heartbeat_interval_secs: 30,
        }
    }
}

impl HubConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Surcharges par variables d'environnement (PORT, LUMEN_STORE_PATH, HEARTBEAT_INTERVAL_SECS)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) => self.listen_port = p,
                Err(_) => warn!("[config] PORT invalide: {port}"),
            }
        }
        if let Some(path) = lookup("LUMEN_STORE_PATH") {
            if !path.trim().is_empty() {
                self.store_path = PathBuf::from(path.trim());
            }
        }
        if let Some(secs) = lookup("HEARTBEAT_INTERVAL_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(s) => self.heartbeat_interval_secs = s,
                Err(_) => warn!("[config] HEARTBEAT_INTERVAL_SECS invalide: {secs}"),
            }
        }
    }
}

fn parse_config(txt: &str) -> HubConfig {
    if txt.trim().is_empty() {
        return HubConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!("[config] config invalide: {e}");
        HubConfig::default()
    })
}

pub async fn load_config() -> HubConfig {
    let path = std::env::var("LUMEN_HUB_CONFIG").unwrap_or_else(|_| "lumen-hub.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        warn!("[config] pas de {path}, usage config par défaut");
        HubConfig::default()
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    cfg
}
