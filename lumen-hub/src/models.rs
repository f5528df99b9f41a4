/**
 * MODELS - Enregistrements durables des lampadaires
 *
 * RÔLE : Structure `Lamp` persistée par le store, statut et payloads HTTP.
 * Le statut mélange des valeurs connues du hub (OFF, CONNECTED, HORS_LIGNE)
 * et des états opérationnels libres remontés par la télémétrie (ON, ALERT...).
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LampStatus {
    Off,
    Connected,
    HorsLigne,
    /// État opérationnel remonté tel quel par le contrôleur
    Other(String),
}

impl LampStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LampStatus::Off => "OFF",
            LampStatus::Connected => "CONNECTED",
            LampStatus::HorsLigne => "HORS_LIGNE",
            LampStatus::Other(s) => s,
        }
    }

    /// Statut effectif vu par les lecteurs, selon la présence d'une connexion vivante
    pub fn effective(&self, live: bool) -> LampStatus {
        if !live {
            return LampStatus::HorsLigne;
        }
        match self {
            LampStatus::Off | LampStatus::HorsLigne => LampStatus::Connected,
            other => other.clone(),
        }
    }
}

impl From<String> for LampStatus {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "OFF" => LampStatus::Off,
            "CONNECTED" => LampStatus::Connected,
            "HORS_LIGNE" => LampStatus::HorsLigne,
            _ => LampStatus::Other(s),
        }
    }
}

impl From<&str> for LampStatus {
    fn from(s: &str) -> Self {
        LampStatus::from(s.to_string())
    }
}

impl From<LampStatus> for String {
    fn from(status: LampStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for LampStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Enregistrement durable d'un lampadaire installé
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lamp {
    pub id: String,            // LAMP-0001, jamais réutilisé
    pub mac: String,           // AA:BB:CC:DD:EE:FF, immuable
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub installed_at: OffsetDateTime,
    pub token: String,
    pub status: LampStatus,
    pub signal: Option<i32>,   // dBm
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Vue publique d'un lampadaire (sans token, statut effectif)
#[derive(Debug, Clone, Serialize)]
pub struct LampView {
    pub id: String,
    pub mac: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub status: LampStatus,
    pub stored_status: LampStatus,
    pub connected: bool,
    pub signal: Option<i32>,
    pub installed_at: String,
    pub updated_at: String,
}

impl Lamp {
    pub fn view(&self, live: bool) -> LampView {
        use time::format_description::well_known::Rfc3339;
        LampView {
            id: self.id.clone(),
            mac: self.mac.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            address: self.address.clone(),
            status: self.status.effective(live),
            stored_status: self.status.clone(),
            connected: live,
            signal: self.signal,
            installed_at: self.installed_at.format(&Rfc3339).unwrap_or_default(),
            updated_at: self.updated_at.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallRequest {
    pub mac: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LampUpdate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub status: Option<LampStatus>,
}

/// Normalise une adresse MAC en "AA:BB:CC:DD:EE:FF".
/// Accepte séparateurs ':' '-' ou aucun.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let hex: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let upper = hex.to_ascii_uppercase();
    let parts: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Some(parts.join(":"))
}
