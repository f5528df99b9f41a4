/**
 * PROTOCOLE WS - Messages JSON échangés avec contrôleurs et applis mobiles
 *
 * Chaque trame texte est un objet JSON avec un champ `type` obligatoire.
 * Entrants : register, esp_data, command, interval_confirm, alert.
 * Sortants : welcome, error, ping, lamp_*, command_sent + pass-through.
 */

use crate::models::{LampStatus, LampView};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Sentinelle d'une commande adressée à tous les lampadaires
pub const ALL_LAMPS: &str = "all";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("missing or non-string `type` field")]
    MissingType,
    #[error("malformed `{kind}` message: {source}")]
    Shape {
        kind: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "esp32", alias = "lamp")]
    Device,
    #[serde(alias = "mobile", alias = "app")]
    Observer,
}

/// Seul `role` est strict ; un champ optionnel mal typé n'empêche pas le handshake
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub role: Role,
    pub mac: Option<String>,
    pub signal: Option<f64>,
}

impl RegisterRequest {
    fn from_raw(raw: &Value) -> Result<Self, ProtocolError> {
        let role = shaped("register", raw.get("role").unwrap_or(&Value::Null))?;
        // une MAC non textuelle reste présente : elle ne correspondra à aucun lampadaire
        let mac = match raw.get("mac") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        Ok(Self {
            role,
            mac,
            signal: signal_field(raw),
        })
    }
}

/// Champs exploitables d'un `esp_data`, extraits sans rejeter le message
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub mac: Option<String>,
    pub status: Option<LampStatus>,
    pub signal: Option<f64>,
}

impl Telemetry {
    fn from_raw(raw: &Value) -> Self {
        Self {
            mac: raw.get("mac").and_then(Value::as_str).map(str::to_string),
            status: raw
                .get("status")
                .and_then(Value::as_str)
                .map(LampStatus::from),
            signal: signal_field(raw),
        }
    }
}

fn signal_field(raw: &Value) -> Option<f64> {
    let value = raw.get("signal").or_else(|| raw.get("rssi"))?;
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandTarget {
    All,
    Lamp(String),
    /// Identité non textuelle : ne correspond à aucun lampadaire
    Unmatchable(Value),
}

impl CommandTarget {
    fn from_field(field: Option<&Value>) -> Self {
        match field {
            None | Some(Value::Null) => CommandTarget::All,
            Some(Value::String(s)) if s.is_empty() || s.eq_ignore_ascii_case(ALL_LAMPS) => {
                CommandTarget::All
            }
            Some(Value::String(s)) => CommandTarget::Lamp(s.clone()),
            Some(other) => CommandTarget::Unmatchable(other.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Inbound {
    Register(RegisterRequest),
    EspData { telemetry: Telemetry, raw: Value },
    Command { target: CommandTarget, raw: Value },
    IntervalConfirm(Value),
    Alert(Value),
    Unknown(String),
}

impl Inbound {
    pub fn kind(&self) -> &str {
        match self {
            Inbound::Register(_) => "register",
            Inbound::EspData { .. } => "esp_data",
            Inbound::Command { .. } => "command",
            Inbound::IntervalConfirm(_) => "interval_confirm",
            Inbound::Alert(_) => "alert",
            Inbound::Unknown(kind) => kind,
        }
    }
}

fn shaped<T: for<'de> Deserialize<'de>>(kind: &'static str, raw: &Value) -> Result<T, ProtocolError> {
    T::deserialize(raw).map_err(|source| ProtocolError::Shape { kind, source })
}

/// Décode une trame texte entrante
pub fn parse_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    let raw: Value = serde_json::from_str(text)?;
    let kind = match &raw {
        Value::Object(obj) => obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string(),
        _ => return Err(ProtocolError::NotAnObject),
    };

    let msg = match kind.as_str() {
        "register" => Inbound::Register(RegisterRequest::from_raw(&raw)?),
        "esp_data" => Inbound::EspData {
            telemetry: Telemetry::from_raw(&raw),
            raw,
        },
        "command" => Inbound::Command {
            target: CommandTarget::from_field(raw.get("id")),
            raw,
        },
        "interval_confirm" => Inbound::IntervalConfirm(raw),
        "alert" => Inbound::Alert(raw),
        _ => Inbound::Unknown(kind),
    };
    Ok(msg)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Welcome {
        role: Role,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        latitude: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        longitude: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        connected_lamps: Option<usize>,
    },
    Error {
        message: String,
    },
    Ping {
        timestamp: String,
    },
    LampAdded {
        lamp: LampView,
    },
    LampUpdated {
        lamp: LampView,
    },
    LampDeleted {
        id: String,
        mac: String,
    },
    LampConnected {
        id: String,
        mac: String,
        status: LampStatus,
    },
    LampDisconnected {
        id: String,
        mac: String,
        status: LampStatus,
    },
    CommandSent {
        id: Option<Value>,
        command: Value,
        delivered: usize,
        timestamp: String,
    },
}

impl Outbound {
    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error {
            message: message.into(),
        }
    }

    pub fn ping() -> Self {
        Outbound::Ping { timestamp: now_rfc3339() }
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Complète une alerte avec les valeurs par défaut avant diffusion
pub fn normalize_alert(raw: Value, sender: Option<(&str, &str)>) -> Value {
    let mut obj = match raw {
        Value::Object(obj) => obj,
        _ => Map::new(),
    };

    obj.insert("type".into(), Value::from("alert"));
    fill_default(&mut obj, "level", || Value::from("warning"));
    fill_default(&mut obj, "message", || Value::from("Alerte"));
    fill_default(&mut obj, "timestamp", || Value::from(now_rfc3339()));
    if let Some((id, mac)) = sender {
        fill_default(&mut obj, "id", || Value::from(id));
        fill_default(&mut obj, "mac", || Value::from(mac));
    }
    Value::Object(obj)
}

fn fill_default(obj: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) {
    let missing = obj.get(key).map_or(true, Value::is_null);
    if missing {
        obj.insert(key.to_string(), value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_register() {
        let msg = parse_inbound(r#"{"type":"register","role":"esp32","mac":"AA:BB:CC:DD:EE:FF","rssi":-70}"#).unwrap();
        match msg {
            Inbound::Register(req) => {
                assert_eq!(req.role, Role::Device);
                assert_eq!(req.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
                assert_eq!(req.signal, Some(-70.0));
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg = parse_inbound(r#"{"type":"register","role":"mobile"}"#).unwrap();
        assert!(matches!(msg, Inbound::Register(RegisterRequest { role: Role::Observer, .. })));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_inbound("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(parse_inbound("[1,2]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(parse_inbound(r#"{"id":"x"}"#), Err(ProtocolError::MissingType)));
        assert!(matches!(
            parse_inbound(r#"{"type":"register","role":"toaster"}"#),
            Err(ProtocolError::Shape { kind: "register", .. })
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"register","mac":"AA:BB:CC:DD:EE:FF"}"#),
            Err(ProtocolError::Shape { kind: "register", .. })
        ));
    }

    #[test]
    fn test_register_optional_fields_are_lenient() {
        let req = match parse_inbound(r#"{"type":"register","role":"device","mac":"AA:BB:CC:DD:EE:99","rssi":"-70"}"#).unwrap() {
            Inbound::Register(req) => req,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(req.signal, Some(-70.0));

        let req = match parse_inbound(r#"{"type":"register","role":"device","mac":42,"signal":[1]}"#).unwrap() {
            Inbound::Register(req) => req,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(req.mac.as_deref(), Some("42"));
        assert_eq!(req.signal, None);
    }

    #[test]
    fn test_telemetry_mistyped_fields_are_dropped() {
        let msg = parse_inbound(r#"{"type":"esp_data","status":1,"rssi":"weak","mac":7,"lux":12}"#).unwrap();
        match msg {
            Inbound::EspData { telemetry, raw } => {
                assert!(telemetry.status.is_none());
                assert!(telemetry.signal.is_none());
                assert!(telemetry.mac.is_none());
                assert_eq!(raw["lux"], 12);
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg = parse_inbound(r#"{"type":"esp_data","status":"ALERT","signal":-61.6}"#).unwrap();
        match msg {
            Inbound::EspData { telemetry, .. } => {
                assert_eq!(telemetry.status, Some(LampStatus::Other("ALERT".into())));
                assert_eq!(telemetry.signal, Some(-61.6));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg = parse_inbound(r#"{"type":"selfie"}"#).unwrap();
        assert_eq!(msg.kind(), "selfie");
        assert!(matches!(msg, Inbound::Unknown(_)));
    }

    #[test]
    fn test_command_targets() {
        let target = |text: &str| match parse_inbound(text).unwrap() {
            Inbound::Command { target, .. } => target,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(target(r#"{"type":"command","command":"ON"}"#), CommandTarget::All);
        assert_eq!(target(r#"{"type":"command","id":null}"#), CommandTarget::All);
        assert_eq!(target(r#"{"type":"command","id":"all"}"#), CommandTarget::All);
        assert_eq!(
            target(r#"{"type":"command","id":"LAMP-0001"}"#),
            CommandTarget::Lamp("LAMP-0001".into())
        );
        assert_eq!(
            target(r#"{"type":"command","id":1}"#),
            CommandTarget::Unmatchable(json!(1))
        );
    }

    #[test]
    fn test_outbound_shape() {
        let v = serde_json::to_value(Outbound::LampDisconnected {
            id: "LAMP-0001".into(),
            mac: "AA:BB:CC:DD:EE:FF".into(),
            status: LampStatus::HorsLigne,
        })
        .unwrap();
        assert_eq!(v["type"], "lamp_disconnected");
        assert_eq!(v["status"], "HORS_LIGNE");

        let v = serde_json::to_value(Outbound::Welcome {
            role: Role::Observer,
            id: None,
            token: None,
            latitude: None,
            longitude: None,
            address: None,
            connected_lamps: Some(2),
        })
        .unwrap();
        assert_eq!(v, json!({"type": "welcome", "role": "observer", "connected_lamps": 2}));
    }

    #[test]
    fn test_normalize_alert_defaults() {
        let alert = normalize_alert(json!({"type": "alert", "message": "Lampe grillée"}), Some(("LAMP-0003", "AA:BB:CC:DD:EE:03")));
        assert_eq!(alert["message"], "Lampe grillée");
        assert_eq!(alert["level"], "warning");
        assert_eq!(alert["id"], "LAMP-0003");
        assert_eq!(alert["mac"], "AA:BB:CC:DD:EE:03");
        assert!(alert["timestamp"].is_string());

        let alert = normalize_alert(json!({"type": "alert", "level": "critical", "id": "LAMP-0009"}), None);
        assert_eq!(alert["level"], "critical");
        assert_eq!(alert["message"], "Alerte");
        assert_eq!(alert["id"], "LAMP-0009");
        assert!(alert.get("mac").is_none());
    }
}
