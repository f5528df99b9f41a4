/**
 * ROUTER - Dispatch des messages entrants par `type`
 *
 * - register         → handshake (lifecycle)
 * - esp_data         → persistance statut/signal puis relais brut aux observateurs
 * - command          → un lampadaire (par identité) ou tous, puis command_sent
 * - interval_confirm → relais brut aux observateurs
 * - alert            → normalisée puis relayée aux observateurs
 * - autre            → ignoré
 *
 * Un message illisible est loggé ; la connexion reste ouverte et aucune
 * réponse n'est envoyée.
 */

use crate::hub::Hub;
use crate::lifecycle::{signal_dbm, Session};
use crate::models::normalize_mac;
use crate::protocol::{normalize_alert, now_rfc3339, parse_inbound, CommandTarget, Inbound, Outbound, Telemetry};
use serde_json::Value;
use tracing::{debug, error, warn};

impl Hub {
    /// Point d'entrée de chaque trame texte reçue sur une connexion
    pub async fn handle_text(&self, session: &mut Session, text: &str) {
        let msg = match parse_inbound(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("[router] {} sent an unreadable message: {}", session.connection().id(), e);
                return;
            }
        };
        debug!("[router] {} -> {}", session.connection().id(), msg.kind());

        match msg {
            Inbound::Register(req) => self.register(session, req).await,
            Inbound::EspData { telemetry, raw } => self.handle_telemetry(session, telemetry, raw).await,
            Inbound::Command { target, raw } => {
                self.handle_command(&target, &raw);
            }
            Inbound::IntervalConfirm(raw) => {
                self.broadcast_observers(&raw);
            }
            Inbound::Alert(raw) => self.handle_alert(session, raw),
            Inbound::Unknown(kind) => {
                debug!("[router] ignoring unknown message type `{}`", kind);
            }
        }
    }

    async fn handle_telemetry(&self, session: &Session, telemetry: Telemetry, raw: Value) {
        let mac = session
            .device_mac()
            .map(str::to_string)
            .or_else(|| telemetry.mac.as_deref().and_then(normalize_mac));

        let has_update = telemetry.status.is_some() || telemetry.signal.is_some();
        match mac {
            Some(mac) if has_update => {
                let signal = telemetry.signal.map(signal_dbm);
                if let Err(e) = self.store().record_telemetry(&mac, telemetry.status, signal).await {
                    error!("[router] failed to persist telemetry for {}: {}", mac, e);
                }
            }
            Some(_) => {}
            None => warn!(
                "[router] telemetry from {} without a known device, relaying only",
                session.connection().id()
            ),
        }

        self.broadcast_observers(&raw);
    }

    /// Route une commande puis confirme aux observateurs, livrée ou non.
    /// Renvoie le nombre de lampadaires atteints.
    pub fn handle_command(&self, target: &CommandTarget, raw: &Value) -> usize {
        let text = raw.to_string();
        let delivered = match target {
            CommandTarget::All => self.fan_out_devices(&text),
            CommandTarget::Lamp(id) => {
                let conn = self
                    .registry
                    .lock()
                    .find_by_identity(id)
                    .map(|entry| entry.connection.clone());
                match conn {
                    Some(conn) => {
                        if conn.send_text(text) {
                            1
                        } else {
                            warn!("[router] command for {}: connection no longer open", id);
                            0
                        }
                    }
                    None => {
                        warn!("[router] command for {}: no live connection", id);
                        0
                    }
                }
            }
            CommandTarget::Unmatchable(id) => {
                warn!("[router] command with non-text identity {} matches no device", id);
                0
            }
        };

        self.broadcast_observers(&Outbound::CommandSent {
            id: raw.get("id").cloned(),
            command: raw.get("command").cloned().unwrap_or(Value::Null),
            delivered,
            timestamp: now_rfc3339(),
        });
        delivered
    }

    fn handle_alert(&self, session: &Session, raw: Value) {
        let sender = session
            .device_mac()
            .and_then(|mac| self.live_entry(mac).map(|entry| (entry.id, mac.to_string())));
        let alert = normalize_alert(raw, sender.as_ref().map(|(id, mac)| (id.as_str(), mac.as_str())));
        self.broadcast_observers(&alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{drain_json, drain_types};
    use crate::connection::Connection;
    use crate::hub::testing::{hub, install};
    use crate::models::LampStatus;
    use tokio::sync::mpsc::UnboundedReceiver;

    type Rx = UnboundedReceiver<crate::connection::Frame>;

    async fn observer(hub: &Hub) -> (Session, Rx) {
        let (conn, mut rx) = Connection::new();
        let mut session = Session::new(conn);
        hub.handle_text(&mut session, r#"{"type":"register","role":"observer"}"#).await;
        let _ = drain_types(&mut rx);
        (session, rx)
    }

    async fn device(hub: &Hub, mac: &str) -> (Session, Rx) {
        let (conn, mut rx) = Connection::new();
        let mut session = Session::new(conn);
        let text = format!(r#"{{"type":"register","role":"device","mac":"{}"}}"#, mac);
        hub.handle_text(&mut session, &text).await;
        let _ = drain_types(&mut rx);
        (session, rx)
    }

    #[tokio::test]
    async fn test_malformed_input_is_ignored() {
        let hub = hub();
        let (conn, mut rx) = Connection::new();
        let mut session = Session::new(conn.clone());

        hub.handle_text(&mut session, "{{{ not json").await;
        hub.handle_text(&mut session, r#"{"no_type": true}"#).await;
        hub.handle_text(&mut session, r#"{"type":"teleport"}"#).await;

        assert!(conn.is_open());
        assert!(!session.is_closed());
        assert!(drain_types(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_directed_command_reaches_one_device() {
        let hub = hub();
        let a = install(&hub, "AA:BB:CC:DD:EE:01").await;
        install(&hub, "AA:BB:CC:DD:EE:02").await;
        let (_obs, mut obs_rx) = observer(&hub).await;
        let (_da, mut rx_a) = device(&hub, "AA:BB:CC:DD:EE:01").await;
        let (_db, mut rx_b) = device(&hub, "AA:BB:CC:DD:EE:02").await;
        let _ = drain_types(&mut obs_rx);

        let (mut ctrl, _ctrl_rx) = observer(&hub).await;
        let text = format!(r#"{{"type":"command","id":"{}","command":"ON"}}"#, a.id);
        hub.handle_text(&mut ctrl, &text).await;

        let got = drain_json(&mut rx_a);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["command"], "ON");
        assert!(drain_types(&mut rx_b).is_empty());

        let events = drain_json(&mut obs_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "command_sent");
        assert_eq!(events[0]["delivered"], 1);
        assert_eq!(events[0]["id"], a.id.as_str());
    }

    #[tokio::test]
    async fn test_directed_command_without_target_still_confirms() {
        let hub = hub();
        let a = install(&hub, "AA:BB:CC:DD:EE:01").await;
        let (_obs, mut obs_rx) = observer(&hub).await;
        let (_d, mut rx_dev) = device(&hub, "AA:BB:CC:DD:EE:01").await;
        let _ = drain_types(&mut obs_rx);

        let delivered = hub.handle_command(
            &CommandTarget::Lamp("LAMP-4242".into()),
            &serde_json::json!({"type": "command", "id": "LAMP-4242", "command": "OFF"}),
        );
        assert_eq!(delivered, 0);
        assert!(drain_types(&mut rx_dev).is_empty());
        assert_eq!(drain_types(&mut obs_rx), vec!["command_sent"]);

        // identité numérique : jamais égale à la chaîne
        let numeric = a.id.trim_start_matches("LAMP-").parse::<u64>().unwrap();
        let raw = serde_json::json!({"type": "command", "id": numeric, "command": "OFF"});
        let (mut ctrl, _rx) = observer(&hub).await;
        let _ = drain_types(&mut obs_rx);
        hub.handle_text(&mut ctrl, &raw.to_string()).await;
        assert!(drain_types(&mut rx_dev).is_empty());
        let events = drain_json(&mut obs_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["delivered"], 0);
    }

    #[tokio::test]
    async fn test_undirected_command_reaches_every_open_device_once() {
        for count in [0usize, 1, 5] {
            let hub = hub();
            let (_obs, mut obs_rx) = observer(&hub).await;
            let mut devices = Vec::new();
            for i in 0..count {
                let mac = format!("AA:BB:CC:DD:EE:{:02X}", i + 1);
                install(&hub, &mac).await;
                devices.push(device(&hub, &mac).await);
            }
            let _ = drain_types(&mut obs_rx);

            let (mut ctrl, _rx) = observer(&hub).await;
            let _ = drain_types(&mut obs_rx);
            hub.handle_text(&mut ctrl, r#"{"type":"command","id":"all","command":"OFF"}"#).await;

            for (_, rx) in devices.iter_mut() {
                assert_eq!(drain_types(rx), vec!["command"]);
            }
            let events = drain_json(&mut obs_rx);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0]["delivered"], count);
        }
    }

    #[tokio::test]
    async fn test_undirected_command_skips_closed_devices() {
        let hub = hub();
        install(&hub, "AA:BB:CC:DD:EE:01").await;
        install(&hub, "AA:BB:CC:DD:EE:02").await;
        let (_d1, mut rx1) = device(&hub, "AA:BB:CC:DD:EE:01").await;
        let (d2, mut rx2) = device(&hub, "AA:BB:CC:DD:EE:02").await;
        d2.connection().close();
        let _ = drain_types(&mut rx2);

        let delivered = hub.handle_command(&CommandTarget::All, &serde_json::json!({"type": "command"}));
        assert_eq!(delivered, 1);
        assert_eq!(drain_types(&mut rx1), vec!["command"]);
        assert!(drain_types(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_telemetry_persists_and_relays() {
        let hub = hub();
        let lamp = install(&hub, "AA:BB:CC:DD:EE:01").await;
        let (_obs, mut obs_rx) = observer(&hub).await;
        let (mut dev, _rx) = device(&hub, "AA:BB:CC:DD:EE:01").await;
        let _ = drain_types(&mut obs_rx);

        hub.handle_text(&mut dev, r#"{"type":"esp_data","status":"ON","rssi":-58,"lux":12}"#).await;

        let stored = hub.store().get(&lamp.id).await.unwrap();
        assert_eq!(stored.status, LampStatus::from("ON"));
        assert_eq!(stored.signal, Some(-58));

        let relayed = drain_json(&mut obs_rx);
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0]["type"], "esp_data");
        assert_eq!(relayed[0]["lux"], 12);
    }

    #[tokio::test]
    async fn test_telemetry_with_mistyped_fields_is_still_relayed() {
        let hub = hub();
        let lamp = install(&hub, "AA:BB:CC:DD:EE:01").await;
        let (_obs, mut obs_rx) = observer(&hub).await;
        let (mut dev, _rx) = device(&hub, "AA:BB:CC:DD:EE:01").await;
        let _ = drain_types(&mut obs_rx);

        hub.handle_text(&mut dev, r#"{"type":"esp_data","status":1,"lux":12}"#).await;
        assert_eq!(drain_types(&mut obs_rx), vec!["esp_data"]);
        assert_eq!(hub.store().get(&lamp.id).await.unwrap().status, LampStatus::Off);

        // le champ lisible est gardé, l'autre ignoré
        hub.handle_text(&mut dev, r#"{"type":"esp_data","status":"ON","rssi":"-64"}"#).await;
        hub.handle_text(&mut dev, r#"{"type":"esp_data","status":"ALERT","rssi":"faible"}"#).await;
        let stored = hub.store().get(&lamp.id).await.unwrap();
        assert_eq!(stored.status, LampStatus::from("ALERT"));
        assert_eq!(stored.signal, Some(-64));
        assert_eq!(drain_types(&mut obs_rx), vec!["esp_data", "esp_data"]);
    }

    #[tokio::test]
    async fn test_unknown_device_with_mistyped_signal_is_rejected() {
        let hub = hub();
        let (conn, mut rx) = Connection::new();
        let mut session = Session::new(conn.clone());

        hub.handle_text(
            &mut session,
            r#"{"type":"register","role":"device","mac":"AA:BB:CC:DD:EE:99","rssi":"-70"}"#,
        )
        .await;

        assert!(session.is_closed());
        assert!(!conn.is_open());
        assert_eq!(drain_types(&mut rx), vec!["error"]);

        let (conn, mut rx) = Connection::new();
        let mut session = Session::new(conn);
        hub.handle_text(&mut session, r#"{"type":"register","role":"device","mac":42}"#).await;
        assert!(session.is_closed());
        assert_eq!(drain_types(&mut rx), vec!["error"]);
        assert_eq!(hub.live_count(), 0);
    }

    #[tokio::test]
    async fn test_telemetry_falls_back_to_message_mac() {
        let hub = hub();
        let lamp = install(&hub, "AA:BB:CC:DD:EE:09").await;
        let (conn, _rx) = Connection::new();
        let mut anonymous = Session::new(conn);

        hub.handle_text(&mut anonymous, r#"{"type":"esp_data","mac":"aa:bb:cc:dd:ee:09","status":"ALERT"}"#).await;
        assert_eq!(hub.store().get(&lamp.id).await.unwrap().status, LampStatus::from("ALERT"));
    }

    #[tokio::test]
    async fn test_interval_confirm_and_alert_are_relayed() {
        let hub = hub();
        let lamp = install(&hub, "AA:BB:CC:DD:EE:01").await;
        let (_obs, mut obs_rx) = observer(&hub).await;
        let (mut dev, _rx) = device(&hub, "AA:BB:CC:DD:EE:01").await;
        let _ = drain_types(&mut obs_rx);

        hub.handle_text(&mut dev, r#"{"type":"interval_confirm","interval":60}"#).await;
        hub.handle_text(&mut dev, r#"{"type":"alert","message":"Surtension"}"#).await;

        let events = drain_json(&mut obs_rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], serde_json::json!({"type": "interval_confirm", "interval": 60}));
        assert_eq!(events[1]["type"], "alert");
        assert_eq!(events[1]["message"], "Surtension");
        assert_eq!(events[1]["level"], "warning");
        assert_eq!(events[1]["id"], lamp.id.as_str());
        assert_eq!(events[1]["mac"], lamp.mac.as_str());
    }
}
