/**
 * LIFECYCLE - Handshake, heartbeat et fermeture des connexions
 *
 * États d'une connexion : Unregistered → Device | Observer → Closed,
 * sans retour possible depuis Closed.
 *
 * - Un lampadaire inconnu du store reçoit une erreur et est déconnecté.
 * - Un observateur est accepté sans contrôle.
 * - À la fermeture (propre ou non), l'entrée du registre est retirée, le
 *   store passe en HORS_LIGNE et les observateurs sont prévenus. Un échec
 *   d'écriture est loggé, le reste continue.
 */

use crate::connection::Connection;
use crate::hub::Hub;
use crate::models::LampStatus;
use crate::protocol::{Outbound, RegisterRequest, Role};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    Unregistered,
    Device { mac: String },
    Observer,
    Closed,
}

/// État d'une connexion, possédé par sa boucle de lecture
#[derive(Debug)]
pub struct Session {
    conn: Connection,
    state: ConnState,
}

impl Session {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            state: ConnState::Unregistered,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    #[cfg(test)]
    pub fn state(&self) -> &ConnState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// MAC du lampadaire si la connexion en a enregistré un
    pub fn device_mac(&self) -> Option<&str> {
        match &self.state {
            ConnState::Device { mac } => Some(mac),
            _ => None,
        }
    }
}

pub(crate) fn signal_dbm(value: f64) -> i32 {
    value.round() as i32
}

impl Hub {
    pub async fn register(&self, session: &mut Session, req: RegisterRequest) {
        if session.state != ConnState::Unregistered {
            warn!(
                "[lifecycle] {} already in state {:?}, ignoring register",
                session.conn.id(),
                session.state
            );
            return;
        }

        match req.role {
            Role::Observer => self.register_observer(session),
            Role::Device => self.register_device(session, req).await,
        }
    }

    fn register_observer(&self, session: &mut Session) {
        self.observers.lock().add(session.conn.clone());
        let _ = session.conn.send_json(&Outbound::Welcome {
            role: Role::Observer,
            id: None,
            token: None,
            latitude: None,
            longitude: None,
            address: None,
            connected_lamps: Some(self.live_count()),
        });
        session.state = ConnState::Observer;
        info!("[lifecycle] observer registered ({})", session.conn.id());
    }

    fn reject_device(&self, session: &mut Session, message: String) {
        let _ = session.conn.send_json(&Outbound::error(message));
        session.conn.close();
        session.state = ConnState::Closed;
    }

    async fn register_device(&self, session: &mut Session, req: RegisterRequest) {
        let Some(raw_mac) = req.mac else {
            warn!("[lifecycle] {} device register without mac", session.conn.id());
            self.reject_device(session, "missing mac address".to_string());
            return;
        };

        let Some(lamp) = self.store().find_by_mac(&raw_mac).await else {
            warn!("[lifecycle] unknown device {} on {}, closing", raw_mac, session.conn.id());
            self.reject_device(session, format!("unknown device: {}", raw_mac));
            return;
        };

        let superseded = self.registry.lock().register(
            &lamp.mac,
            &lamp.id,
            &lamp.token,
            session.conn.clone(),
        );
        if let Some(old) = superseded {
            warn!(
                "[lifecycle] {} ({}) re-registered on {}, superseding {} (left open)",
                lamp.id,
                lamp.mac,
                session.conn.id(),
                old.connection.id()
            );
        }

        if let Some(signal) = req.signal {
            if let Err(e) = self
                .store()
                .record_telemetry(&lamp.mac, None, Some(signal_dbm(signal)))
                .await
            {
                error!("[lifecycle] failed to persist signal for {}: {}", lamp.id, e);
            }
        }

        let _ = session.conn.send_json(&Outbound::Welcome {
            role: Role::Device,
            id: Some(lamp.id.clone()),
            token: Some(lamp.token.clone()),
            latitude: Some(lamp.latitude),
            longitude: Some(lamp.longitude),
            address: lamp.address.clone(),
            connected_lamps: None,
        });

        self.broadcast_observers(&Outbound::LampConnected {
            id: lamp.id.clone(),
            mac: lamp.mac.clone(),
            status: LampStatus::Connected,
        });

        info!("[lifecycle] device {} connected ({})", lamp.id, lamp.mac);
        session.state = ConnState::Device { mac: lamp.mac };
    }

    /// Réconciliation à la fermeture du transport, quelle qu'en soit la cause
    pub async fn disconnect(&self, session: &mut Session) {
        let conn_id = session.conn.id();
        session.conn.mark_closed();

        let removed = {
            let mut registry = self.registry.lock();
            registry
                .lookup_by_connection(conn_id)
                .and_then(|mac| registry.remove(&mac).map(|entry| (mac, entry)))
        };

        if let Some((mac, entry)) = removed {
            if let Err(e) = self.store().mark_offline(&mac).await {
                error!("[lifecycle] failed to mark {} offline: {}", entry.id, e);
            }
            let reached = self.broadcast_observers(&Outbound::LampDisconnected {
                id: entry.id.clone(),
                mac: mac.clone(),
                status: LampStatus::HorsLigne,
            });
            info!(
                "[lifecycle] device {} ({}) disconnected, {} observers notified",
                entry.id, mac, reached
            );
        }

        if self.observers.lock().remove(conn_id) {
            debug!("[lifecycle] observer {} removed", conn_id);
        }
        session.state = ConnState::Closed;
    }
}

/// Ping périodique sortant ; s'arrête dès que la connexion n'est plus ouverte
pub fn spawn_heartbeat(conn: Connection, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !conn.is_open() || !conn.send_json(&Outbound::ping()) {
                debug!("[lifecycle] heartbeat stopped for {}", conn.id());
                break;
            }
        }
    })
}
