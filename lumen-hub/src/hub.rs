/**
 * HUB - Composant central injecté dans les handlers WS et HTTP
 *
 * RÔLE : Possède le registre des connexions, l'ensemble des observateurs et
 * le store durable. Les modules `lifecycle` et `router` ajoutent leurs
 * opérations sur ce même type.
 *
 * CONCURRENCE : registre et observateurs derrière des Mutex parking_lot,
 * jamais tenus à travers un `.await` (les seules suspensions sont les appels
 * au store).
 */

use crate::connection::Connection;
use crate::models::{Lamp, LampView};
use crate::observers::ObserverSet;
use crate::protocol::Outbound;
use crate::registry::{ConnectionRegistry, LiveEntry};
use crate::store::LampStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub struct Hub {
    pub(crate) registry: Mutex<ConnectionRegistry>,
    pub(crate) observers: Mutex<ObserverSet>,
    store: Arc<LampStore>,
    heartbeat_interval: Duration,
}

pub type SharedHub = Arc<Hub>;

impl Hub {
    pub fn new(store: Arc<LampStore>, heartbeat_interval: Duration) -> Self {
        Self {
            registry: Mutex::new(ConnectionRegistry::new()),
            observers: Mutex::new(ObserverSet::new()),
            store,
            heartbeat_interval,
        }
    }

    pub fn store(&self) -> &LampStore {
        &self.store
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn is_live(&self, mac: &str) -> bool {
        self.registry.lock().is_live(mac)
    }

    pub fn live_entry(&self, mac: &str) -> Option<LiveEntry> {
        self.registry.lock().get(mac).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Vue avec statut effectif, réconcilié à la lecture
    pub fn view(&self, lamp: &Lamp) -> LampView {
        lamp.view(self.is_live(&lamp.mac))
    }

    /// Fan-out best-effort vers les observateurs ouverts
    pub fn broadcast_observers<T: Serialize>(&self, message: &T) -> usize {
        self.observers.lock().broadcast(message)
    }

    /// Fan-out best-effort vers chaque connexion de lampadaire ouverte
    pub fn fan_out_devices(&self, text: &str) -> usize {
        let targets: Vec<Connection> = self.registry.lock().device_connections();
        targets
            .iter()
            .filter(|conn| conn.is_open())
            .filter(|conn| conn.send_text(text.to_string()))
            .count()
    }

    pub fn notify_lamp_added(&self, lamp: &Lamp) -> usize {
        self.broadcast_observers(&Outbound::LampAdded { lamp: self.view(lamp) })
    }

    pub fn notify_lamp_updated(&self, lamp: &Lamp) -> usize {
        self.broadcast_observers(&Outbound::LampUpdated { lamp: self.view(lamp) })
    }

    pub fn notify_lamp_deleted(&self, lamp: &Lamp) -> usize {
        self.broadcast_observers(&Outbound::LampDeleted {
            id: lamp.id.clone(),
            mac: lamp.mac.clone(),
        })
    }
}
