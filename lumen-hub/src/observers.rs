/**
 * OBSERVERS - Applis de supervision connectées
 *
 * Aucune identité : une connexion entre à l'inscription et sort à sa
 * fermeture, par `ConnId`. La diffusion saute les connexions déjà fermées
 * sans les retirer ; c'est l'événement de fermeture qui les élague.
 */

use crate::connection::{ConnId, Connection};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Default)]
pub struct ObserverSet {
    observers: HashMap<ConnId, Connection>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, connection: Connection) {
        self.observers.insert(connection.id(), connection);
    }

    pub fn remove(&mut self, conn: ConnId) -> bool {
        self.observers.remove(&conn).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, conn: ConnId) -> bool {
        self.observers.contains_key(&conn)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Diffusion best-effort ; renvoie le nombre d'observateurs atteints
    pub fn broadcast<T: Serialize>(&self, message: &T) -> usize {
        if self.observers.is_empty() {
            return 0;
        }
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("[observers] failed to encode broadcast: {}", e);
                return 0;
            }
        };
        self.observers
            .values()
            .filter(|conn| conn.is_open())
            .filter(|conn| conn.send_text(text.clone()))
            .count()
    }
}
