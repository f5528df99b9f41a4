/**
 * CONNECTION REGISTRY - Quels lampadaires sont joignables maintenant
 *
 * RÔLE : MAC → connexion vivante + identité résolue au handshake.
 * Reconstruit à vide à chaque démarrage : tout lampadaire est hors ligne
 * jusqu'à ce qu'il se ré-enregistre.
 *
 * Une seconde inscription pour la même MAC remplace l'entrée sans fermer
 * l'ancienne connexion ; celle-ci ne retrouvera plus d'entrée à sa fermeture.
 */

use crate::connection::{ConnId, Connection};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct LiveEntry {
    pub connection: Connection,
    pub id: String,
    pub token: String,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<String, LiveEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère ou remplace ; renvoie l'entrée supplantée (non fermée)
    pub fn register(
        &mut self,
        mac: &str,
        id: &str,
        token: &str,
        connection: Connection,
    ) -> Option<LiveEntry> {
        let entry = LiveEntry {
            connection,
            id: id.to_string(),
            token: token.to_string(),
        };
        self.entries.insert(mac.to_string(), entry)
    }

    pub fn lookup_by_connection(&self, conn: ConnId) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.connection.id() == conn)
            .map(|(mac, _)| mac.clone())
    }

    pub fn remove(&mut self, mac: &str) -> Option<LiveEntry> {
        self.entries.remove(mac)
    }

    pub fn is_live(&self, mac: &str) -> bool {
        self.entries.contains_key(mac)
    }

    pub fn get(&self, mac: &str) -> Option<&LiveEntry> {
        self.entries.get(mac)
    }

    /// Première entrée dont l'identité correspond (comparaison textuelle)
    pub fn find_by_identity(&self, id: &str) -> Option<&LiveEntry> {
        self.entries.values().find(|entry| entry.id == id)
    }

    /// Copie des connexions de lampadaires, pour diffuser sans garder le verrou
    pub fn device_connections(&self) -> Vec<Connection> {
        self.entries.values().map(|e| e.connection.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
