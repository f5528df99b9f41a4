/**
 * CONNECTION - Poignée de connexion WebSocket côté hub
 *
 * Chaque socket acceptée reçoit un `ConnId` opaque ; c'est lui, et non
 * l'adresse mémoire de la poignée, qui sert de clé de suppression.
 * Les envois passent par un canal non borné vidé par la tâche d'écriture
 * du socket : pas d'accusé, pas de contre-pression.
 */

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub fn next() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Trame sortante, traduite en message WebSocket par la tâche d'écriture
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Close,
}

#[derive(Clone)]
pub struct Connection {
    id: ConnId,
    tx: mpsc::UnboundedSender<Frame>,
    open: Arc<AtomicBool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: ConnId::next(),
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Ouverte tant qu'aucune fermeture n'a été demandée et que l'écrivain tourne
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Envoi best-effort d'un texte brut ; `false` si la connexion est fermée
    pub fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tx.send(Frame::Text(text)).is_ok()
    }

    pub fn send_json<T: Serialize>(&self, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!("[conn] {} failed to encode outbound message: {}", self.id, e);
                false
            }
        }
    }

    /// Demande la fermeture : trame Close puis plus aucun envoi
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Frame::Close);
        }
    }

    /// Marque la connexion fermée côté transport (socket déjà terminée)
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}
