/**
 * LAMP STORE - Registre durable des lampadaires installés
 *
 * RÔLE : Lecture par identité ou par MAC, installation, mises à jour de statut
 * et édition administrative. Source de vérité durable (le registre des
 * connexions, lui, ne vit qu'en mémoire).
 *
 * FONCTIONNEMENT :
 * - Document JSON unique { next_seq, lamps } réécrit à chaque mutation
 *   (fichier temporaire + rename)
 * - Cache mémoire derrière un RwLock tokio : les lectures ne touchent pas le disque
 * - Installation transactionnelle : rollback mémoire si l'écriture échoue
 * - Mises à jour de statut non transactionnelles : la mémoire garde la valeur,
 *   l'erreur d'écriture est remontée à l'appelant
 */

use crate::models::{normalize_mac, InstallRequest, Lamp, LampStatus, LampUpdate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Lamp not found: {0}")]
    NotFound(String),
    #[error("MAC address already installed: {0}")]
    DuplicateMac(String),
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    next_seq: u64,
    lamps: BTreeMap<String, Lamp>,
}

impl StoreData {
    fn by_mac(&self, mac: &str) -> Option<&Lamp> {
        self.lamps.values().find(|l| l.mac == mac)
    }

    fn by_mac_mut(&mut self, mac: &str) -> Option<&mut Lamp> {
        self.lamps.values_mut().find(|l| l.mac == mac)
    }
}

pub struct LampStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
    /// Nombre de mutations validées depuis le démarrage
    revision: AtomicU64,
}

impl LampStore {
    /// Store sans fichier, utilisé par les tests
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            path: None,
            revision: AtomicU64::new(0),
        }
    }

    /// Ouvre (ou crée) le document JSON à `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let data = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            if content.trim().is_empty() {
                StoreData::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            info!("[store] no existing lamp file at {:?}, starting fresh", path);
            StoreData::default()
        };

        info!("[store] loaded {} lamps from {:?}", data.lamps.len(), path);
        Ok(Self {
            data: RwLock::new(data),
            path: Some(path),
            revision: AtomicU64::new(0),
        })
    }

    async fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::Relaxed);
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    pub async fn list(&self) -> Vec<Lamp> {
        self.data.read().await.lamps.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.lamps.len()
    }

    pub async fn get(&self, id: &str) -> Option<Lamp> {
        self.data.read().await.lamps.get(id).cloned()
    }

    /// Lecture par adresse réseau ; une MAC illisible n'appartient à aucun lampadaire
    pub async fn find_by_mac(&self, mac: &str) -> Option<Lamp> {
        let mac = normalize_mac(mac)?;
        self.data.read().await.by_mac(&mac).cloned()
    }

    #[cfg(test)]
    pub async fn exists(&self, mac: &str) -> bool {
        self.find_by_mac(mac).await.is_some()
    }

    /// Installe un nouveau lampadaire : identité et token générés ici
    pub async fn install(&self, req: InstallRequest) -> Result<Lamp, StoreError> {
        let mac = normalize_mac(&req.mac).ok_or_else(|| StoreError::InvalidMac(req.mac.clone()))?;

        let mut data = self.data.write().await;
        if data.by_mac(&mac).is_some() {
            return Err(StoreError::DuplicateMac(mac));
        }

        let seq = data.next_seq + 1;
        let now = OffsetDateTime::now_utc();
        let lamp = Lamp {
            id: format!("LAMP-{:04}", seq),
            mac,
            latitude: req.latitude,
            longitude: req.longitude,
            address: req.address,
            installed_at: now,
            token: Uuid::new_v4().simple().to_string(),
            status: LampStatus::Off,
            signal: None,
            updated_at: now,
        };

        data.next_seq = seq;
        data.lamps.insert(lamp.id.clone(), lamp.clone());

        if let Err(e) = self.persist(&data).await {
            // rollback : l'installation est tout-ou-rien
            data.lamps.remove(&lamp.id);
            data.next_seq = seq - 1;
            return Err(e);
        }

        self.bump();
        info!("[store] installed lamp {} ({})", lamp.id, lamp.mac);
        Ok(lamp)
    }

    /// Édition administrative (coordonnées, adresse, statut)
    pub async fn update(&self, id: &str, patch: LampUpdate) -> Result<Lamp, StoreError> {
        let mut data = self.data.write().await;
        let lamp = data
            .lamps
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(lat) = patch.latitude {
            lamp.latitude = lat;
        }
        if let Some(lng) = patch.longitude {
            lamp.longitude = lng;
        }
        if let Some(address) = patch.address {
            lamp.address = Some(address);
        }
        if let Some(status) = patch.status {
            lamp.status = status;
        }
        lamp.updated_at = OffsetDateTime::now_utc();
        let updated = lamp.clone();

        self.persist(&data).await?;
        self.bump();
        Ok(updated)
    }

    /// Télémétrie : seuls les champs fournis sont écrits
    pub async fn record_telemetry(
        &self,
        mac: &str,
        status: Option<LampStatus>,
        signal: Option<i32>,
    ) -> Result<Lamp, StoreError> {
        let mac = normalize_mac(mac).ok_or_else(|| StoreError::InvalidMac(mac.to_string()))?;
        let mut data = self.data.write().await;
        let lamp = data
            .by_mac_mut(&mac)
            .ok_or_else(|| StoreError::NotFound(mac.clone()))?;

        if let Some(status) = status {
            lamp.status = status;
        }
        if signal.is_some() {
            lamp.signal = signal;
        }
        lamp.updated_at = OffsetDateTime::now_utc();
        let updated = lamp.clone();

        self.persist(&data).await?;
        self.bump();
        debug!("[store] telemetry for {} -> {}", updated.id, updated.status);
        Ok(updated)
    }

    /// Passe le lampadaire en HORS_LIGNE et remet le signal à zéro
    pub async fn mark_offline(&self, mac: &str) -> Result<Lamp, StoreError> {
        let mut data = self.data.write().await;
        let lamp = data
            .by_mac_mut(mac)
            .ok_or_else(|| StoreError::NotFound(mac.to_string()))?;

        lamp.status = LampStatus::HorsLigne;
        lamp.signal = None;
        lamp.updated_at = OffsetDateTime::now_utc();
        let updated = lamp.clone();

        self.persist(&data).await?;
        self.bump();
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<Lamp, StoreError> {
        let mut data = self.data.write().await;
        let removed = data
            .lamps
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Err(e) = self.persist(&data).await {
            data.lamps.insert(removed.id.clone(), removed);
            return Err(e);
        }

        self.bump();
        info!("[store] deleted lamp {} ({})", removed.id, removed.mac);
        Ok(removed)
    }
}
