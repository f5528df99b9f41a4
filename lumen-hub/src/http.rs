/**
 * API REST LUMEN - Administration du parc de lampadaires
 *
 * RÔLE :
 * Surface HTTP autour du store : lister, consulter, installer, éditer et
 * supprimer des lampadaires. Chaque mutation est relayée aux applis mobiles
 * connectées (lamp_added / lamp_updated / lamp_deleted).
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, même routeur que l'endpoint WebSocket /ws
 * - Statut renvoyé = statut effectif (réconcilié avec le registre des connexions)
 * - Le token n'apparaît que dans la réponse d'installation
 */

use crate::health::{HealthTracker, HubHealth};
use crate::hub::SharedHub;
use crate::models::{InstallRequest, LampUpdate, LampView};
use crate::store::StoreError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub hub: SharedHub,
    pub health_tracker: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/ws", get(crate::ws::ws_handler))
        .route("/lamps", get(list_lamps).post(install_lamp))
        .route(
            "/lamps/{id}",
            get(get_lamp).put(update_lamp).delete(delete_lamp),
        )
        .with_state(app_state)
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(e: StoreError) -> ApiError {
    let code = match &e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::DuplicateMac(_) => StatusCode::CONFLICT,
        StoreError::InvalidMac(_) => StatusCode::BAD_REQUEST,
        StoreError::Io(_) | StoreError::Serialization(_) => {
            error!("[http] store failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (code, Json(json!({ "error": e.to_string() })))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<HubHealth> {
    Json(app.health_tracker.get_health(&app.hub).await)
}

// GET /lamps
async fn list_lamps(State(app): State<AppState>) -> Json<Vec<LampView>> {
    let lamps = app.hub.store().list().await;
    Json(lamps.iter().map(|l| app.hub.view(l)).collect())
}

// GET /lamps/{id}
async fn get_lamp(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LampView>, ApiError> {
    let lamp = app
        .hub
        .store()
        .get(&id)
        .await
        .ok_or_else(|| api_error(StoreError::NotFound(id)))?;
    Ok(Json(app.hub.view(&lamp)))
}

// POST /lamps (installation)
async fn install_lamp(
    State(app): State<AppState>,
    Json(req): Json<InstallRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let lamp = app.hub.store().install(req).await.map_err(api_error)?;
    app.hub.notify_lamp_added(&lamp);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": lamp.id, "mac": lamp.mac, "token": lamp.token })),
    ))
}

// PUT /lamps/{id}
async fn update_lamp(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<LampUpdate>,
) -> Result<Json<LampView>, ApiError> {
    let lamp = app.hub.store().update(&id, patch).await.map_err(api_error)?;
    app.hub.notify_lamp_updated(&lamp);
    Ok(Json(app.hub.view(&lamp)))
}

// DELETE /lamps/{id}
async fn delete_lamp(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let lamp = app.hub.store().delete(&id).await.map_err(api_error)?;
    app.hub.notify_lamp_deleted(&lamp);
    Ok(Json(json!({ "status": "deleted", "id": lamp.id })))
}
