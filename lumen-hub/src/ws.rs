/**
 * WS - Endpoint `/ws` partagé par les contrôleurs et les applis mobiles
 *
 * Une tâche d'écriture par socket vide le canal de la `Connection` ; la
 * boucle de lecture traite les trames dans l'ordre d'arrivée puis déclenche
 * la réconciliation de fermeture, quelle que soit la cause de la sortie.
 */

use crate::connection::{Connection, Frame};
use crate::http::AppState;
use crate::hub::SharedHub;
use crate::lifecycle::{spawn_heartbeat, Session};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app.hub))
}

async fn handle_socket(socket: WebSocket, hub: SharedHub) {
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut rx) = Connection::new();
    let conn_id = conn.id();
    info!("[ws] {} opened", conn_id);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let msg = match frame {
                Frame::Text(text) => Message::Text(text.into()),
                Frame::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let heartbeat = spawn_heartbeat(conn.clone(), hub.heartbeat_interval());
    let mut session = Session::new(conn);

    while let Some(incoming) = receiver.next().await {
        match incoming {
            Ok(Message::Text(text)) => hub.handle_text(&mut session, text.as_str()).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => hub.handle_text(&mut session, text).await,
                Err(_) => debug!("[ws] {} sent non UTF-8 binary frame, ignored", conn_id),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("[ws] {} transport error: {}", conn_id, e);
                break;
            }
        }
        if session.is_closed() {
            break;
        }
    }

    session.connection().close();
    hub.disconnect(&mut session).await;
    heartbeat.abort();
    drop(session);
    let _ = writer.await;
    info!("[ws] {} closed", conn_id);
}
