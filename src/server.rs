//! Read-only HTTP surface publishing every meter's readings in Home Assistant
//! state format.

use crate::readings::{publish, PublishedReading, ReadingKind};
use crate::refresh::WaterMeterCoordinator;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_derive::Serialize;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

type Meters = Arc<Vec<Arc<WaterMeterCoordinator>>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: Value,
    pub attributes: Map<String, Value>,
    pub last_changed: Option<String>,
    pub last_updated: Option<String>,
}

pub fn router(meters: Vec<Arc<WaterMeterCoordinator>>) -> Router {
    Router::new()
        .route("/api/states", get(all_states))
        .route("/api/states/:entity_id", get(one_state))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(meters))
}

pub async fn serve(bind_addr: SocketAddr, meters: Vec<Arc<WaterMeterCoordinator>>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "serving meter readings");
    axum::serve(listener, router(meters)).await?;
    Ok(())
}

async fn all_states(State(meters): State<Meters>) -> Json<Vec<EntityState>> {
    Json(meters.iter().flat_map(|m| entity_states(m)).collect())
}

async fn one_state(
    State(meters): State<Meters>,
    Path(entity_id): Path<String>,
) -> Result<Json<EntityState>, StatusCode> {
    meters
        .iter()
        .flat_map(|m| entity_states(m))
        .find(|s| s.entity_id == entity_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

fn entity_states(coordinator: &WaterMeterCoordinator) -> Vec<EntityState> {
    let snapshot = coordinator.snapshot();
    let identity = coordinator.identity();
    let device = identity.device_info();
    let updated = snapshot.last_updated.map(|t| t.to_rfc3339());

    publish(identity, snapshot.current_record())
        .into_iter()
        .map(|reading| {
            let entity_id = format!("sensor.{}", reading.unique_id);
            EntityState {
                entity_id,
                attributes: attributes(&reading, &device.name, &device.identifier),
                state: reading.state,
                last_changed: updated.clone(),
                last_updated: updated.clone(),
            }
        })
        .collect()
}

fn attributes(reading: &PublishedReading, device_name: &str, device_id: &str) -> Map<String, Value> {
    let mut attributes = reading.attributes.clone();
    attributes
        .entry("friendly_name")
        .or_insert_with(|| Value::from(format!("{} {}", device_name, reading.name)));
    attributes.insert("icon".to_string(), Value::from(reading.icon));
    if let Some(unit) = reading.unit {
        attributes.insert("unit_of_measurement".to_string(), Value::from(unit));
    }
    match reading.kind {
        ReadingKind::Monetary => {
            attributes.insert("device_class".to_string(), Value::from("monetary"));
        }
        ReadingKind::Volume => {
            attributes.insert("device_class".to_string(), Value::from("water"));
        }
        ReadingKind::Text | ReadingKind::Series => {}
    }
    attributes.insert("device_id".to_string(), Value::from(device_id));
    attributes
}
