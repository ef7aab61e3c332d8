use actix_web::{HttpResponse, Responder, Scope, get, web};
use serde::Serialize;

use iotbox_persistence::PersistenceService;

use crate::error::SERVER_ERROR;
use crate::model::{ApiResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub database: ComponentStatus,
    pub acquisition: AcquisitionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionStatus {
    pub connected_ports: usize,
    pub collection_size: usize,
}

impl ComponentStatus {
    pub fn up() -> Self {
        Self {
            status: "UP".to_string(),
            message: None,
        }
    }

    pub fn down(message: String) -> Self {
        Self {
            status: "DOWN".to_string(),
            message: Some(message),
        }
    }
}

#[get("/liveness")]
async fn liveness() -> impl Responder {
    ApiResult::<String>::http_success("ok".to_string())
}

#[get("/readiness")]
async fn readiness(data: web::Data<AppState>) -> impl Responder {
    match data.persistence.health_check().await {
        Ok(()) => ApiResult::<String>::http_success("ok".to_string()),
        Err(e) => ApiResult::<String>::http_response(
            503,
            SERVER_ERROR.code,
            "not ready".to_string(),
            e.to_string(),
        ),
    }
}

#[get("")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let database = match data.persistence.health_check().await {
        Ok(()) => ComponentStatus::up(),
        Err(e) => ComponentStatus::down(format!("Database check failed: {}", e)),
    };
    let healthy = database.status == "UP";

    let health_status = HealthStatus {
        status: if healthy { "UP" } else { "DOWN" }.to_string(),
        database,
        acquisition: AcquisitionStatus {
            connected_ports: data.acquisition.connected_count(),
            collection_size: data.acquisition.collection().len(),
        },
    };

    if healthy {
        HttpResponse::Ok().json(health_status)
    } else {
        HttpResponse::ServiceUnavailable().json(health_status)
    }
}

pub fn routes() -> Scope {
    web::scope("/health")
        .service(health_check)
        .service(liveness)
        .service(readiness)
}
