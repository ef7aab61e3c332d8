//! Response wrapper and shared handler state

use std::sync::Arc;

use actix_web::{HttpResponse, http::StatusCode};
use serde::{Deserialize, Serialize};

use iotbox_iodd::{IoddFetcher, UnitDefinitions};
use iotbox_master::AcquisitionState;
use iotbox_persistence::PersistenceService;

/// API result wrapper
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResult<T> {
    pub code: i32,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data,
        }
    }

    pub fn http_success(data: T) -> HttpResponse {
        HttpResponse::Ok().json(Self::success(data))
    }

    pub fn http_response(status: u16, code: i32, message: String, data: T) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
            .json(Self {
                code,
                message,
                data,
            })
    }
}

/// Effective settings shown on the settings view
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub version: String,
    pub master_kind: String,
    pub master_url: String,
    pub port_count: u8,
    pub poll_interval_ms: u64,
    pub database_url: String,
    pub collection_dir: String,
    pub unit_definitions: String,
    pub fetch_url_template: Option<String>,
    pub bridge_enabled: bool,
    pub bridge_mappings: usize,
}

/// State shared by all dashboard handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub persistence: Arc<dyn PersistenceService>,
    pub acquisition: Arc<AcquisitionState>,
    pub units: Arc<UnitDefinitions>,
    /// `None` when no fetch url template is configured
    pub fetcher: Option<Arc<dyn IoddFetcher>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("settings", &self.settings)
            .field("persistence", &"<dyn PersistenceService>")
            .field("ports", &self.acquisition.ports().len())
            .field("units", &self.units.len())
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}
