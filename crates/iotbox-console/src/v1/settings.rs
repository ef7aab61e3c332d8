//! Settings view

use actix_web::{HttpResponse, Scope, get, web};
use serde::Serialize;

use crate::model::{ApiResult, AppState, Settings};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    #[serde(flatten)]
    pub settings: Settings,
    pub collection_size: usize,
    pub unit_count: usize,
    pub unit_definitions_version: Option<String>,
}

#[get("")]
async fn settings(data: web::Data<AppState>) -> HttpResponse {
    let view = SettingsView {
        settings: data.settings.as_ref().clone(),
        collection_size: data.acquisition.collection().len(),
        unit_count: data.units.len(),
        unit_definitions_version: data.units.version().map(str::to_string),
    };
    ApiResult::<SettingsView>::http_success(view)
}

pub fn routes() -> Scope {
    web::scope("/settings").service(settings)
}
