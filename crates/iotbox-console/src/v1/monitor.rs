//! Monitor view: recorded sensor values

use actix_web::{HttpResponse, Scope, get, web};
use serde::{Deserialize, Serialize};

use iotbox_common::PortId;
use iotbox_persistence::{Page, Reading, ReadingPersistence};

use crate::error::AppError;
use crate::model::{ApiResult, AppState};

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParam {
    pub page_no: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestReading {
    pub port: PortId,
    pub sensor: Option<String>,
    pub reading: Option<Reading>,
}

/// Latest reading of every connected port
#[get("/latest")]
async fn latest(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let mut latest = Vec::new();
    for state in data.acquisition.ports().into_iter().filter(|p| p.connected) {
        let reading = data.persistence.reading_find_latest(state.port).await?;
        latest.push(LatestReading {
            port: state.port,
            sensor: state.sensor,
            reading,
        });
    }
    Ok(ApiResult::<Vec<LatestReading>>::http_success(latest))
}

#[get("/ports/{port}/readings")]
async fn readings(
    data: web::Data<AppState>,
    path: web::Path<u8>,
    params: web::Query<PageParam>,
) -> Result<HttpResponse, AppError> {
    let port = PortId::new(path.into_inner())?;
    let page_no = params.page_no.unwrap_or(1);
    let page_size = params
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let page = data
        .persistence
        .reading_find_page(port, page_no, page_size)
        .await?;
    Ok(ApiResult::<Page<Reading>>::http_success(page))
}

pub fn routes() -> Scope {
    web::scope("/monitor").service(latest).service(readings)
}
