//! Home view: what is attached to the master

use actix_web::{HttpResponse, Scope, get, web};
use serde::Serialize;

use iotbox_common::PortId;
use iotbox_persistence::{ConnectionPersistence, TIME_FORMAT};

use crate::error::AppError;
use crate::model::{ApiResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortView {
    pub port: PortId,
    pub connected: bool,
    pub sensor: Option<String>,
    /// File name of the matched IODD
    pub iodd: Option<String>,
    pub vendor_name: Option<String>,
    pub updated_at: Option<String>,
}

#[get("/ports")]
async fn ports(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let connections = data.persistence.connection_find_all().await?;

    let views = data
        .acquisition
        .ports()
        .into_iter()
        .map(|state| {
            let updated_at = connections
                .iter()
                .find(|c| c.port == state.port.get())
                .map(|c| c.updated_at.format(TIME_FORMAT).to_string());
            PortView {
                port: state.port,
                connected: state.connected,
                sensor: state.sensor,
                iodd: state.iodd.as_ref().map(|iodd| iodd.file_name()),
                vendor_name: state.iodd.and_then(|iodd| iodd.vendor_name),
                updated_at,
            }
        })
        .collect::<Vec<_>>();

    Ok(ApiResult::<Vec<PortView>>::http_success(views))
}

pub fn routes() -> Scope {
    web::scope("/home").service(ports)
}
