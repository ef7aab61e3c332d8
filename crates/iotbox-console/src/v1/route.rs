//! Dashboard routing configuration

use actix_web::{HttpResponse, Scope, get, http::header, web};

use super::{collection, health, home, metrics, monitor, settings};

/// Largest accepted IODD archive upload
const MAX_ARCHIVE_SIZE: usize = 32 * 1024 * 1024;

const HOME_PATH: &str = "/v1/console/home/ports";

/// Create the v1 console routes
pub fn routes() -> Scope {
    web::scope("/v1/console")
        .app_data(web::PayloadConfig::new(MAX_ARCHIVE_SIZE))
        .service(home::routes())
        .service(monitor::routes())
        .service(collection::routes())
        .service(settings::routes())
        .service(health::routes())
        .service(metrics::routes())
}

#[get("/")]
pub async fn index() -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, HOME_PATH))
        .finish()
}
