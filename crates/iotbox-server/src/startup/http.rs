//! HTTP server setup for the dashboard API.

use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, dev::Service, middleware::Logger, web};

use iotbox_console::{AppState, index, v1_routes};
use iotbox_master::METRICS;

/// Creates and binds the dashboard HTTP server.
///
/// Serves the `/v1/console` API and redirects `/` to the home view.
pub fn dashboard_server(
    app_state: Arc<AppState>,
    address: String,
    port: u16,
) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap_fn(|req, srv| {
                METRICS.inc_http_requests();
                srv.call(req)
            })
            .app_data(web::Data::from(app_state.clone()))
            .service(index)
            .service(v1_routes())
    })
    .disable_signals()
    .bind((address, port))?
    .run())
}
