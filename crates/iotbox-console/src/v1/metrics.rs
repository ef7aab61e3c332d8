//! Prometheus metrics endpoint

use actix_web::{HttpResponse, Responder, Scope, get, web};

use iotbox_master::METRICS;
use iotbox_persistence::PersistenceService;

use crate::model::AppState;

#[get("")]
pub async fn metrics(data: web::Data<AppState>) -> impl Responder {
    let is_healthy = data.persistence.health_check().await.is_ok();
    let body = METRICS.to_prometheus_format(is_healthy);

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(body)
}

pub fn routes() -> Scope {
    web::scope("/metrics").service(metrics)
}

#[cfg(test)]
mod tests {
    use actix_web::{App, test};

    use super::*;
    use crate::v1::testing::context;

    #[actix_web::test]
    async fn test_metrics() {
        let ctx = context(false, None).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ctx.state.clone()))
                .service(routes()),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("iotbox_poll_cycles_total"));
        assert!(body.contains("iotbox_healthy 1"));
    }
}
