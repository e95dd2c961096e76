use crate::engine::RouterEngine;
use crate::errors::{ApiError, RouterError};
use crate::types::RouteOptions;
use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::Utc;
use serde::Serialize;
use std::time::Instant;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| crate::errors::json_error(err)))
        .service(post_route_select)
        .service(get_provider_stats)
        .service(post_health_checks)
        .service(get_health);
}

#[post("/route/select")]
async fn post_route_select(
    engine: web::Data<RouterEngine>,
    payload: web::Json<RouteOptions>,
) -> Result<HttpResponse, ApiError> {
    let started = Instant::now();
    let options = payload.into_inner();
    let decision = engine.select_provider(&options).await.ok_or_else(|| {
        RouterError::NoProvidersAvailable("no enabled provider matches the request".into())
    })?;
    let elapsed = started.elapsed();

    let mut response = HttpResponse::Ok();
    response.append_header(("Router-Latency", format!("{}ms", elapsed.as_millis())));
    response.append_header(("Catalog-Revision", engine.revision().to_string()));
    response.append_header(("X-Route-Strategy", decision.strategy.as_str()));
    response.append_header(("X-Resolved-Provider", decision.primary_provider.name.clone()));
    if let Some(rule) = &decision.rule {
        response.append_header(("X-Route-Rule", rule.name.clone()));
    }
    Ok(response.json(decision))
}

#[get("/providers/stats")]
async fn get_provider_stats(engine: web::Data<RouterEngine>) -> impl Responder {
    HttpResponse::Ok().json(engine.get_provider_stats().await)
}

#[post("/providers/health-checks")]
async fn post_health_checks(engine: web::Data<RouterEngine>) -> impl Responder {
    HttpResponse::Ok().json(engine.run_health_checks().await)
}

#[get("/healthz")]
async fn get_health(engine: web::Data<RouterEngine>) -> impl Responder {
    #[derive(Serialize)]
    struct HealthResponse {
        status: &'static str,
        catalog_revision: String,
        active_providers: usize,
        timestamp: String,
    }

    let active = engine
        .get_provider_stats()
        .await
        .iter()
        .filter(|stats| stats.status == crate::types::ProviderStatus::Active)
        .count();
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        catalog_revision: engine.revision().to_string(),
        active_providers: active,
        timestamp: Utc::now().to_rfc3339(),
    })
}
