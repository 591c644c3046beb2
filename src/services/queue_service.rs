// src/services/queue_service.rs
use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use serde_json::json;
use tracing::error;

use crate::basic_auth::{check_basic_auth, unauthorized_response};
use crate::config::BasicAuthConfig;
use crate::health::HealthStatus;
use crate::queue::QueueClient;
use crate::runner::{Worker, WorkerOptions, WorkerRequest};

/// Shared state for every queue route.
#[derive(Clone)]
pub struct AppState {
    pub client: QueueClient,
    pub worker: Worker,
    pub auth: Option<BasicAuthConfig>,
}

impl AppState {
    pub fn new(client: QueueClient) -> Self {
        let auth = client.config().basic_auth.clone();
        Self {
            worker: Worker::new(client.clone()),
            client,
            auth,
        }
    }

    fn authorized(&self, req: &HttpRequest) -> bool {
        check_basic_auth(req, self.auth.as_ref())
    }
}

fn store_error(context: &str, err: impl std::fmt::Display) -> HttpResponse {
    error!(error = %err, "{context}");
    HttpResponse::InternalServerError().json(json!({ "error": format!("{context}: {err}") }))
}

/// Runs one bounded worker pass. An empty or absent body uses the defaults.
pub async fn process_jobs(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: Option<web::Json<WorkerRequest>>,
) -> impl Responder {
    if !state.authorized(&req) {
        return unauthorized_response();
    }
    let options = WorkerOptions::from(body.map(web::Json::into_inner).unwrap_or_default());
    let summary = state.worker.process_jobs(options).await;
    HttpResponse::Ok().json(summary)
}

pub async fn queue_stats(req: HttpRequest, state: web::Data<AppState>) -> impl Responder {
    if !state.authorized(&req) {
        return unauthorized_response();
    }
    match state.client.get_stats().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(err) => store_error("failed to read queue stats", err),
    }
}

pub async fn queue_health(req: HttpRequest, state: web::Data<AppState>) -> impl Responder {
    if !state.authorized(&req) {
        return unauthorized_response();
    }
    let report = state.client.health_check().await;
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    HttpResponse::build(code).json(report)
}

pub async fn job_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    if !state.authorized(&req) {
        return unauthorized_response();
    }
    let job_id = path.into_inner();
    match state.client.get_status(&job_id).await {
        Ok(Some(report)) => HttpResponse::Ok().json(report),
        Ok(None) => HttpResponse::NotFound().json(json!({ "error": "job not found", "id": job_id })),
        Err(err) => store_error("failed to read job status", err),
    }
}

pub async fn run_cleanup(req: HttpRequest, state: web::Data<AppState>) -> impl Responder {
    if !state.authorized(&req) {
        return unauthorized_response();
    }
    match state.client.cleanup().await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(err) => store_error("queue cleanup failed", err),
    }
}
