use actix_web::web;

use crate::services::queue_service::{job_status, process_jobs, queue_health, queue_stats, run_cleanup};

pub fn queue_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .route("/worker/process", web::post().to(process_jobs))
            .route("/queue/stats", web::get().to(queue_stats))
            .route("/queue/health", web::get().to(queue_health))
            .route("/queue/jobs/{id}", web::get().to(job_status))
            .route("/queue/cleanup", web::post().to(run_cleanup)),
    );
}
