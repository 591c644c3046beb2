pub mod queue_routes;

use actix_web::{web, App, HttpServer};
use tracing::info;

use crate::queue::QueueClient;
use crate::services::queue_service::AppState;

pub use queue_routes::queue_routes;

/// Serves the queue routes until the server is stopped.
pub async fn serve(client: QueueClient, bind: &str) -> std::io::Result<()> {
    let state = web::Data::new(AppState::new(client));
    info!(%bind, "starting queue http server");
    HttpServer::new(move || App::new().app_data(state.clone()).configure(queue_routes))
        .bind(bind)?
        .run()
        .await
}
