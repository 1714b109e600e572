mod api;
mod catalog;
mod config;
mod error;
mod quiz;

use std::path::Path;
use std::sync::Arc;

use warp::Filter;

use catalog::QuestionCatalog;
use config::Config;
use quiz::QuizServer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let catalog = QuestionCatalog::load(Path::new(&config.quiz.questions_dir));
    let server = Arc::new(QuizServer::new(catalog, config.quiz.host_grace()));

    let routes = api::routes::quiz_websocket_route(server.clone())
        .or(api::routes::quiz_list_route(server.clone()))
        .or(api::routes::history_entry_route(server.clone()))
        .or(api::routes::history_list_route(server))
        .or(api::routes::verify_teacher_route(config.quiz.teacher_password.clone()))
        .or(api::routes::health_check());

    tracing::info!(port = config.server.port, "Quiz server listening");
    warp::serve(routes).run(config.bind_address()).await;
}
