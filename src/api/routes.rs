use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use warp::http::StatusCode;
use warp::Filter;

use super::websocket;
use crate::quiz::QuizServer;

/// WebSocket endpoint carrying the whole quiz event protocol.
pub fn quiz_websocket_route(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::ws())
        .and(with_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<QuizServer>| {
            ws.on_upgrade(move |websocket| websocket::handle_quiz_websocket(websocket, server))
        })
}

/// Read-only listing of the loaded quiz sets for the teacher dashboard.
pub fn quiz_list_route(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "quizzes")
        .and(warp::get())
        .and(with_server(server))
        .map(|server: Arc<QuizServer>| warp::reply::json(&server.catalog().list()))
}

/// All completed quizzes, most recent first.
pub fn history_list_route(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "quiz-history")
        .and(warp::get())
        .and(with_server(server))
        .and_then(|server: Arc<QuizServer>| async move {
            Ok::<_, Infallible>(warp::reply::json(&server.history().list().await))
        })
}

/// One completed quiz by its history id (the room code it played under).
pub fn history_entry_route(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "quiz-history" / String)
        .and(warp::get())
        .and(with_server(server))
        .and_then(|id: String, server: Arc<QuizServer>| async move {
            let reply = match server.history().get(&id).await {
                Some(entry) => {
                    warp::reply::with_status(warp::reply::json(&entry), StatusCode::OK)
                }
                None => warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({ "error": "History not found" })),
                    StatusCode::NOT_FOUND,
                ),
            };
            Ok::<_, Infallible>(reply)
        })
}

#[derive(Debug, Deserialize)]
struct VerifyTeacherRequest {
    password: String,
}

/// Shared-password check for the teacher screens. Session handling is
/// the UI layer's business; this only answers yes or no.
pub fn verify_teacher_route(
    teacher_password: String,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "verify-teacher")
        .and(warp::post())
        .and(warp::body::json())
        .map(move |body: VerifyTeacherRequest| {
            if body.password == teacher_password {
                warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({
                        "success": true,
                        "redirect": "/teacher#dashboard"
                    })),
                    StatusCode::OK,
                )
            } else {
                warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({
                        "success": false,
                        "message": "Incorrect password"
                    })),
                    StatusCode::UNAUTHORIZED,
                )
            }
        })
}

pub fn health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "service": "Quiz Server",
            "version": "1.0.0"
        }))
    })
}

fn with_server(
    server: Arc<QuizServer>,
) -> impl Filter<Extract = (Arc<QuizServer>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
