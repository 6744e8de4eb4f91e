use actix_web::{web, HttpResponse, Responder};
use log::{debug, error, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::capture::manager::AnalysisManager;
use crate::capture::session::SessionInfo;
use crate::models::message::Subject;

/// Response for listing in-flight sessions
#[derive(Serialize)]
struct SessionsResponse {
    active: usize,
    sessions: Vec<SessionInfo>,
}

/// Response for the liveness check
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    active_sessions: usize,
}

/// Dispatch one analysis event body to the manager
pub async fn post_event(
    manager: web::Data<Arc<AnalysisManager>>,
    path: web::Path<String>,
    body: web::Bytes,
) -> impl Responder {
    let subject: Subject = match path.into_inner().parse() {
        Ok(subject) => subject,
        Err(message) => {
            warn!("Rejected event: {}", message);
            return HttpResponse::NotFound().json(serde_json::json!({
                "status": "error",
                "message": message
            }));
        }
    };

    debug!("Received {} event, {} bytes", subject, body.len());

    // Finish walks the whole capture; keep it off the async workers
    let manager = manager.into_inner();
    let reply = web::block(move || manager.handle_event(subject, &body)).await;

    match reply {
        Ok(Some(reply)) => HttpResponse::Ok()
            .content_type("application/json")
            .body(reply),
        Ok(None) => HttpResponse::NoContent().finish(),
        Err(e) => {
            error!("Event handler for {} failed: {}", subject, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("internal error: {}", e)
            }))
        }
    }
}

/// List in-flight analysis sessions
pub async fn list_sessions(manager: web::Data<Arc<AnalysisManager>>) -> impl Responder {
    let sessions = manager.sessions();

    HttpResponse::Ok().json(SessionsResponse {
        active: sessions.len(),
        sessions,
    })
}

/// Liveness check with the number of sessions still buffering
pub async fn health(manager: web::Data<Arc<AnalysisManager>>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: manager.session_count(),
    })
}
