use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

use crate::api::handlers::events::{health, list_sessions, post_event};
use crate::models::message::Subject;

/// Root endpoint to provide information about the API
async fn index() -> impl Responder {
    let subjects: Vec<&str> = Subject::ALL.iter().map(|s| s.as_str()).collect();

    HttpResponse::Ok().json(json!({
        "name": "pcap-analyzer API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Chunked packet capture reassembly and analysis",
        "subjects": subjects,
        "endpoints": [
            {
                "path": "/api/events/{subject}",
                "method": "POST",
                "description": "Deliver a start, chunk or finish event and receive its reply"
            },
            {
                "path": "/api/sessions",
                "method": "GET",
                "description": "List in-flight analysis sessions"
            },
            {
                "path": "/health",
                "method": "GET",
                "description": "Service status and active session count"
            }
        ]
    }))
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint
        .route("/", web::get().to(index))
        .route("/health", web::get().to(health))
        .service(
            web::scope("/api")
                .route("/events/{subject}", web::post().to(post_event))
                .route("/sessions", web::get().to(list_sessions)),
        );
}
