//! API endpoints for the admission control service.
//!
//! This module provides the HTTP surface: a public health check, the
//! Prometheus metrics render, and the admin alert endpoints used by security
//! dashboards and investigators. The alert scope is wrapped in the admission
//! guard and requires a credential carrying the `admin` permission.

pub mod middleware;

use actix_web::{dev::HttpServiceFactory, web, HttpMessage, HttpRequest, HttpResponse, Responder};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::activity_log::ActivityLog;
use crate::core::alert_engine::{
    AlertEngine, AlertError, AlertType, AutomatedAction, NewAlert, ResolutionType, Severity,
};
use crate::core::credentials::Permission;
use crate::core::request_gate::{CredentialContext, GateOptions, RequestGate};
use middleware::AdmissionGuard;

/// Shared handler state
pub struct ApiState {
    pub engine: Arc<AlertEngine>,
}

/// Public routes: health check and metrics render.
pub fn public_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/v1/health").route(web::get().to(health)))
        .service(web::resource("/metrics").route(web::get().to(metrics)));
}

/// The admin alert surface, wrapped in the admission guard.
pub fn alert_scope(gate: Arc<RequestGate>, log: Arc<dyn ActivityLog>) -> impl HttpServiceFactory {
    web::scope("/api/v1/alerts")
        .wrap(AdmissionGuard::new(
            gate,
            log,
            GateOptions::required(vec![Permission::Admin]),
        ))
        .route("", web::get().to(list_alerts))
        .route("", web::post().to(create_alert))
        .route("/{id}", web::get().to(get_alert))
        .route("/{id}/notes", web::post().to(add_note))
        .route("/{id}/actions", web::post().to(execute_action))
        .route("/{id}/investigate", web::post().to(begin_investigation))
        .route("/{id}/escalate", web::post().to(escalate_alert))
        .route("/{id}/resolve", web::post().to(resolve_alert))
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Error body for alert-surface failures
#[derive(Serialize)]
struct ApiMessage {
    success: bool,
    error: String,
}

/// Alert creation request
#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub source_ip: Option<String>,
    pub endpoint: Option<String>,
    pub confidence: Option<u8>,
    pub user_id: Option<Uuid>,
    pub credential_id: Option<Uuid>,
    pub description: Option<String>,
}

/// Investigator note request
#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub body: String,
}

/// Manual action request
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: AutomatedAction,
}

/// Escalation request
#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub target: String,
}

/// Resolution request
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolution_type: ResolutionType,
    pub summary: Option<String>,
    pub escalated_to: Option<String>,
}

/// Health check endpoint
async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus metrics render
async fn metrics(handle: web::Data<PrometheusHandle>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

async fn list_alerts(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.engine.list().await)
}

async fn get_alert(state: web::Data<ApiState>, path: web::Path<Uuid>) -> impl Responder {
    match state.engine.get(path.into_inner()).await {
        Some(alert) => HttpResponse::Ok().json(alert),
        None => not_found(),
    }
}

/// Create an alert manually. Creation runs the automatic action pipeline
/// exactly as detector-created alerts do.
async fn create_alert(
    state: web::Data<ApiState>,
    body: web::Json<CreateAlertRequest>,
) -> impl Responder {
    let body = body.into_inner();
    let mut new = NewAlert::new(body.alert_type, body.severity);
    new.source_ip = body.source_ip;
    new.endpoint = body.endpoint;
    new.user_id = body.user_id;
    new.credential_id = body.credential_id;
    if let Some(confidence) = body.confidence {
        new.confidence = confidence.min(100);
    }
    new.description = body
        .description
        .unwrap_or_else(|| format!("manually reported {}", body.alert_type));

    match state.engine.create(new).await {
        Ok(alert) => HttpResponse::Created().json(alert),
        Err(e) => alert_error(e),
    }
}

async fn add_note(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    req: HttpRequest,
    body: web::Json<NoteRequest>,
) -> impl Responder {
    let author = match performer_id(&req) {
        Some(author) => author,
        None => return missing_context(),
    };
    match state
        .engine
        .add_note(path.into_inner(), author, body.into_inner().body)
        .await
    {
        Ok(alert) => HttpResponse::Ok().json(alert),
        Err(e) => alert_error(e),
    }
}

async fn execute_action(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    req: HttpRequest,
    body: web::Json<ActionRequest>,
) -> impl Responder {
    let admin_id = match performer_id(&req) {
        Some(admin_id) => admin_id,
        None => return missing_context(),
    };
    match state
        .engine
        .execute_manual(path.into_inner(), body.action, admin_id)
        .await
    {
        Ok(alert) => HttpResponse::Ok().json(alert),
        Err(e) => alert_error(e),
    }
}

async fn begin_investigation(state: web::Data<ApiState>, path: web::Path<Uuid>) -> impl Responder {
    match state.engine.begin_investigation(path.into_inner()).await {
        Ok(alert) => HttpResponse::Ok().json(alert),
        Err(e) => alert_error(e),
    }
}

async fn escalate_alert(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    body: web::Json<EscalateRequest>,
) -> impl Responder {
    match state
        .engine
        .escalate(path.into_inner(), body.into_inner().target)
        .await
    {
        Ok(alert) => HttpResponse::Ok().json(alert),
        Err(e) => alert_error(e),
    }
}

async fn resolve_alert(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    req: HttpRequest,
    body: web::Json<ResolveRequest>,
) -> impl Responder {
    let resolved_by = match performer_id(&req) {
        Some(resolved_by) => resolved_by,
        None => return missing_context(),
    };
    let body = body.into_inner();
    match state
        .engine
        .resolve(
            path.into_inner(),
            body.resolution_type,
            resolved_by,
            body.summary,
            body.escalated_to,
        )
        .await
    {
        Ok(alert) => HttpResponse::Ok().json(alert),
        Err(e) => alert_error(e),
    }
}

/// Admin identity of the caller, attached by the admission guard.
fn performer_id(req: &HttpRequest) -> Option<Uuid> {
    req.extensions()
        .get::<CredentialContext>()
        .map(|context| context.owner_id)
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ApiMessage {
        success: false,
        error: "alert not found".to_string(),
    })
}

fn missing_context() -> HttpResponse {
    HttpResponse::Unauthorized().json(ApiMessage {
        success: false,
        error: "no credential context on request".to_string(),
    })
}

fn alert_error(error: AlertError) -> HttpResponse {
    match error {
        AlertError::NotFound => not_found(),
        AlertError::Terminal(_) | AlertError::InvalidTransition(_) => {
            HttpResponse::Conflict().json(ApiMessage {
                success: false,
                error: error.to_string(),
            })
        }
        AlertError::Store(_) => HttpResponse::InternalServerError().json(ApiMessage {
            success: false,
            error: error.to_string(),
        }),
    }
}
