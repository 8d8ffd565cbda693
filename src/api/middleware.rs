//! Admission middleware for the admission control service.
//!
//! Wraps a scope or resource with the request gate: extracts request
//! metadata, asks the gate for an admission decision, attaches the credential
//! context to admitted requests, and maps rejections onto the external error
//! contract. Outcome logging runs as an explicit stage after the handler
//! completes and is fully detached from the response; a logging failure can
//! never fail a request.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage, HttpResponse,
};
use chrono::Utc;
use futures::future::{ready, LocalBoxFuture, Ready};
use serde::Serialize;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::core::activity_log::{spawn_append, ActivityLog, RequestOutcome};
use crate::core::rate_limiter::RateQuota;
use crate::core::request_gate::{GateError, GateOptions, RequestGate, RequestMeta};

/// External error body, shared by all gate rejections
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Gate middleware factory
pub struct AdmissionGuard {
    gate: Arc<RequestGate>,
    log: Arc<dyn ActivityLog>,
    opts: GateOptions,
}

impl AdmissionGuard {
    pub fn new(gate: Arc<RequestGate>, log: Arc<dyn ActivityLog>, opts: GateOptions) -> Self {
        Self { gate, log, opts }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdmissionGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AdmissionGuardMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdmissionGuardMiddleware {
            service: Rc::new(service),
            gate: Arc::clone(&self.gate),
            log: Arc::clone(&self.log),
            opts: self.opts.clone(),
        }))
    }
}

pub struct AdmissionGuardMiddleware<S> {
    service: Rc<S>,
    gate: Arc<RequestGate>,
    log: Arc<dyn ActivityLog>,
    opts: GateOptions,
}

impl<S, B> Service<ServiceRequest> for AdmissionGuardMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let gate = Arc::clone(&self.gate);
        let log = Arc::clone(&self.log);
        let opts = self.opts.clone();

        Box::pin(async move {
            let started = Instant::now();
            let meta = request_meta(&req);

            match gate.authorize(&meta, &opts).await {
                Ok(admission) => {
                    let credential_id = admission.credential.as_ref().map(|c| c.credential_id);
                    if let Some(context) = admission.credential.clone() {
                        req.extensions_mut().insert(context);
                    }

                    let res = service.call(req).await?;
                    let status = res.status().as_u16();
                    let mut res = res.map_into_left_body();
                    if let Some(quota) = admission.quota.as_ref() {
                        set_quota_headers(res.headers_mut(), quota);
                    }

                    // Post-response stage: outcome logging is detached and
                    // best-effort.
                    spawn_append(
                        log,
                        RequestOutcome {
                            timestamp: Utc::now(),
                            credential_id,
                            source_ip: meta.source_ip,
                            endpoint: meta.endpoint,
                            method: meta.method,
                            status,
                            latency_ms: started.elapsed().as_millis() as u64,
                            blocked: false,
                            block_reason: None,
                        },
                    );
                    Ok(res)
                }
                Err(rejection) => {
                    spawn_append(
                        log,
                        RequestOutcome {
                            timestamp: Utc::now(),
                            credential_id: None,
                            source_ip: meta.source_ip,
                            endpoint: meta.endpoint,
                            method: meta.method,
                            status: rejection.status_code(),
                            latency_ms: started.elapsed().as_millis() as u64,
                            blocked: true,
                            block_reason: Some(rejection.external_code().to_string()),
                        },
                    );
                    let response = rejection_response(&rejection);
                    Ok(req.into_response(response).map_into_right_body())
                }
            }
        })
    }
}

/// Extract the gate's view of an inbound request.
fn request_meta(req: &ServiceRequest) -> RequestMeta {
    RequestMeta {
        source_ip: client_ip(req),
        endpoint: req.path().to_string(),
        method: req.method().to_string(),
        api_key: extract_api_key(req),
        referer_domain: referer_domain(req),
    }
}

/// Key precedence: `X-Api-Key`, then `Authorization` (Bearer or ApiKey
/// scheme), then the `api_key` query parameter.
fn extract_api_key(req: &ServiceRequest) -> Option<String> {
    if let Some(value) = req.headers().get("X-Api-Key").and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    if let Some(value) = req.headers().get("Authorization").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        for scheme in ["Bearer ", "ApiKey "] {
            if let Some(rest) = value.strip_prefix(scheme) {
                return Some(rest.trim().to_string());
            }
        }
    }
    req.query_string().split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name == "api_key" && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

fn client_ip(req: &ServiceRequest) -> String {
    let info = req.connection_info();
    let addr = info.realip_remote_addr().unwrap_or("unknown");
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => sock.ip().to_string(),
        Err(_) => addr.to_string(),
    }
}

fn referer_domain(req: &ServiceRequest) -> Option<String> {
    let value = req.headers().get("Referer")?.to_str().ok()?;
    let rest = value.split("://").nth(1).unwrap_or(value);
    let host = rest.split('/').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

fn set_quota_headers(headers: &mut actix_web::http::header::HeaderMap, quota: &RateQuota) {
    let pairs = [
        ("x-ratelimit-limit", quota.limit.to_string()),
        ("x-ratelimit-remaining", quota.remaining.to_string()),
        ("x-ratelimit-reset", quota.reset_epoch().to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

fn rejection_response(rejection: &GateError) -> HttpResponse {
    let mut builder = match rejection.status_code() {
        401 => HttpResponse::Unauthorized(),
        _ => HttpResponse::TooManyRequests(),
    };
    if let GateError::RateLimited { quota, .. } = rejection {
        builder.insert_header(("x-ratelimit-limit", quota.limit.to_string()));
        builder.insert_header(("x-ratelimit-remaining", quota.remaining.to_string()));
        builder.insert_header(("x-ratelimit-reset", quota.reset_epoch().to_string()));
    }
    builder.json(ErrorBody {
        success: false,
        error: rejection.client_message().to_string(),
        code: rejection.external_code().to_string(),
        retry_after: rejection.retry_after(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block_cache::{BlockEntry, BlockStore, InMemoryBlockStore};
    use crate::core::credentials::{
        Credential, InMemoryCredentialStore, Permission, KEY_HEX_LEN, KEY_PREFIX,
    };
    use crate::core::rate_limiter::{InMemoryCounterStore, RateLimitTier, RateLimiter};
    use actix_web::{test, web, App, HttpResponse as Resp};
    use std::time::Duration;

    fn admin_key() -> String {
        format!("{}{}", KEY_PREFIX, "c".repeat(KEY_HEX_LEN))
    }

    struct Fixture {
        gate: Arc<RequestGate>,
        log: Arc<crate::core::activity_log::InMemoryActivityLog>,
        blocks: Arc<InMemoryBlockStore>,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryCredentialStore::new();
        store
            .insert(Credential::new(
                admin_key(),
                uuid::Uuid::new_v4(),
                vec![Permission::Admin],
                RateLimitTier::default(),
            ))
            .await;
        let blocks = Arc::new(InMemoryBlockStore::new());
        let gate = Arc::new(RequestGate::new(
            Arc::new(store),
            blocks.clone(),
            RateLimiter::new(Arc::new(InMemoryCounterStore::new())),
        ));
        let log = Arc::new(crate::core::activity_log::InMemoryActivityLog::default());
        Fixture { gate, log, blocks }
    }

    async fn ping() -> Resp {
        Resp::Ok().finish()
    }

    macro_rules! guarded_app {
        ($f:expr) => {
            test::init_service(
                App::new().service(
                    web::resource("/guarded")
                        .wrap(AdmissionGuard::new(
                            Arc::clone(&$f.gate),
                            $f.log.clone(),
                            GateOptions::required(vec![Permission::Admin]),
                        ))
                        .route(web::get().to(ping)),
                ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn missing_key_yields_the_external_contract() {
        let f = fixture().await;
        let app = guarded_app!(f);

        let req = test::TestRequest::get().uri("/guarded").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 401);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "MISSING_API_KEY");
    }

    #[actix_web::test]
    async fn header_key_admits_and_sets_quota_headers() {
        let f = fixture().await;
        let app = guarded_app!(f);

        let req = test::TestRequest::get()
            .uri("/guarded")
            .insert_header(("X-Api-Key", admin_key()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert!(resp.headers().contains_key("x-ratelimit-limit"));
        assert!(resp.headers().contains_key("x-ratelimit-remaining"));
        assert!(resp.headers().contains_key("x-ratelimit-reset"));
    }

    #[actix_web::test]
    async fn bearer_and_query_keys_are_accepted() {
        let f = fixture().await;
        let app = guarded_app!(f);

        let req = test::TestRequest::get()
            .uri("/guarded")
            .insert_header(("Authorization", format!("Bearer {}", admin_key())))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::get()
            .uri(&format!("/guarded?api_key={}", admin_key()))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
    }

    #[actix_web::test]
    async fn malformed_key_maps_to_invalid_api_key() {
        let f = fixture().await;
        let app = guarded_app!(f);

        let req = test::TestRequest::get()
            .uri("/guarded")
            .insert_header(("X-Api-Key", "nope"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 401);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "INVALID_API_KEY");
    }

    #[actix_web::test]
    async fn blocked_ip_gets_retry_after() {
        let f = fixture().await;
        f.blocks
            .set(
                "203.0.113.77",
                BlockEntry::new("suspicious_activity", Duration::from_secs(300), None),
            )
            .await
            .unwrap();
        let app = guarded_app!(f);

        let req = test::TestRequest::get()
            .uri("/guarded")
            .insert_header(("X-Api-Key", admin_key()))
            .peer_addr("203.0.113.77:40000".parse().unwrap())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 429);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "IP_BLOCKED");
        assert!(body["retryAfter"].as_u64().unwrap() > 0);
    }

    #[actix_web::test]
    async fn outcomes_are_logged_after_the_response() {
        let f = fixture().await;
        let app = guarded_app!(f);

        let req = test::TestRequest::get()
            .uri("/guarded")
            .insert_header(("X-Api-Key", admin_key()))
            .to_request();
        test::call_service(&app, req).await;
        let req = test::TestRequest::get().uri("/guarded").to_request();
        test::call_service(&app, req).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcomes = f.log.recent(Duration::from_secs(60)).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        let admitted = outcomes.iter().find(|o| !o.blocked).unwrap();
        assert!(admitted.credential_id.is_some());
        assert_eq!(admitted.status, 200);
        let rejected = outcomes.iter().find(|o| o.blocked).unwrap();
        assert_eq!(rejected.block_reason.as_deref(), Some("MISSING_API_KEY"));
    }
}
