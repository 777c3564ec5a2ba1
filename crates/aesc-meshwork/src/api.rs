//! HTTP API for Meshwork.

use crate::error::{Error, Result};
use crate::map::{MapMarker, MAX_MAP_NODES};
use crate::media::{extension_for, MAX_MEDIA_BYTES};
use crate::mailer::{ContactForm, SubscribeForm};
use crate::models::{
    validate_coords, validate_node_id, NodeCredential, Signal, StoredPing, MAX_SIGNAL_CONTENT_CHARS,
};
use crate::node::MeshworkState;
use crate::qr::{self, QrParams, QrQuery};
use crate::rate_limit::{client_ip, Limit, FORM_LIMIT, POST_LIMIT};
use crate::stream::nodes_stream_handler;
use aesc_sign::{Credential, SignedPing};
use aesc_sv::{ActivityKind, SvState};
use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, DefaultBodyLimit, Multipart, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

type AppState = Arc<MeshworkState>;

/// `Cache-Control` for the map feed.
pub const NODES_CACHE_CONTROL: &str = "public, max-age=0, s-maxage=15, stale-while-revalidate=30";

/// Pings included in `/api/diag`.
const DIAG_RECENT: usize = 20;
const DIAG_LAST_DEFAULT: usize = 10;
const DIAG_LAST_MAX: usize = 100;
const SIGNAL_LIST_DEFAULT: usize = 50;
const SIGNAL_LIST_MAX: usize = 200;

/// Room for the multipart framing and text fields around the media file.
const SIGNAL_BODY_SLACK: usize = 256 * 1024;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    // CORS layer for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let media = ServeDir::new(state.media.root());

    Router::new()
        // Health
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Pings and registration
        .route("/api/mesh/ping", post(post_ping))
        .route("/api/mesh/register", post(register_node))
        // Map feed
        .route("/api/nodes", get(list_nodes))
        .route("/api/nodes/stream", get(nodes_stream_handler))
        // Diagnostics
        .route("/api/diag", get(diag))
        .route("/api/diag/last", get(diag_last))
        // SV ledger
        .route("/api/sv/get", get(sv_get))
        .route("/api/sv/claim", post(sv_claim))
        .route("/api/sv/accrue", post(sv_accrue))
        .route("/api/sv/bump-streak", post(sv_bump_streak))
        // Signals
        .route("/api/signal/list", get(list_signals))
        .route(
            "/api/signal/post",
            post(post_signal).layer(DefaultBodyLimit::max(MAX_MEDIA_BYTES + SIGNAL_BODY_SLACK)),
        )
        // Utilities
        .route("/api/qr", get(render_qr))
        .route("/api/contact", post(contact))
        .route("/api/subscribe", post(subscribe))
        .nest_service("/media", media)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

fn query_params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(q)| q)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

fn check_rate(
    state: &MeshworkState,
    scope: &str,
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    limit: Limit,
) -> Result<()> {
    let ip = client_ip(headers, peer.map(|ConnectInfo(addr)| addr), state.config.trust_proxy);
    if state.limiter.allow(&format!("{scope}:{ip}"), limit) {
        Ok(())
    } else {
        Err(Error::RateLimited)
    }
}

/// Parse an optional `limit` query value into `1..=max`.
fn parse_limit(raw: Option<&str>, default: usize, max: usize) -> Result<usize> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<usize>()
            .map(|n| n.clamp(1, max))
            .map_err(|_| Error::InvalidInput("limit must be a positive integer".into())),
    }
}

/// Accrue after a primary action. Failures never reach the caller.
fn accrue_quietly(state: &MeshworkState, node_id: &str, kind: ActivityKind, now_ms: i64) {
    match state.ledger.accrue(node_id, kind, 1.0, now_ms) {
        Ok(accrual) => tracing::debug!(node_id, kind = kind.as_str(), delta = accrual.delta, "accrued SV"),
        Err(e) => tracing::warn!(node_id, kind = kind.as_str(), "SV accrual failed: {}", e),
    }
}

// --- Health endpoints ---

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<AppState>) -> Response {
    match state.storage.ping_count() {
        Ok(_) => "OK".into_response(),
        Err(e) => {
            tracing::error!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable").into_response()
        }
    }
}

async fn not_found(uri: axum::http::Uri) -> Error {
    Error::NotFound(uri.path().to_string())
}

// --- Ping endpoints ---

#[derive(Debug, Serialize)]
struct PingAck {
    ok: bool,
    verified: bool,
}

async fn post_ping(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SignedPing>, JsonRejection>,
) -> Result<Json<PingAck>> {
    let ping = json_body(payload)?;
    let received_at = Utc::now();
    let now = received_at.timestamp_millis();

    let verdict = state.verifier.verify(&ping, now)?;
    let stored = StoredPing::from_signed(&ping, verdict.verified, received_at)?;
    let summary = state.storage.record_ping(&stored)?;

    // No subscribers is not an error.
    let _ = state.presence_tx.send(MapMarker::from_summary(&summary, received_at));

    let kind = if stored.sticker_id.is_some() {
        ActivityKind::Checkin
    } else {
        ActivityKind::Ping
    };
    accrue_quietly(&state, &stored.node_id, kind, now);

    tracing::debug!(node_id = %stored.node_id, verified = verdict.verified, "ping accepted");
    Ok(Json(PingAck {
        ok: true,
        verified: verdict.verified,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    node_id: String,
    public_key: String,
}

async fn register_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    check_rate(&state, "register", &headers, peer, POST_LIMIT)?;
    let req = json_body(payload)?;
    validate_node_id(&req.node_id)?;
    let credential = Credential::ed25519_from_hex(req.public_key.trim())?;
    let fingerprint = credential.fingerprint();

    let record = NodeCredential {
        node_id: req.node_id.clone(),
        credential,
        created_at: Utc::now(),
    };
    if !state.storage.put_credential_if_absent(&record)? {
        return Err(Error::Conflict(format!("node {}", req.node_id)));
    }

    tracing::info!(node_id = %req.node_id, "Registered node");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "nodeId": req.node_id, "fingerprint": fingerprint })),
    ))
}

// --- Map feed endpoints ---

#[derive(Debug, Serialize)]
struct NodesResponse {
    nodes: Vec<MapMarker>,
}

async fn list_nodes(State(state): State<AppState>) -> Result<Response> {
    let now = Utc::now();
    let nodes = state
        .storage
        .list_nodes(MAX_MAP_NODES)?
        .iter()
        .map(|summary| MapMarker::from_summary(summary, now))
        .collect();
    Ok((
        [(header::CACHE_CONTROL, NODES_CACHE_CONTROL)],
        Json(NodesResponse { nodes }),
    )
        .into_response())
}

// --- Diagnostics ---

#[derive(Debug, Serialize)]
struct DiagResponse {
    ok: bool,
    pings: u64,
    nodes: usize,
    recent: Vec<StoredPing>,
}

async fn diag(State(state): State<AppState>) -> Result<Json<DiagResponse>> {
    Ok(Json(DiagResponse {
        ok: true,
        pings: state.storage.ping_count()?,
        nodes: state.storage.node_count()?,
        recent: state.storage.recent_pings(DIAG_RECENT)?,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    limit: Option<String>,
}

async fn diag_last(
    State(state): State<AppState>,
    query: std::result::Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>> {
    let query = query_params(query)?;
    let limit = parse_limit(query.limit.as_deref(), DIAG_LAST_DEFAULT, DIAG_LAST_MAX)?;
    let pings = state.storage.recent_pings(limit)?;
    Ok(Json(json!({ "ok": true, "pings": pings })))
}

// --- SV endpoints ---

#[derive(Debug, Serialize)]
struct SvResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<f64>,
    state: SvState,
}

impl SvResponse {
    fn new(state: SvState) -> Json<Self> {
        Json(Self {
            ok: true,
            delta: None,
            state,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeQuery {
    #[serde(default)]
    node_id: String,
}

async fn sv_get(
    State(state): State<AppState>,
    query: std::result::Result<Query<NodeQuery>, QueryRejection>,
) -> Result<Json<SvResponse>> {
    let query = query_params(query)?;
    validate_node_id(&query.node_id)?;
    Ok(SvResponse::new(state.ledger.get(&query.node_id, crate::now_ms())?))
}

async fn sv_claim(
    State(state): State<AppState>,
    payload: std::result::Result<Json<NodeQuery>, JsonRejection>,
) -> Result<Json<SvResponse>> {
    let req = json_body(payload)?;
    validate_node_id(&req.node_id)?;
    let claimed = state.ledger.claim(&req.node_id, crate::now_ms())?;
    tracing::info!(node_id = %req.node_id, balance = claimed.balance, "SV claimed");
    Ok(SvResponse::new(claimed))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccrueRequest {
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    kind: String,
    weight: Option<f64>,
    ts: Option<i64>,
}

async fn sv_accrue(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AccrueRequest>, JsonRejection>,
) -> Result<Json<SvResponse>> {
    let req = json_body(payload)?;
    validate_node_id(&req.node_id)?;
    let kind: ActivityKind = req.kind.trim().parse()?;
    let ts = req.ts.unwrap_or_else(crate::now_ms);
    let accrual = state.ledger.accrue(&req.node_id, kind, req.weight.unwrap_or(1.0), ts)?;
    Ok(Json(SvResponse {
        ok: true,
        delta: Some(accrual.delta),
        state: accrual.state,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BumpStreakRequest {
    #[serde(default)]
    node_id: String,
    by: Option<u32>,
}

async fn sv_bump_streak(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BumpStreakRequest>, JsonRejection>,
) -> Result<Json<SvResponse>> {
    let req = json_body(payload)?;
    validate_node_id(&req.node_id)?;
    Ok(SvResponse::new(state.ledger.bump_streak(
        &req.node_id,
        req.by.unwrap_or(1),
        crate::now_ms(),
    )?))
}

// --- Signal endpoints ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalListQuery {
    node_id: Option<String>,
    limit: Option<String>,
}

async fn list_signals(
    State(state): State<AppState>,
    query: std::result::Result<Query<SignalListQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>> {
    let query = query_params(query)?;
    let node_id = query.node_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if let Some(node_id) = node_id {
        validate_node_id(node_id)?;
    }
    let limit = parse_limit(query.limit.as_deref(), SIGNAL_LIST_DEFAULT, SIGNAL_LIST_MAX)?;
    let signals = state.storage.list_signals(node_id, limit)?;
    Ok(Json(json!({ "ok": true, "signals": signals })))
}

/// Fields of a signal post as they arrive.
#[derive(Debug, Default)]
struct SignalForm {
    node_id: String,
    ts: String,
    nonce: String,
    sig: String,
    content: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    media: Option<(Vec<u8>, String)>,
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { max: MAX_MEDIA_BYTES }
    } else {
        Error::InvalidInput(e.body_text())
    }
}

async fn field_text(field: Field<'_>) -> Result<String> {
    field.text().await.map_err(multipart_error)
}

fn parse_coord(field: &str, raw: Option<&str>) -> Result<Option<f64>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| Error::InvalidInput(format!("{field} must be a number"))),
    }
}

impl SignalForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = SignalForm::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "nodeId" => form.node_id = field_text(field).await?,
                "ts" => form.ts = field_text(field).await?,
                "nonce" => form.nonce = field_text(field).await?,
                "sig" => form.sig = field_text(field).await?,
                "content" => form.content = Some(field_text(field).await?),
                "lat" => form.lat = Some(field_text(field).await?),
                "lon" => form.lon = Some(field_text(field).await?),
                "media" => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    if bytes.len() > MAX_MEDIA_BYTES {
                        return Err(Error::PayloadTooLarge { max: MAX_MEDIA_BYTES });
                    }
                    // Browsers send an empty part when no file is chosen.
                    if !bytes.is_empty() {
                        form.media = Some((bytes.to_vec(), content_type));
                    }
                }
                other => tracing::debug!(field = other, "ignoring unknown signal field"),
            }
        }
        Ok(form)
    }

    /// The envelope verified like a ping, with an empty sticker.
    fn envelope(&self) -> Result<SignedPing> {
        let ts = self
            .ts
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::InvalidInput("ts must be Unix milliseconds".into()))?;
        let lat = parse_coord("lat", self.lat.as_deref())?;
        let lon = parse_coord("lon", self.lon.as_deref())?;
        validate_coords(lat, lon)?;
        Ok(SignedPing {
            node_id: self.node_id.trim().to_string(),
            sticker_id: None,
            ts,
            nonce: self.nonce.trim().to_string(),
            sig: self.sig.trim().to_string(),
            lat,
            lon,
        })
    }
}

async fn post_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>> {
    check_rate(&state, "signal", &headers, peer, POST_LIMIT)?;
    let multipart = multipart.map_err(|rejection| Error::InvalidInput(rejection.body_text()))?;
    let form = SignalForm::read(multipart).await?;

    let content = form.content.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if let Some(content) = content {
        if content.chars().count() > MAX_SIGNAL_CONTENT_CHARS {
            return Err(Error::InvalidInput(format!(
                "content exceeds {MAX_SIGNAL_CONTENT_CHARS} characters"
            )));
        }
    }
    if content.is_none() && form.media.is_none() {
        return Err(Error::InvalidInput("content or media is required".into()));
    }
    // Checked before verification so a rejected upload keeps its nonce.
    if let Some((_, content_type)) = &form.media {
        if extension_for(content_type).is_none() {
            return Err(Error::InvalidInput(format!("unsupported media type: {content_type}")));
        }
    }

    let envelope = form.envelope()?;
    let received_at = Utc::now();
    let now = received_at.timestamp_millis();
    state.verifier.verify(&envelope, now)?;

    let media = match &form.media {
        Some((bytes, content_type)) => Some(state.media.put(bytes, content_type).await?),
        None => None,
    };

    let ts = DateTime::<Utc>::from_timestamp_millis(envelope.ts)
        .ok_or_else(|| Error::InvalidInput("ts out of range".into()))?;
    let signal = Signal {
        id: Signal::generate_id(&envelope.node_id, envelope.ts, &envelope.nonce, content),
        node_id: envelope.node_id.clone(),
        content: content.map(String::from),
        media_url: media.as_ref().map(|m| m.url.clone()),
        ts,
        lat: envelope.lat,
        lon: envelope.lon,
    };

    if let Err(e) = state.storage.put_signal(&signal) {
        if let Some(stored) = media.as_ref().filter(|m| m.created) {
            if let Err(cleanup) = state.media.delete(&stored.key).await {
                tracing::warn!(key = %stored.key, "Failed to remove orphaned media: {}", cleanup);
            }
        }
        return Err(e);
    }

    accrue_quietly(&state, &signal.node_id, ActivityKind::Post, now);

    tracing::info!(node_id = %signal.node_id, id = %signal.id, media = signal.media_url.is_some(), "Signal posted");
    Ok(Json(json!({ "ok": true, "signal": signal })))
}

// --- Utility endpoints ---

async fn render_qr(query: std::result::Result<Query<QrQuery>, QueryRejection>) -> Result<Response> {
    let query = query_params(query)?;
    let params = QrParams::from_query(&query)?;
    let body = qr::render(&params)?;
    Ok((
        [
            (header::CONTENT_TYPE, params.format.content_type()),
            (header::CACHE_CONTROL, qr::CACHE_CONTROL),
        ],
        body,
    )
        .into_response())
}

async fn contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: std::result::Result<Json<ContactForm>, JsonRejection>,
) -> Result<Json<serde_json::Value>> {
    check_rate(&state, "contact", &headers, peer, FORM_LIMIT)?;
    let form = json_body(payload)?;
    if form.is_spam() {
        tracing::info!("Contact honeypot tripped");
        return Ok(Json(json!({ "ok": true })));
    }
    form.validate()?;
    let mailer = state
        .mailer
        .as_ref()
        .ok_or_else(|| Error::Mail("mail provider not configured".into()))?;
    mailer.send(&form.to_mail(mailer)).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: std::result::Result<Json<SubscribeForm>, JsonRejection>,
) -> Result<Json<serde_json::Value>> {
    check_rate(&state, "subscribe", &headers, peer, FORM_LIMIT)?;
    let form = json_body(payload)?;
    if form.is_spam() {
        tracing::info!("Subscribe honeypot tripped");
        return Ok(Json(json!({ "ok": true })));
    }
    form.validate()?;
    let mailer = state
        .mailer
        .as_ref()
        .ok_or_else(|| Error::Mail("mail provider not configured".into()))?;
    mailer.send(&form.to_mail(mailer)).await?;
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MeshworkConfig;
    use crate::verify::MAX_CLOCK_SKEW_MS;
    use aesc_sign::{generate_signing_key, PingBuilder, Secret};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const SECRET: &str = "hex:000102030405060708090a0b0c0d0e0f";

    fn test_state() -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(MeshworkState::open(MeshworkConfig::for_data_dir(dir.path())).unwrap());
        state
            .storage
            .put_credential(&NodeCredential {
                node_id: "n1".into(),
                credential: Credential::hmac(&Secret::parse(SECRET).unwrap()),
                created_at: Utc::now(),
            })
            .unwrap();
        (dir, state)
    }

    fn secret() -> Secret {
        Secret::parse(SECRET).unwrap()
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let resp = build_router(Arc::clone(state)).oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn send_json(state: &AppState, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, _, body) = send(state, req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn get_json(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _, body) = send(state, req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn ping_json(ping: &SignedPing) -> serde_json::Value {
        serde_json::to_value(ping).unwrap()
    }

    #[tokio::test]
    async fn health() {
        let (_dir, state) = test_state();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let (_dir, state) = test_state();
        let (status, body) = get_json(&state, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "ok": false, "error": "not found: /api/nope" }));
    }

    #[tokio::test]
    async fn signed_ping_accepted_once() {
        let (_dir, state) = test_state();
        let ping = PingBuilder::new("n1").location(51.5, -0.12).sign_hmac(&secret()).unwrap();

        let (status, body) = send_json(&state, "POST", "/api/mesh/ping", ping_json(&ping)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "verified": true }));

        let (status, body) = send_json(&state, "POST", "/api/mesh/ping", ping_json(&ping)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "ok": false, "error": "nonce already used" }));

        // Stored, summarized and accrued.
        let (_, diag) = get_json(&state, "/api/diag").await;
        assert_eq!(diag["pings"], 1);
        assert_eq!(diag["nodes"], 1);
        assert_eq!(diag["recent"][0]["node_id"], "n1");
        let sv = state.ledger.get("n1", 0).unwrap();
        assert!((sv.unclaimed - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sticker_ping_accrues_checkin() {
        let (_dir, state) = test_state();
        let ping = PingBuilder::new("n1").sticker("s-7").sign_hmac(&secret()).unwrap();
        let (status, _) = send_json(&state, "POST", "/api/mesh/ping", ping_json(&ping)).await;
        assert_eq!(status, StatusCode::OK);
        let sv = state.ledger.get("n1", 0).unwrap();
        assert!((sv.unclaimed - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejected_pings() {
        let (_dir, state) = test_state();

        let mut tampered = PingBuilder::new("n1").sign_hmac(&secret()).unwrap();
        tampered.ts += 1;
        let (status, body) = send_json(&state, "POST", "/api/mesh/ping", ping_json(&tampered)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid signature");

        let stranger = PingBuilder::new("n2").sign_hmac(&secret()).unwrap();
        let (status, body) = send_json(&state, "POST", "/api/mesh/ping", ping_json(&stranger)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown node");

        let stale = PingBuilder::new("n1")
            .at(crate::now_ms() - MAX_CLOCK_SKEW_MS - 60_000)
            .sign_hmac(&secret())
            .unwrap();
        let (status, body) = send_json(&state, "POST", "/api/mesh/ping", ping_json(&stale)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "timestamp outside allowed window");

        let (status, body) = send_json(&state, "POST", "/api/mesh/ping", json!({ "nodeId": "n1" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);

        let (_, diag) = get_json(&state, "/api/diag").await;
        assert_eq!(diag["pings"], 0);
    }

    #[tokio::test]
    async fn register_then_ed25519_ping() {
        let (_dir, state) = test_state();
        let key = generate_signing_key();
        let public_key = hex::encode(key.verifying_key().to_bytes());

        let (status, body) = send_json(
            &state,
            "POST",
            "/api/mesh/register",
            json!({ "nodeId": "edge-1", "publicKey": public_key }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["fingerprint"], public_key);

        let (status, _) = send_json(
            &state,
            "POST",
            "/api/mesh/register",
            json!({ "nodeId": "edge-1", "publicKey": public_key }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let ping = PingBuilder::new("edge-1").sign_ed25519(&key).unwrap();
        let (status, body) = send_json(&state, "POST", "/api/mesh/ping", ping_json(&ping)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);
    }

    #[tokio::test]
    async fn nodes_feed_has_cache_header_and_weight() {
        let (_dir, state) = test_state();
        let ping = PingBuilder::new("n1").location(10.0, 20.0).sign_hmac(&secret()).unwrap();
        send_json(&state, "POST", "/api/mesh/ping", ping_json(&ping)).await;

        let req = Request::builder().uri("/api/nodes").body(Body::empty()).unwrap();
        let (status, headers, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CACHE_CONTROL], NODES_CACHE_CONTROL);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let node = &body["nodes"][0];
        assert_eq!(node["node_id"], "n1");
        assert_eq!(node["lat"], 10.0);
        assert!(node["weight"].as_f64().unwrap() > 0.99);
    }

    #[tokio::test]
    async fn accepted_ping_reaches_stream_subscribers() {
        let (_dir, state) = test_state();
        let mut rx = state.presence_tx.subscribe();
        let ping = PingBuilder::new("n1").sign_hmac(&secret()).unwrap();
        send_json(&state, "POST", "/api/mesh/ping", ping_json(&ping)).await;
        let marker = rx.recv().await.unwrap();
        assert_eq!(marker.node_id, "n1");
    }

    #[tokio::test]
    async fn diag_last_limits() {
        let (_dir, state) = test_state();
        for _ in 0..3 {
            let ping = PingBuilder::new("n1").sign_hmac(&secret()).unwrap();
            send_json(&state, "POST", "/api/mesh/ping", ping_json(&ping)).await;
        }
        let (_, body) = get_json(&state, "/api/diag/last?limit=2").await;
        assert_eq!(body["pings"].as_array().unwrap().len(), 2);
        let (_, body) = get_json(&state, "/api/diag/last").await;
        assert_eq!(body["pings"].as_array().unwrap().len(), 3);
        let (status, _) = get_json(&state, "/api/diag/last?limit=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sv_accrue_post_on_fresh_node() {
        let (_dir, state) = test_state();
        let (status, body) = send_json(
            &state,
            "POST",
            "/api/sv/accrue",
            json!({ "nodeId": "x", "kind": "post", "weight": 2.0 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delta"], 4.0);
        assert_eq!(body["state"]["unclaimed"], 4.0);
        assert_eq!(body["state"]["tier"], "Seed");
    }

    #[tokio::test]
    async fn sv_rejects_bad_input() {
        let (_dir, state) = test_state();
        let (status, _) = send_json(&state, "POST", "/api/sv/accrue", json!({ "nodeId": "x", "kind": "dance" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send_json(
            &state,
            "POST",
            "/api/sv/accrue",
            json!({ "nodeId": "x", "kind": "ping", "weight": -1.0 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&state, "/api/sv/get").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sv_huge_weight_keeps_row_readable() {
        let (_dir, state) = test_state();
        let (status, _) = send_json(&state, "POST", "/api/sv/accrue", json!({ "nodeId": "v", "kind": "post" })).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(
            &state,
            "POST",
            "/api/sv/accrue",
            json!({ "nodeId": "v", "kind": "post", "weight": 1e308 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);

        let (status, body) = get_json(&state, "/api/sv/get?nodeId=v").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"]["unclaimed"], 2.0);
        let (status, _) = send_json(&state, "POST", "/api/sv/claim", json!({ "nodeId": "v" })).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn sv_claim_and_streak() {
        let (_dir, state) = test_state();
        send_json(&state, "POST", "/api/sv/accrue", json!({ "nodeId": "x", "kind": "ritual" })).await;

        let (_, body) = send_json(&state, "POST", "/api/sv/claim", json!({ "nodeId": "x" })).await;
        assert_eq!(body["state"]["balance"], 3.5);
        assert_eq!(body["state"]["unclaimed"], 0.0);

        // Claiming again changes nothing.
        let (_, again) = send_json(&state, "POST", "/api/sv/claim", json!({ "nodeId": "x" })).await;
        assert_eq!(again["state"]["balance"], 3.5);
        assert_eq!(again["state"]["revision"], body["state"]["revision"]);

        let (_, body) = send_json(&state, "POST", "/api/sv/bump-streak", json!({ "nodeId": "x", "by": 3 })).await;
        assert_eq!(body["state"]["streakDays"], 3);

        let (status, body) = get_json(&state, "/api/sv/get?nodeId=x").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"]["streakDays"], 3);
    }

    #[tokio::test]
    async fn qr_png_and_bad_params() {
        let (_dir, state) = test_state();
        let req = Request::builder()
            .uri("/api/qr?text=https%3A%2F%2Faesc.example&size=128")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CACHE_CONTROL], qr::CACHE_CONTROL);
        assert_eq!(&body[..4], b"\x89PNG");

        let (status, body) = get_json(&state, "/api/qr?text=x&size=9999").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn honeypot_short_circuits_without_mailer() {
        let (_dir, state) = test_state();
        let (status, body) = send_json(
            &state,
            "POST",
            "/api/contact",
            json!({ "name": "bot", "email": "bot@spam.example", "message": "buy", "website": "http://spam" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));

        // A genuine submission needs the provider.
        let (status, body) = send_json(
            &state,
            "POST",
            "/api/subscribe",
            json!({ "email": "ada@example.org" }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "failed to send message");
    }

    #[tokio::test]
    async fn contact_validation_and_rate_limit() {
        let (_dir, state) = test_state();
        let (status, _) = send_json(&state, "POST", "/api/contact", json!({ "email": "ada@example.org" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // One request above already counted against this client.
        for _ in 1..FORM_LIMIT.max {
            let (status, _) = send_json(&state, "POST", "/api/contact", json!({ "website": "x" })).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = send_json(&state, "POST", "/api/contact", json!({ "website": "x" })).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "too many requests");
    }

    async fn contact_from(state: &AppState, forwarded_for: &str) -> StatusCode {
        let req = Request::builder()
            .method("POST")
            .uri("/api/contact")
            .header("content-type", "application/json")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::from(json!({ "website": "x" }).to_string()))
            .unwrap();
        send(state, req).await.0
    }

    #[tokio::test]
    async fn forwarded_for_ignored_unless_proxy_trusted() {
        let (_dir, state) = test_state();
        for i in 0..FORM_LIMIT.max {
            assert_eq!(contact_from(&state, &format!("198.51.100.{i}")).await, StatusCode::OK);
        }
        // Rotating the header does not mint a fresh client.
        assert_eq!(contact_from(&state, "198.51.100.250").await, StatusCode::TOO_MANY_REQUESTS);

        let dir = tempfile::tempdir().unwrap();
        let mut config = MeshworkConfig::for_data_dir(dir.path());
        config.trust_proxy = true;
        let proxied = Arc::new(MeshworkState::open(config).unwrap());
        for i in 0..=FORM_LIMIT.max {
            assert_eq!(contact_from(&proxied, &format!("198.51.100.{i}")).await, StatusCode::OK);
        }
    }

    const BOUNDARY: &str = "meshwork-test-boundary";

    fn multipart_body(fields: &[(&str, &str)], media: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
            );
        }
        if let Some((content_type, bytes)) = media {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"media\"; filename=\"clip\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/signal/post")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn signed_fields(ping: &SignedPing) -> Vec<(&'static str, String)> {
        vec![
            ("nodeId", ping.node_id.clone()),
            ("ts", ping.ts.to_string()),
            ("nonce", ping.nonce.clone()),
            ("sig", ping.sig.clone()),
        ]
    }

    #[tokio::test]
    async fn signal_post_and_list() {
        let (_dir, state) = test_state();
        let envelope = PingBuilder::new("n1").sign_hmac(&secret()).unwrap();
        let mut fields = signed_fields(&envelope);
        fields.push(("content", "first light".into()));
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let body = multipart_body(&fields, Some(("image/png", b"fake-png")));
        let (status, _, body) = send(&state, multipart_request(body)).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let media_url = body["signal"]["mediaUrl"].as_str().unwrap().to_string();
        assert!(media_url.starts_with("/media/"));

        // Envelope nonce is now spent, shared with pings.
        let (status, _) = send_json(&state, "POST", "/api/mesh/ping", ping_json(&envelope)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, list) = get_json(&state, "/api/signal/list?nodeId=n1").await;
        assert_eq!(list["signals"][0]["content"], "first light");
        let (_, all) = get_json(&state, "/api/signal/list").await;
        assert_eq!(all["signals"].as_array().unwrap().len(), 1);

        // The upload is served back.
        let req = Request::builder().uri(media_url.as_str()).body(Body::empty()).unwrap();
        let (status, _, bytes) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"fake-png");

        let sv = state.ledger.get("n1", 0).unwrap();
        assert!((sv.unclaimed - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn signal_post_rejections() {
        let (_dir, state) = test_state();

        // Neither content nor media.
        let envelope = PingBuilder::new("n1").sign_hmac(&secret()).unwrap();
        let fields = signed_fields(&envelope);
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let (status, _, _) = send(&state, multipart_request(multipart_body(&fields, None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Bad signature.
        let mut forged = signed_fields(&envelope);
        forged[3].1 = "00".repeat(32);
        forged.push(("content", "hi".into()));
        let forged: Vec<(&str, &str)> = forged.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let (status, _, body) = send(&state, multipart_request(multipart_body(&forged, None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "invalid signature");

        // Oversized media.
        let envelope = PingBuilder::new("n1").sign_hmac(&secret()).unwrap();
        let fields = signed_fields(&envelope);
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let big = vec![7u8; MAX_MEDIA_BYTES + 1];
        let (status, _, _) = send(
            &state,
            multipart_request(multipart_body(&fields, Some(("video/mp4", &big)))),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        // Unsupported media type leaves the nonce unspent.
        let envelope = PingBuilder::new("n1").sign_hmac(&secret()).unwrap();
        let mut fields = signed_fields(&envelope);
        fields.push(("content", "retry me".into()));
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let (status, _, body) = send(
            &state,
            multipart_request(multipart_body(&fields, Some(("application/zip", &b"PK\x03\x04"[..])))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "unsupported media type: application/zip");
        let (status, _, _) = send(&state, multipart_request(multipart_body(&fields, None))).await;
        assert_eq!(status, StatusCode::OK);

        // Not multipart at all.
        let (status, _) = send_json(&state, "POST", "/api/signal/post", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
