use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::error::Error;
use crate::export::feature_collection;
use crate::gate::JobGate;
use crate::NearbyDb;

/// Results returned by `/nearest` when `k` is not given.
pub const DEFAULT_K: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordBody {
    pub identity: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearestQuery {
    pub k: Option<usize>,
}

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<NearbyDb>,
    pub cooldown: Option<Duration>,
    pub export_gate: JobGate,
}

pub async fn start_http_api(state: ApiState, port: u16) {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("HTTP API listening on {}", addr);
    warp::serve(routes(state)).run(addr).await;
}

pub fn routes(state: ApiState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    // 1. POST /positions
    let record = warp::post()
    .and(warp::path("positions"))
    .and(warp::path::end())
    .and(warp::body::json())
    .and(with_state(state.clone()))
    .and_then(handle_record);

    // 2. GET /positions/count
    let count = warp::get()
    .and(warp::path!("positions" / "count"))
    .and(with_state(state.clone()))
    .and_then(handle_count);

    // 3. GET /positions/{identity}/first-seen
    let first_seen = warp::get()
    .and(warp::path!("positions" / String / "first-seen"))
    .and(with_state(state.clone()))
    .and_then(handle_first_seen);

    // 4. GET /positions/{identity}/nearest?k=N
    let nearest = warp::get()
    .and(warp::path!("positions" / String / "nearest"))
    .and(warp::query::<NearestQuery>())
    .and(with_state(state.clone()))
    .and_then(handle_nearest);

    // 5. GET /export (one at a time)
    let export = warp::get()
    .and(warp::path!("export"))
    .and(with_state(state))
    .and_then(handle_export);

    record
    .or(count)
    .unify()
    .or(first_seen)
    .unify()
    .or(nearest)
    .unify()
    .or(export)
    .unify()
}

fn with_state(state: ApiState) -> impl Filter<Extract = (ApiState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_status<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn internal(e: impl std::fmt::Display) -> Response {
    error!("request failed: {}", e);
    json_status(&json!({ "error": e.to_string() }), StatusCode::INTERNAL_SERVER_ERROR)
}

fn not_found() -> Response {
    json_status(&json!({ "error": "no position recorded" }), StatusCode::NOT_FOUND)
}

/// Path segments arrive percent-encoded.
fn decode_segment(raw: &str) -> Result<String, Response> {
    percent_decode_str(raw)
    .decode_utf8()
    .map(|id| id.into_owned())
    .map_err(|_| json_status(&json!({ "error": "identity is not UTF-8" }), StatusCode::BAD_REQUEST))
}

/// Run a blocking store call on the blocking pool.
async fn run_blocking<T, F>(db: &Arc<NearbyDb>, f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(&NearbyDb) -> Result<T, Error> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(db.as_ref()))
    .await
    .map_err(|e| Error::Protocol(format!("store task failed: {}", e)))?
}

enum RecordOutcome {
    Recorded(crate::model::PositionRecord),
    Cooldown(u64),
}

async fn handle_record(body: RecordBody, state: ApiState) -> Result<Response, Rejection> {
    let cooldown = state.cooldown;
    let outcome = run_blocking(&state.db, move |db| {
        if let Some(cooldown) = cooldown {
            if let Some(allowed_at) = db.change_allowed_at(&body.identity, cooldown)? {
                return Ok(RecordOutcome::Cooldown(allowed_at));
            }
        }
        db.record(&body.identity, body.latitude, body.longitude)
        .map(RecordOutcome::Recorded)
    })
    .await;

    Ok(match outcome {
        Ok(RecordOutcome::Recorded(record)) => json_status(&record, StatusCode::CREATED),
        Ok(RecordOutcome::Cooldown(allowed_at)) => json_status(
            &json!({ "error": "position change not allowed yet", "allowed_at": allowed_at }),
            StatusCode::TOO_MANY_REQUESTS,
        ),
        Err(e @ Error::InvalidIdentity(_)) => {
            json_status(&json!({ "error": e.to_string() }), StatusCode::BAD_REQUEST)
        }
        Err(e) => internal(e),
    })
}

async fn handle_count(state: ApiState) -> Result<Response, Rejection> {
    Ok(match run_blocking(&state.db, |db| db.count()).await {
        Ok(total) => json_status(&json!({ "total": total }), StatusCode::OK),
        Err(e) => internal(e),
    })
}

async fn handle_first_seen(segment: String, state: ApiState) -> Result<Response, Rejection> {
    let identity = match decode_segment(&segment) {
        Ok(identity) => identity,
        Err(res) => return Ok(res),
    };
    let lookup = identity.clone();
    Ok(match run_blocking(&state.db, move |db| db.first_seen(&lookup)).await {
        Ok(Some(ts)) => json_status(&json!({ "identity": identity, "recorded_at": ts }), StatusCode::OK),
        Ok(None) => not_found(),
        Err(e) => internal(e),
    })
}

async fn handle_nearest(segment: String, query: NearestQuery, state: ApiState) -> Result<Response, Rejection> {
    let identity = match decode_segment(&segment) {
        Ok(identity) => identity,
        Err(res) => return Ok(res),
    };
    let k = query.k.unwrap_or(DEFAULT_K);
    Ok(match run_blocking(&state.db, move |db| db.nearest(&identity, k)).await {
        Ok(Some(nearest)) => json_status(&nearest, StatusCode::OK),
        Ok(None) => not_found(),
        Err(e) => internal(e),
    })
}

async fn handle_export(state: ApiState) -> Result<Response, Rejection> {
    let ticket = match state.export_gate.try_enter() {
        Some(ticket) => ticket,
        None => {
            return Ok(json_status(&json!({ "error": "export already running" }), StatusCode::CONFLICT));
        }
    };

    let result = run_blocking(&state.db, |db| Ok(feature_collection(&db.all_records()?))).await;
    drop(ticket);

    Ok(match result {
        Ok(collection) => json_status(&collection, StatusCode::OK),
        Err(e) => internal(e),
    })
}
