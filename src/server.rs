use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::error::StoreError;
use crate::exchange::exchange_secret;
use crate::store::RecordStore;

// 64KB cap on request bodies to prevent large-payload DoS
const MAX_BODY_BYTES: u64 = 64 * 1024;

pub const INTERNAL_ERROR: &str = "Internal Server Error";
pub const NOT_A_STRING: &str = "Secret must be an actual string.";

#[derive(Debug, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeResponse {
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub records: u64,
}

pub struct ExchangeServer {
    store: RecordStore,
}

impl ExchangeServer {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Serves until `shutdown` resolves.
    pub async fn run<S>(&self, addr: SocketAddr, shutdown: S) -> Result<(), warp::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let (bound, server) = warp::serve(routes(self.store.clone())).try_bind_with_graceful_shutdown(addr, shutdown)?;
        info!(addr = %bound, "secret exchange listening");
        server.await;
        info!("server stopped");
        Ok(())
    }
}

/// All HTTP routes. Every rejection is turned into a JSON error body.
pub fn routes(store: RecordStore) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    // 1. POST /exchange-secret
    let exchange = warp::path("exchange-secret")
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::content_length_limit(MAX_BODY_BYTES))
    .and(warp::body::json())
    .and(with_store(store.clone()))
    .then(handle_exchange);

    // 2. GET /health
    let health = warp::path("health")
    .and(warp::path::end())
    .and(warp::get())
    .and(with_store(store))
    .then(handle_health);

    exchange.or(health).recover(handle_rejection)
}

fn with_store(store: RecordStore) -> impl Filter<Extract = (RecordStore,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

async fn handle_exchange(req: ExchangeRequest, store: RecordStore) -> Response {
    match exchange_secret(&store, req.secret).await {
        Ok(outcome) => json_reply(StatusCode::OK, &ExchangeResponse { secret: outcome.secret().to_string() }),
        Err(StoreError::Validation(e)) => error_reply(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            // Details stay in the log, never in the response.
            error!(error = %e, "exchange failed");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
        }
    }
}

async fn handle_health(store: RecordStore) -> Response {
    match store.count().await {
        Ok(records) => json_reply(StatusCode::OK, &HealthResponse { status: "ok".into(), records }),
        Err(e) => {
            error!(error = %e, "health check failed");
            error_reply(StatusCode::SERVICE_UNAVAILABLE, INTERNAL_ERROR)
        }
    }
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let reply = if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        error_reply(StatusCode::BAD_REQUEST, NOT_A_STRING)
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        error_reply(StatusCode::LENGTH_REQUIRED, "Length Required")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        error_reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    } else if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "Not Found")
    } else {
        error!(rejection = ?err, "unhandled rejection");
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
    };
    Ok(reply)
}

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    json_reply(status, &ErrorResponse { error: message.to_string() })
}
