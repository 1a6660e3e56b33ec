use std::convert::Infallible;
use std::sync::Arc;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use crate::sdk::api::{AirdropQuery, RankingsQuery, RegisterRequest, ScoreUpdate};
use crate::sdk::client::ADMIN_TOKEN_HEADER;
use crate::server::Backend;
use crate::{Error, Result};

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Default cap on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

pub struct Router {
    backend: Arc<Backend>,
    semaphore: Arc<Semaphore>,
}

impl Router {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self::with_max_connections(backend, DEFAULT_MAX_CONNECTIONS)
    }

    pub fn with_max_connections(backend: Arc<Backend>, max_connections: usize) -> Self {
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    pub async fn listen(&self, port: &str) -> Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        info!("CTT Arena backend listening on port {}", port);
        self.serve(listener).await
    }

    /// Accepts connections on an already bound listener until it fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            let backend = self.backend.clone();
            let sem = self.semaphore.clone();

            tokio::spawn(async move {
                let _permit = match sem.try_acquire() {
                    Ok(p) => p,
                    Err(_) => {
                        error!("Server busy: too many concurrent connections. Rejecting {}", addr);
                        drop(socket);
                        return;
                    }
                };

                if let Err(e) = handle_connection(socket, backend).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

/// Serves HTTP/1.1 requests on one connection until the client closes it.
pub async fn handle_connection(socket: TcpStream, backend: Arc<Backend>) -> Result<()> {
    let io = TokioIo::new(socket);
    let service = service_fn(move |req| {
        let backend = backend.clone();
        async move { Ok::<_, Infallible>(handle_request(backend, req).await) }
    });
    http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|e| Error::Internal(e.to_string()))
}

async fn handle_request(backend: Arc<Backend>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {}", method, path);

    if method == Method::OPTIONS {
        return preflight_response();
    }

    match route(&backend, req).await {
        Ok(response) => response,
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("{} {} failed: {}", method, path, e);
            } else {
                warn!("{} {} rejected: {}", method, path, e);
            }
            json_response(status, &json!({"error": e.to_string()}))
        }
    }
}

async fn route(backend: &Backend, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
    let method = req.method().clone();
    let query = req.uri().query().unwrap_or("").to_string();
    let segments = path_segments(req.uri().path())?;
    let parts: Vec<&str> = segments.iter().map(String::as_str).collect();

    if parts.first() == Some(&"admin") {
        let token = req.headers().get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok());
        backend.authorize(token)?;
    }

    match (method, parts.as_slice()) {
        (Method::GET, ["health"]) => Ok(ok(&json!({"status": "ok"}))),
        (Method::POST, ["register"]) => {
            let request: RegisterRequest = read_json(req).await?;
            Ok(ok(&backend.register(request).await?))
        }
        (Method::GET, ["users", email]) => Ok(ok(&backend.get_user(email).await?)),
        (Method::POST, ["update-score"]) => {
            let update: ScoreUpdate = read_json(req).await?;
            Ok(ok(&backend.update_score(update).await?))
        }
        (Method::GET, ["rankings"]) => {
            let params: RankingsQuery = parse_query(&query)?;
            Ok(ok(&backend.rankings(params.limit).await?))
        }
        (Method::GET, ["admin", "users"]) => Ok(ok(&backend.users().await?)),
        (Method::PUT, ["admin", "users", id]) => {
            let id = id.to_string();
            let patch: serde_json::Value = read_json(req).await?;
            Ok(ok(&backend.update_user(&id, patch).await?))
        }
        (Method::DELETE, ["admin", "users", id]) => {
            backend.delete_user(id).await?;
            Ok(ok(&json!({"deleted": id})))
        }
        (Method::GET, ["admin", "airdrop"]) => {
            let params: AirdropQuery = parse_query(&query)?;
            Ok(ok(&backend.airdrop(params.pool, params.min_points).await?))
        }
        (_, parts) => Ok(json_response(
            StatusCode::NOT_FOUND,
            &json!({"error": format!("no route for /{}", parts.join("/"))}),
        )),
    }
}

fn path_segments(path: &str) -> Result<Vec<String>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .map_err(|_| Error::InvalidRequest(format!("bad path segment '{}'", s)))
        })
        .collect()
}

fn parse_query<T: DeserializeOwned>(query: &str) -> Result<T> {
    serde_urlencoded::from_str(query)
        .map_err(|e| Error::InvalidRequest(format!("bad query string: {}", e)))
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| Error::InvalidRequest(format!("could not read body: {}", e)))?
        .to_bytes();
    serde_json::from_slice(&body).map_err(|e| Error::InvalidRequest(format!("invalid JSON body: {}", e)))
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::DuplicateEntry(_) => StatusCode::CONFLICT,
        Error::InvalidRequest(_)
        | Error::InvalidAmount(_)
        | Error::InsufficientPoints { .. }
        | Error::RoundClosed(_)
        | Error::AlreadySettled(_)
        | Error::Serialization(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": format!("could not encode response: {}", e)}).to_string().into_bytes(),
        ),
    };
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"));
    response
}
