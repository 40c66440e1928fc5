//! Minimal blocking HTTP/1.1 front end over [`FrameService`].
//!
//! One accept thread polls a non-blocking listener and checks a shutdown
//! flag between accepts; each connection is served on its own short-lived
//! thread so a slow upload or a stream stop never stalls other requests.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::StreamError;
use crate::ingest::DEFAULT_INTERVAL_SECS;
use crate::service::FrameService;
use crate::storage::FrameId;

const MAX_HEADER_BYTES: usize = 8192;
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
/// Page size of the listing endpoints.
pub const LIST_LIMIT: usize = 200;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: Arc<FrameService>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: Arc<FrameService>) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let service = self.service;
        let join = std::thread::Builder::new()
            .name("api-listener".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, service, shutdown_thread) {
                    log::error!("frame api stopped: {}", err);
                }
            })?;
        log::info!("frame api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    service: Arc<FrameService>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let service = service.clone();
                let spawned = std::thread::Builder::new()
                    .name("api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &service) {
                            log::warn!("frame api request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("frame api: cannot spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, service: &FrameService) -> Result<()> {
    stream.set_nonblocking(false)?;
    let response = match read_request(&mut stream) {
        Ok(request) => route(&request, service),
        Err(RequestError::TooLarge) => Response::error(413, "payload_too_large"),
        Err(RequestError::Malformed(err)) => {
            log::debug!("malformed request: {:#}", err);
            Response::error(400, "bad_request")
        }
    };
    write_response(
        &mut stream,
        response.status,
        response.content_type,
        &response.body,
    )
}

#[derive(Debug, Deserialize)]
struct StartStreamRequest {
    name: String,
    url: String,
    #[serde(default = "default_interval")]
    interval: f64,
}

fn default_interval() -> f64 {
    DEFAULT_INTERVAL_SECS
}

#[derive(Debug, Deserialize)]
struct StopStreamRequest {
    name: String,
}

fn route(request: &HttpRequest, service: &FrameService) -> Response {
    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    let method = request.method.as_str();
    match (method, segments.as_slice()) {
        ("GET", ["health"]) => Response::json(
            200,
            &serde_json::json!({ "status": "ok", "stats": service.stats() }),
        ),
        ("POST", ["upload"]) => upload(request, service),
        ("GET", ["images"]) => match service.recent_frames(LIST_LIMIT) {
            Ok(frames) => Response::json(200, &frames),
            Err(err) => Response::internal(err),
        },
        ("GET", ["images", id]) => match parse_id(id) {
            Some(id) => match service.frame(id) {
                Ok(Some(frame)) => Response::json(200, &frame),
                Ok(None) => Response::error(404, "image_not_found"),
                Err(err) => Response::internal(err),
            },
            None => Response::error(400, "invalid_id"),
        },
        ("GET", ["images", id, "raw"]) => match parse_id(id) {
            Some(id) => raw_image(id, service),
            None => Response::error(400, "invalid_id"),
        },
        ("GET", ["motion_events"]) => match service.recent_outcomes(LIST_LIMIT) {
            Ok(outcomes) => Response::json(200, &outcomes),
            Err(err) => Response::internal(err),
        },
        ("POST", ["start_stream"]) => start_stream(request, service),
        ("POST", ["stop_stream"]) => stop_stream(request, service),
        ("GET", ["streams"]) => match service.list_active_streams() {
            Ok(streams) => Response::json(200, &streams),
            Err(err) => Response::internal(err),
        },
        (
            _,
            ["health"] | ["upload"] | ["images"] | ["images", _] | ["images", _, "raw"]
            | ["motion_events"] | ["start_stream"] | ["stop_stream"] | ["streams"],
        ) => Response::error(405, "method_not_allowed"),
        _ => Response::error(404, "not_found"),
    }
}

fn upload(request: &HttpRequest, service: &FrameService) -> Response {
    let bytes: &[u8] = match request.media_type().as_deref() {
        Some("image/jpeg") | Some("image/png") => &request.body,
        Some("multipart/form-data") => {
            let Some(boundary) = request.content_type_param("boundary") else {
                return Response::error(400, "missing_boundary");
            };
            let Some(part) = multipart_part(&request.body, &boundary, "file") else {
                return Response::error(400, "missing_file");
            };
            match part.media_type.as_deref() {
                Some("image/jpeg") | Some("image/png") => part.data,
                _ => return Response::error(400, "unsupported_media_type"),
            }
        }
        _ => return Response::error(415, "unsupported_media_type"),
    };
    if bytes.is_empty() {
        return Response::error(400, "empty_file");
    }
    match service.ingest_upload(bytes) {
        Ok(result) => Response::json(200, &result),
        Err(err) => Response::internal(err),
    }
}

struct MultipartPart<'a> {
    media_type: Option<String>,
    data: &'a [u8],
}

/// Find the form field `name` in a `multipart/form-data` body.
fn multipart_part<'a>(body: &'a [u8], boundary: &str, name: &str) -> Option<MultipartPart<'a>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut rest = &body[find(body, &delimiter)? + delimiter.len()..];
    loop {
        if rest.starts_with(b"--") {
            return None;
        }
        rest = rest.strip_prefix(b"\r\n")?;
        let next = find(rest, &delimiter)?;
        let part = rest[..next].strip_suffix(b"\r\n")?;
        rest = &rest[next + delimiter.len()..];

        let header_end = find(part, b"\r\n\r\n")?;
        let headers = String::from_utf8_lossy(&part[..header_end]);
        let mut field = None;
        let mut media_type = None;
        for line in headers.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "content-disposition" => field = header_param(value, "name"),
                "content-type" => media_type = Some(bare_media_type(value)),
                _ => {}
            }
        }
        if field.as_deref() == Some(name) {
            return Some(MultipartPart {
                media_type,
                data: &part[header_end + 4..],
            });
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn bare_media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Value of `key=...` among the `;`-separated parameters of a header value.
fn header_param(value: &str, key: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        if k.trim().eq_ignore_ascii_case(key) {
            Some(v.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn raw_image(id: FrameId, service: &FrameService) -> Response {
    let frame = match service.frame(id) {
        Ok(Some(frame)) => frame,
        Ok(None) => return Response::error(404, "image_not_found"),
        Err(err) => return Response::internal(err),
    };
    match std::fs::read(&frame.file_path) {
        Ok(bytes) => {
            let content_type = match image::guess_format(&bytes) {
                Ok(image::ImageFormat::Png) => "image/png",
                Ok(image::ImageFormat::Jpeg) => "image/jpeg",
                _ => "application/octet-stream",
            };
            Response {
                status: 200,
                content_type,
                body: bytes,
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Response::error(404, "file_missing")
        }
        Err(err) => Response::internal(err),
    }
}

fn start_stream(request: &HttpRequest, service: &FrameService) -> Response {
    let body: StartStreamRequest = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(_) => return Response::error(400, "invalid_json"),
    };
    match service.start_stream(&body.name, &body.url, body.interval) {
        Ok(info) => Response::json(
            200,
            &serde_json::json!({
                "status": "started",
                "name": info.name,
                "url": info.url,
                "interval": info.interval_secs,
            }),
        ),
        Err(err) => stream_error(err),
    }
}

fn stop_stream(request: &HttpRequest, service: &FrameService) -> Response {
    let body: StopStreamRequest = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(_) => return Response::error(400, "invalid_json"),
    };
    match service.stop_stream(&body.name) {
        Ok(()) => Response::json(
            200,
            &serde_json::json!({ "status": "stopped", "name": body.name }),
        ),
        Err(err) => stream_error(err),
    }
}

fn stream_error(err: StreamError) -> Response {
    let status = match err {
        StreamError::DuplicateName(_)
        | StreamError::InvalidUrl { .. }
        | StreamError::InvalidName(_)
        | StreamError::InvalidInterval(_) => 400,
        StreamError::NotFound(_) => 404,
        StreamError::Stopping(_) => 409,
        StreamError::Spawn(_) | StreamError::Poisoned => {
            log::warn!("frame api: {}", err);
            500
        }
    };
    Response::json(status, &ErrorBody {
        error: err.to_string(),
    })
}

fn parse_id(raw: &str) -> Option<FrameId> {
    raw.parse().ok()
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => Self::internal(err),
        }
    }

    fn error(status: u16, code: &str) -> Self {
        Self::json(
            status,
            &ErrorBody {
                error: code.to_string(),
            },
        )
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        log::warn!("frame api internal error: {:#}", err);
        Self {
            status: 500,
            content_type: "application/json",
            body: br#"{"error":"internal_error"}"#.to_vec(),
        }
    }
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        Self::Malformed(err)
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        Self::Malformed(err.into())
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed(anyhow!("connection closed mid-request")));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
    };
    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_UPLOAD_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let mut rest = vec![0u8; content_length - body.len()];
        stream.read_exact(&mut rest)?;
        body.extend_from_slice(&rest);
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        413 => "HTTP/1.1 413 Payload Too Large",
        415 => "HTTP/1.1 415 Unsupported Media Type",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    /// Content type without parameters, lowercased.
    fn media_type(&self) -> Option<String> {
        self.headers
            .get("content-type")
            .map(|value| bare_media_type(value))
    }

    fn content_type_param(&self, key: &str) -> Option<String> {
        self.headers
            .get("content-type")
            .and_then(|value| header_param(value, key))
    }
}
