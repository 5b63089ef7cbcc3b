//! Minimal HTTP serving layer over the orchestrator's query API.
//!
//! Routes (GET only):
//! - `/health`
//! - `/road_names` (alias `/road_name`): configured names in order
//! - `/info`: latest window summary of every road, keyed by name
//! - `/info/{name}`: latest window summary
//! - `/frames/{name}`: latest annotated frame as `image/jpeg`
//!
//! Path segments are percent-decoded, so names with spaces or non-ASCII
//! characters can be addressed. Unknown names answer 404.

use anyhow::{anyhow, Result};
use percent_encoding::percent_decode_str;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::orchestrator::{Orchestrator, QueryError};

const MAX_REQUEST_BYTES: usize = 8192;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8800";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
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
    orchestrator: Arc<Orchestrator>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self { cfg, orchestrator }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let orchestrator = self.orchestrator;
        let join = std::thread::Builder::new()
            .name("road-api".into())
            .spawn(move || {
                if let Err(err) = run_api(listener, &orchestrator, shutdown_thread) {
                    log::error!("road api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    orchestrator: &Orchestrator,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, orchestrator) {
                    log::warn!("road api request rejected: {}", err);
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

/// A resolved route.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Health,
    RoadNames,
    AllInfo,
    Info(String),
    Frame(String),
    NotFound,
}

fn route(path: &str) -> Result<Route> {
    let path = path.trim_end_matches('/');
    let route = match path {
        "/health" => Route::Health,
        "/road_names" | "/road_name" => Route::RoadNames,
        "/info" => Route::AllInfo,
        _ => {
            if let Some(name) = path.strip_prefix("/info/") {
                Route::Info(decode_segment(name)?)
            } else if let Some(name) = path.strip_prefix("/frames/") {
                Route::Frame(decode_segment(name)?)
            } else {
                Route::NotFound
            }
        }
    };
    Ok(route)
}

fn decode_segment(segment: &str) -> Result<String> {
    if segment.contains('/') {
        return Err(anyhow!("road name segment must not contain '/'"));
    }
    percent_decode_str(segment)
        .decode_utf8()
        .map(|name| name.into_owned())
        .map_err(|_| anyhow!("road name is not valid UTF-8 after decoding"))
}

fn handle_connection(mut stream: TcpStream, orchestrator: &Orchestrator) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    let resolved = match route(&request.path) {
        Ok(route) => route,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };
    match resolved {
        Route::Health => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        Route::RoadNames => {
            let payload = serde_json::to_vec(&serde_json::json!({
                "road_names": orchestrator.list_stream_names(),
            }))?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Route::AllInfo => {
            let mut roads = serde_json::Map::new();
            for name in orchestrator.list_stream_names() {
                // Names come from the configuration, so the lookup cannot miss.
                if let Ok(summary) = orchestrator.get_info(&name) {
                    roads.insert(name, serde_json::to_value(&summary)?);
                }
            }
            let payload = serde_json::to_vec(&roads)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        Route::Info(name) => match orchestrator.get_info(&name) {
            Ok(summary) => {
                let payload = serde_json::to_vec(&summary)?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            Err(QueryError::NotFound(_)) => {
                write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)
            }
        },
        Route::Frame(name) => match orchestrator.get_frame(&name) {
            Ok(jpeg) => write_response(&mut stream, 200, "image/jpeg", &jpeg),
            Err(QueryError::NotFound(_)) => {
                write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)
            }
        },
        Route::NotFound => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
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
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
