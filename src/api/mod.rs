use crate::pipeline::{Pipeline, STREAM_CONTENT_TYPE};
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// A stream client that accepts no bytes for this long is dropped.
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const ALLOWED_METHODS: &str = "GET, OPTIONS";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting, end live streams and wait for the accept loop to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.pipeline.shutdown();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<Pipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<Pipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|_| anyhow!("invalid listen address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let pipeline = self.pipeline.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, pipeline, shutdown_thread) {
                log::error!("http server stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            pipeline: self.pipeline,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, pipeline: Arc<Pipeline>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let pipeline = pipeline.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &pipeline) {
                        log::warn!("request from {} failed: {:#}", peer, err);
                    }
                });
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

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'static str,
    model: &'static str,
    #[serde(rename = "fallbackReason", skip_serializing_if = "Option::is_none")]
    fallback_reason: Option<&'a str>,
}

#[derive(Serialize)]
struct OutcomeBody<T: Serialize> {
    status: T,
}

fn handle_connection(mut stream: TcpStream, pipeline: &Arc<Pipeline>) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.raw_path);

    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, "text/plain", b"");
    }
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }

    let result = match request.path.as_str() {
        "/video_feed" => return stream_video(stream, pipeline),
        "/analysis" => write_json(&mut stream, &pipeline.board().snapshot()),
        "/status" => {
            let selection = pipeline.detector().selection();
            write_json(
                &mut stream,
                &StatusBody {
                    status: "running",
                    model: selection.kind.as_str(),
                    fallback_reason: selection.fallback_reason.as_deref(),
                },
            )
        }
        "/start_camera" => match pipeline.camera().start() {
            Ok(outcome) => write_json(&mut stream, &OutcomeBody { status: outcome }),
            Err(err) => Err(err),
        },
        "/stop_camera" => match pipeline.camera().stop() {
            Ok(outcome) => write_json(&mut stream, &OutcomeBody { status: outcome }),
            Err(err) => Err(err),
        },
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    };

    if let Err(err) = result {
        let body = serde_json::json!({ "error": format!("{:#}", err) }).to_string();
        write_json_response(&mut stream, 500, &body)?;
        return Err(err);
    }
    Ok(())
}

fn stream_video(mut stream: TcpStream, pipeline: &Arc<Pipeline>) -> Result<()> {
    let session = match pipeline.open_stream() {
        Ok(session) => session,
        Err(err) => {
            let body = serde_json::json!({ "error": format!("{:#}", err) }).to_string();
            write_json_response(&mut stream, 500, &body)?;
            return Err(err);
        }
    };
    let peer = stream.peer_addr()?;
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    log::info!("video stream started for {}", peer);

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        STREAM_CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;

    let cancel = session.cancel_handle();
    for part in session {
        if let Err(err) = stream.write_all(&part).and_then(|_| stream.flush()) {
            log::info!("video stream client {} went away: {}", peer, err);
            cancel.cancel();
            break;
        }
    }
    log::info!("video stream ended for {}", peer);
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
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
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
    })
}

fn write_json<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write_response(stream, 200, "application/json", &payload)
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
        204 => "HTTP/1.1 204 No Content",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let allow = if status == 204 || status == 405 {
        format!(
            "Allow: {m}\r\nAccess-Control-Allow-Methods: {m}\r\nAccess-Control-Allow-Headers: *\r\n",
            m = ALLOWED_METHODS
        )
    } else {
        String::new()
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\n{allow}Connection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len(),
        allow = allow
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
}
