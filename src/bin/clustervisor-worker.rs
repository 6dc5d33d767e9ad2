//! Reference worker for `clustervisor`.
//!
//! Binds the shared service port (SO_REUSEPORT, so every worker can bind it),
//! reports `listening` to the master and serves two routes:
//!
//! - `GET /api/v0`          → `{"status":"ok","worker":<id>}`
//! - `GET /api/v0/clusters` → master stats, fetched over the bus (`masterStatus`)
//!
//! Logs go to stderr; stdout carries the channel protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use clustervisor::{MASTER_STATUS, WorkerLink, worker_id_from_env};

#[derive(Parser, Debug)]
#[command(name = "clustervisor-worker", version, about = "Reference cluster worker")]
struct Args {
    /// Address shared by every worker.
    #[arg(long, env = "CLUSTER_WORKER_ADDR", default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// How long `/clusters` waits for the master, in milliseconds.
    #[arg(long, env = "CLUSTER_STATUS_TIMEOUT_MS", default_value_t = 5000)]
    status_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let Some(id) = worker_id_from_env() else {
        bail!("not started by a cluster master (CLUSTER_WORKER_ID is missing)");
    };

    let (link, outbound) = WorkerLink::new(id);
    let link = Arc::new(link);
    let listener = bind_shared(args.addr).with_context(|| format!("binding {}", args.addr))?;

    let address = listener.local_addr()?.to_string();
    link.log("info", vec![json!("listening on"), json!(address)]);
    link.listening(Some(address));

    let timeout = Duration::from_millis(args.status_timeout_ms);
    let server = tokio::spawn(serve(listener, Arc::clone(&link), timeout));

    // The master closing our stdin means it is gone.
    let pumped = link.run_stdio(outbound).await;
    server.abort();
    info!(worker_id = id, "master channel closed; exiting");
    pumped.context("channel to master failed")
}

fn bind_shared(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn serve(listener: TcpListener, link: Arc<WorkerLink>, timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let link = Arc::clone(&link);
                tokio::spawn(async move {
                    if let Err(e) = handle(stream, &link, timeout).await {
                        debug!(%peer, error = %e, "connection failed");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn handle(stream: TcpStream, link: &WorkerLink, timeout: Duration) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    // Headers are not used; drain them so the client sees a clean response.
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 || header.trim().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    let (status, body) = match (method, path.trim_end_matches('/')) {
        ("GET", "/api/v0") => (200, json!({"status": "ok", "worker": link.id()})),
        ("GET", "/api/v0/clusters") => {
            match link.bus().request(MASTER_STATUS, Value::Null, timeout).await {
                Ok(event) => (200, event.payload),
                Err(e) => (504, json!({"error": e.to_string()})),
            }
        }
        _ => (404, json!({"error": "not found"})),
    };

    let body = serde_json::to_vec(&body)?;
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Gateway Timeout",
    };
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    );
    write.write_all(head.as_bytes()).await?;
    write.write_all(&body).await?;
    write.shutdown().await?;
    Ok(())
}
