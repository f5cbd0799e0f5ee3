use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use barge_api::framing::{decode_frame, encode_frame};
use barge_api::{LogRequest, LogResponse, SystemClock};
use category_runtime::CategoryTable;
use conn_pool::{ConnectionPool, StaticResolver};
use store_engine::StoreContext;

use crate::config::{ServeArgs, ServerConfig, parse_host_port};
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("barge-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    if config.categories.is_empty() {
        return Err(ServerError::NoComponents("[[category]]"));
    }

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Shared resources: clock, conn pool, name resolver ---
    let mut services = HashMap::new();
    for (name, addr) in &config.services {
        services.insert(name.clone(), parse_host_port(addr)?);
    }
    let ctx = StoreContext {
        clock: Arc::new(SystemClock),
        pool: Arc::new(ConnectionPool::new()),
        resolver: Arc::new(StaticResolver::new(services)),
    };

    // --- Category table: `default` is the template for unknowns ---
    let default_model = config
        .categories
        .iter()
        .find(|c| c.name == "default")
        .map(|c| c.store.clone());

    let table = Arc::new(CategoryTable::new(
        ctx,
        default_model,
        Duration::from_millis(config.check_interval_ms),
        config.max_queue_length,
        token.clone(),
    )?);

    for category in &config.categories {
        if category.name == "default" {
            continue;
        }
        table.add_category(&category.name, &category.store)?;
        tracing::info!(
            category = %category.name,
            store = category.store.kind_name(),
            "category configured"
        );
    }

    // --- Wire protocol listener ---
    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "log listener bound");

    let accept_table = table.clone();
    let accept_token = token.clone();
    let max_frame = config.max_frame_size;
    let listener_handle: JoinHandle<()> = tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((sock, peer)) => {
                            let table = accept_table.clone();
                            let conn_token = accept_token.clone();
                            tokio::spawn(async move {
                                handle_client(sock, peer.to_string(), table, max_frame, conn_token)
                                    .await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = accept_token.cancelled() => break,
            }
        }
    });

    // --- Status API (HTTP) ---
    let api_table = table.clone();
    let api_port = config.status_port;
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = status_api_server::run(api_port, api_table, api_token).await {
            tracing::error!(error = %e, "status api error");
        }
    });

    tracing::info!(port = config.status_port, "status api listening");
    tracing::info!("server ready");

    // --- Ожидание Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    // Signal everything to stop cooperatively.
    token.cancel();

    // Воркеры добирают очередь, flush'ат и закрывают свои деревья.
    for worker in table.take_workers() {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "worker join error");
        }
    }

    if !listener_handle.is_finished() {
        listener_handle.abort();
    }
    let _ = listener_handle.await;
    let _ = api_handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Обслуживание одного клиентского соединения: length-prefixed JSON
/// фреймы запросов `Log`, по ответу на фрейм.
async fn handle_client(
    mut sock: TcpStream,
    peer: String,
    table: Arc<CategoryTable>,
    max_frame: usize,
    token: CancellationToken,
) {
    tracing::debug!(peer = %peer, "client connected");
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut tmp = [0u8; 4096];

    loop {
        loop {
            match decode_frame(&buf, max_frame) {
                Ok(Some((payload, used))) => {
                    buf.drain(..used);

                    let request: LogRequest = match serde_json::from_slice(&payload) {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(peer = %peer, error = %e, "bad request, disconnecting");
                            return;
                        }
                    };

                    let result = table.submit(request.entries);

                    let body = match serde_json::to_vec(&LogResponse { result }) {
                        Ok(b) => b,
                        Err(e) => {
                            tracing::error!(peer = %peer, error = %e, "response encode failed");
                            return;
                        }
                    };
                    let mut frame = Vec::with_capacity(body.len() + 4);
                    if encode_frame(&body, &mut frame).is_err() {
                        return;
                    }
                    if let Err(e) = sock.write_all(&frame).await {
                        tracing::debug!(peer = %peer, error = %e, "write failed");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(peer = %peer, error = ?e, "framing error, disconnecting");
                    return;
                }
            }
        }

        tokio::select! {
            read = sock.read(&mut tmp) => {
                match read {
                    Ok(0) => {
                        tracing::debug!(peer = %peer, "client disconnected");
                        return;
                    }
                    Ok(n) => buf.extend_from_slice(&tmp[..n]),
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "read failed");
                        return;
                    }
                }
            }
            _ = token.cancelled() => return,
        }
    }
}
