use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use category_runtime::{CategoryTable, CounterSnapshot};

// ════════════════════════════════════════════════════════════════
//  Status / admin HTTP API
// ════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct AppState {
    table: Arc<CategoryTable>,
}

#[derive(Serialize)]
struct CategoryStatus {
    name: String,
    /// Последняя непустая ошибка корневого store'а; пустая строка = ок.
    status: String,
    counters: CounterSnapshot,
}

#[derive(Serialize)]
struct ServerStatus {
    categories: Vec<CategoryStatus>,
}

/// Поднять status API: per-category статус и счётчики.
pub async fn run(
    port: u16,
    table: Arc<CategoryTable>,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let state = AppState { table };

    let app = Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/categories", get(handle_list_categories))
        .route("/api/categories/{name}", get(handle_category))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind status api :{port}: {e}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}

// --- REST: GET /api/status ---

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let categories = state
        .table
        .category_names()
        .into_iter()
        .filter_map(|name| {
            state.table.category_info(&name).map(|(status, counters)| CategoryStatus {
                name,
                status,
                counters,
            })
        })
        .collect();
    axum::Json(ServerStatus { categories }).into_response()
}

// --- REST: GET /api/categories ---

async fn handle_list_categories(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.table.category_names()).into_response()
}

// --- REST: GET /api/categories/{name} ---

async fn handle_category(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.table.category_info(&name) {
        Some((status, counters)) => {
            axum::Json(CategoryStatus { name, status, counters }).into_response()
        }
        None => (
            axum::http::StatusCode::NOT_FOUND,
            format!("category '{name}' not found"),
        )
            .into_response(),
    }
}
