use axum::{extract::State, http::StatusCode, Json};
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::{error, info};

use crate::models::{DiagnosticsResponse, ErrorResponse};
use crate::AppState;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Report relay occupancy alongside process resource usage
pub async fn diagnostics(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    let stats = match state.relay.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            error!("Failed to collect relay stats: {}", e);
            let status = StatusCode::SERVICE_UNAVAILABLE;
            return Err((status, Json(ErrorResponse::new(status, e.to_string()))));
        }
    };

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.connections,
        stats.rooms
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn: stats.connections as u32,
            n_rooms: stats.rooms as u32,
            n_participants: stats.participants as u32,
            n_pending_joins: stats.pending_joins as u32,
            store: stats.store.to_string(),
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
