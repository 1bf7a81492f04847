// ABOUTME: Request handlers for the HTTP API
// ABOUTME: Validate input, pick the connection for a side, delegate to the sync core

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_postgres::Client;

use super::response::{ApiError, ApiResponse};
use super::{AppState, SharedClient};
use crate::config::DbConfig;
use crate::postgres::{connect_with_retry, is_auth_failure, list_tables, PgTable};
use crate::sync::{read_table, Reconciler, Row, Side, SyncError, SyncOutcome};

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub source: DbConfig,
    pub target: DbConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableNames {
    pub source_tables: Vec<String>,
    pub target_tables: Vec<String>,
}

/// Query string of `/tables` and `/rows`.
#[derive(Debug, Default, Deserialize)]
pub struct TableQuery {
    #[serde(rename = "type")]
    pub side: Option<String>,
    pub table: Option<String>,
}

/// One entry of the `/sync` body.
#[derive(Debug, Deserialize)]
pub struct SyncDataRequest {
    #[serde(default)]
    pub table: String,
    #[serde(rename = "type", default)]
    pub side: String,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub source: bool,
    pub target: bool,
}

fn parse_side(value: Option<&str>) -> Result<Side, ApiError> {
    match value {
        Some("source") => Ok(Side::Source),
        Some("target") => Ok(Side::Target),
        _ => Err(ApiError::bad_request("You must provide type (source/target)")),
    }
}

fn capitalized(side: Side) -> &'static str {
    match side {
        Side::Source => "Source",
        Side::Target => "Target",
    }
}

async fn require_connection(state: &AppState, side: Side) -> Result<SharedClient, ApiError> {
    state.connection(side).await.ok_or_else(|| {
        ApiError::internal(format!("{} database not connected", capitalized(side)))
    })
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    tracing::debug!("Rejected request body: {}", rejection);
    ApiError::bad_request("Invalid request body")
}

async fn open(state: &AppState, side: Side, config: &DbConfig) -> Result<Client, ApiError> {
    let dsn = config
        .build_dsn()
        .map_err(|e| ApiError::bad_request(format!("Invalid {} connection settings: {}", side, e)))?;

    connect_with_retry(
        &dsn,
        state.settings.connect_retries,
        state.settings.retry_delay(),
    )
    .await
    .map_err(|e| {
        tracing::error!("Connecting to the {} database failed: {:#}", side, e);
        if is_auth_failure(&e) {
            ApiError::internal("invalid username or password")
        } else {
            ApiError::internal(format!("couldn't connect to the {} database", side))
        }
    })
}

async fn fetch_tables(state: &AppState, side: Side, client: &Client) -> Result<Vec<String>, ApiError> {
    list_tables(client, &state.settings.schema)
        .await
        .map_err(|e| {
            tracing::error!("Listing {} tables failed: {:#}", side, e);
            ApiError::internal("Couldn't fetch tables")
        })
}

/// `POST /connect`
pub async fn connect_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<ApiResponse<TableNames>, ApiError> {
    let Json(request) = body.map_err(invalid_body)?;

    let source = open(&state, Side::Source, &request.source).await?;
    let target = open(&state, Side::Target, &request.target).await?;

    let source_tables = fetch_tables(&state, Side::Source, &source).await?;
    let target_tables = fetch_tables(&state, Side::Target, &target).await?;

    state.set_connection(Side::Source, source).await;
    state.set_connection(Side::Target, target).await;
    tracing::info!("Connected to source and target databases");

    Ok(ApiResponse::ok(
        "Connected successfully",
        TableNames {
            source_tables,
            target_tables,
        },
    ))
}

/// `GET /tables?type=source|target`
pub async fn tables_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<TableQuery>,
) -> Result<ApiResponse<Vec<String>>, ApiError> {
    let side = parse_side(query.side.as_deref())?;
    let connection = require_connection(&state, side).await?;
    let client = connection.lock().await;
    let tables = fetch_tables(&state, side, &client).await?;
    Ok(ApiResponse::ok("Tables fetched", tables))
}

/// `GET /rows?type=source|target&table=T`
pub async fn rows_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<TableQuery>,
) -> Result<ApiResponse<Vec<Row>>, ApiError> {
    let side = parse_side(query.side.as_deref())?;
    let table = query
        .table
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("You must provide table name"))?;
    let connection = require_connection(&state, side).await?;

    let pg = PgTable::new(&connection, state.settings.schema.as_str());
    match read_table(&pg, side, &table).await {
        Ok(rows) => Ok(ApiResponse::ok("Rows fetched", rows)),
        Err(e @ SyncError::UnknownTable { .. }) => {
            Err(ApiError::new(StatusCode::NOT_FOUND, e.to_string()))
        }
        Err(e) => {
            tracing::error!("Reading {} rows of {} failed: {}", side, table, e);
            Err(ApiError::internal("Couldn't fetch rows"))
        }
    }
}

/// `POST /sync` with `[{table, type: "source"}, {table, type: "target"}]`
pub async fn sync_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<Vec<SyncDataRequest>>, JsonRejection>,
) -> Result<ApiResponse<SyncOutcome>, ApiError> {
    let Json(entries) = body.map_err(invalid_body)?;
    if entries.len() != 2 {
        return Err(ApiError::bad_request(
            "There should be exactly two entries: one source and one target",
        ));
    }

    let mut source_table = None;
    let mut target_table = None;
    for entry in entries {
        match parse_side(Some(entry.side.as_str()))? {
            Side::Source => source_table = Some(entry.table),
            Side::Target => target_table = Some(entry.table),
        }
    }
    let (source_table, target_table) = match (source_table, target_table) {
        (Some(s), Some(t)) if !s.is_empty() && !t.is_empty() => (s, t),
        _ => return Err(ApiError::bad_request("You must provide table name")),
    };

    let source_client = require_connection(&state, Side::Source).await?;
    let target_client = require_connection(&state, Side::Target).await?;

    let _guard = state.sync_lock.lock().await;
    let source = PgTable::new(&source_client, state.settings.schema.as_str());
    let target = PgTable::new(&target_client, state.settings.schema.as_str());
    let mut reconciler = Reconciler::new(
        &source,
        &target,
        &target,
        state.settings.reconcile_config(),
    );

    match reconciler.synchronize(&source_table, &target_table).await {
        Ok(outcome) => Ok(ApiResponse::created("Data synced successfully", outcome)),
        Err(e) => Err(sync_error(&e)),
    }
}

fn sync_error(err: &SyncError) -> ApiError {
    if err.is_preflight() {
        return ApiError::bad_request(err.to_string());
    }

    let target_modified = err.target_modified();
    let message = if target_modified {
        format!("Failed to synchronize data; the target was partially modified: {}", err)
    } else {
        format!("Failed to synchronize data; the target was not modified: {}", err)
    };
    ApiError::internal(message).with_data(json!({ "targetModified": target_modified }))
}

/// `GET /health`
pub async fn health_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<ApiResponse<Health>, ApiError> {
    let health = Health {
        source: state.is_connected(Side::Source).await,
        target: state.is_connected(Side::Target).await,
    };
    if !health.source && !health.target {
        return Err(ApiError::internal("Database not connected"));
    }
    Ok(ApiResponse::ok("Service is healthy", health))
}
