//! `/wpsynchro?action=...` 服务入口
//!
//! 站点间的 action 使用加密信封，管理 action 使用普通 JSON。
//! 业务失败放进响应的 errors 数组并返回 200；权限失败返回 401。

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use crate::db::{MigrationRepository, SiteStateRepository};
use crate::models::{
    BackupRequest, DbSyncRequest, ExecuteActionRequest, ExecuteResponse, InitiateRequest,
    InitiateResponse, MasterdataRequest, Migration, RunRequest, StatusRequest,
};
use crate::services::{
    database_backup, database_sync, execute_action, initiate, masterdata, row_fetcher, AppState,
    MigrationController,
};
use crate::transport::{actions, Envelope};
use crate::utils::crypto;
use crate::utils::error::{AppError, Result};

/// 管理接口密钥请求头
pub const ADMIN_KEY_HEADER: &str = "x-wpsynchro-admin-key";

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub action: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// action 的响应
#[derive(Debug)]
pub enum ServiceReply {
    Envelope(Vec<u8>),
    Json(Value),
    Text(&'static str),
}

impl IntoResponse for ServiceReply {
    fn into_response(self) -> Response {
        match self {
            ServiceReply::Envelope(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                body,
            )
                .into_response(),
            ServiceReply::Json(value) => Json(value).into_response(),
            ServiceReply::Text(text) => text.into_response(),
        }
    }
}

/// GET/POST /wpsynchro
pub async fn handle(
    State(state): State<AppState>,
    Query(query): Query<ServiceQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<ServiceReply, ApiError> {
    let admin_key = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    dispatch(&state, &query.action, query.token.as_deref(), admin_key, &body).await
}

pub async fn dispatch(
    state: &AppState,
    action: &str,
    token: Option<&str>,
    admin_key: Option<&str>,
    body: &[u8],
) -> std::result::Result<ServiceReply, ApiError> {
    tracing::debug!("Service action {} called with {} bytes", action, body.len());

    match action {
        actions::TEST => Ok(ServiceReply::Text("it-works")),
        actions::INITIATE => {
            envelope_action(state, body, |request: InitiateRequest| async move {
                let token = initiate::issue_token(state, &request.migration_type).await?;
                Ok::<_, AppError>(InitiateResponse { token })
            })
            .await
        }
        actions::MASTERDATA => {
            require_transfer_token(state, token).await?;
            envelope_action(state, body, |request: MasterdataRequest| async move {
                masterdata::serve(state, &request).await
            })
            .await
        }
        actions::DB_SYNC => {
            require_transfer_token(state, token).await?;
            db_sync(state, body).await
        }
        actions::BACKUP_DATABASE => {
            require_transfer_token(state, token).await?;
            envelope_action(state, body, |request: BackupRequest| async move {
                database_backup::write_chunk(state, &request).await
            })
            .await
        }
        actions::EXECUTE_ACTION => {
            require_transfer_token(state, token).await?;
            envelope_action(state, body, |request: ExecuteActionRequest| async move {
                execute_action::execute(state, &request).await?;
                Ok::<_, AppError>(json!({}))
            })
            .await
        }
        actions::RUN_SYNCHRONIZE => {
            require_token_or_admin(state, token, admin_key).await?;
            let request: RunRequest = parse_json(body)?;
            let report = MigrationController::new(state).run(&request).await?;
            Ok(ServiceReply::Json(serde_json::to_value(report)?))
        }
        actions::RUN_STATUS => {
            require_token_or_admin(state, token, admin_key).await?;
            let request: StatusRequest = parse_json(body)?;
            let report = MigrationController::new(state)
                .status(&request.migration_id, &request.job_id)
                .await?;
            Ok(ServiceReply::Json(serde_json::to_value(report)?))
        }
        actions::SAVE_MIGRATION => {
            require_admin(state, admin_key)?;
            let migration: Migration = parse_json(body)?;
            let id = MigrationRepository::new(state.store.as_ref()).save(migration).await?;
            tracing::info!("Saved migration {}", id);
            Ok(ServiceReply::Json(json!({ "id": id })))
        }
        other => Err(AppError::NotFound(format!("Unknown action: {}", other)).into()),
    }
}

async fn db_sync(state: &AppState, body: &[u8]) -> std::result::Result<ServiceReply, ApiError> {
    let access_key = site_access_key(state).await?;
    let request: DbSyncRequest = open_envelope(state, body, &access_key)?;

    let (payload, errors) = match request {
        DbSyncRequest::Pull(request) => {
            match row_fetcher::fetch_rows(state.database.as_ref(), &request).await {
                Ok(response) => (serde_json::to_value(response)?, Vec::new()),
                Err(e) => (json!({}), vec![user_message(&e)]),
            }
        }
        DbSyncRequest::Push { sql_inserts } | DbSyncRequest::Finalize { sql_inserts } => {
            match database_sync::execute_statements(state.database.as_ref(), &sql_inserts).await {
                Ok(outcome) => (
                    serde_json::to_value(ExecuteResponse {
                        executed: outcome.executed,
                    })?,
                    outcome.user_errors(),
                ),
                Err(e) => (json!({}), vec![user_message(&e)]),
            }
        }
    };

    seal(payload, errors, &access_key)
}

/// 解开信封，执行业务，把结果或错误封回信封
async fn envelope_action<Req, Resp, F, Fut>(
    state: &AppState,
    body: &[u8],
    handler: F,
) -> std::result::Result<ServiceReply, ApiError>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: std::future::Future<Output = Result<Resp>>,
{
    let access_key = site_access_key(state).await?;
    let request: Req = open_envelope(state, body, &access_key)?;

    match handler(request).await {
        Ok(response) => seal(serde_json::to_value(response)?, Vec::new(), &access_key),
        Err(e) => {
            tracing::warn!("Service action failed: {}", e);
            seal(json!({}), vec![user_message(&e)], &access_key)
        }
    }
}

fn open_envelope<T: DeserializeOwned>(state: &AppState, body: &[u8], access_key: &str) -> Result<T> {
    let envelope = Envelope::decode_with_limit(body, Some(access_key), state.settings.max_post_size)
        .map_err(|e| match e {
            AppError::InvalidInput(_) => e,
            e => {
                tracing::warn!("Could not open request envelope: {}", e);
                AppError::Unauthorized(
                    "Could not decrypt request - Check that the access key is correct".to_string(),
                )
            }
        })?;
    envelope
        .payload_as()
        .map_err(|e| AppError::InvalidInput(format!("Malformed request: {}", e)))
}

fn seal(mut payload: Value, errors: Vec<String>, access_key: &str) -> std::result::Result<ServiceReply, ApiError> {
    if let Some(object) = payload.as_object_mut() {
        object.insert("errors".to_string(), json!(errors));
        object.insert("warnings".to_string(), json!([]));
    } else {
        payload = json!({ "value": payload, "errors": errors, "warnings": [] });
    }
    let body = Envelope::new(payload).encode(Some(access_key), true)?;
    Ok(ServiceReply::Envelope(body))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let body = if body.iter().all(u8::is_ascii_whitespace) { b"{}" as &[u8] } else { body };
    serde_json::from_slice(body).map_err(|e| AppError::InvalidInput(format!("Malformed request: {}", e)))
}

fn user_message(error: &AppError) -> String {
    match error {
        AppError::InvalidInput(m) | AppError::Unauthorized(m) | AppError::NotFound(m) => m.clone(),
        other => other.to_string(),
    }
}

async fn site_access_key(state: &AppState) -> Result<String> {
    SiteStateRepository::new(state.store.as_ref()).access_key().await
}

async fn require_transfer_token(state: &AppState, token: Option<&str>) -> Result<()> {
    let valid = match token {
        Some(token) => SiteStateRepository::new(state.store.as_ref())
            .validate_transfer_token(token)
            .await?,
        None => false,
    };
    if !valid {
        return Err(AppError::Unauthorized("Transfer token is missing or invalid".to_string()));
    }
    Ok(())
}

fn admin_key_matches(state: &AppState, presented: Option<&str>) -> bool {
    match (state.settings.admin_key.as_deref(), presented) {
        (Some(expected), Some(presented)) if !expected.is_empty() => {
            crypto::constant_time_eq(expected, presented)
        }
        _ => false,
    }
}

fn require_admin(state: &AppState, admin_key: Option<&str>) -> Result<()> {
    if admin_key_matches(state, admin_key) {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Admin key is missing or invalid".to_string()))
    }
}

/// 前端持有的是令牌原文，也接受摘要
async fn require_token_or_admin(state: &AppState, token: Option<&str>, admin_key: Option<&str>) -> Result<()> {
    if admin_key_matches(state, admin_key) {
        return Ok(());
    }
    if let Some(token) = token {
        let repo = SiteStateRepository::new(state.store.as_ref());
        let hashed = crypto::token_hash(token, &repo.access_key().await?);
        if repo.validate_transfer_token(token).await? || repo.validate_transfer_token(&hashed).await? {
            return Ok(());
        }
    }
    Err(AppError::Unauthorized("Transfer token or admin key is missing or invalid".to_string()))
}
