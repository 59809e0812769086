//! 对一端站点的服务调用
//!
//! 本站直接调用服务函数，远端走 RemoteTransport；返回的错误已带站点前缀。

use crate::models::{
    BackupRequest, BackupResponse, DbSyncRequest, ExecuteActionRequest, ExecuteResponse,
    FetchRowsRequest, FetchRowsResponse, InitiateRequest, InitiateResponse, Job, MasterdataRequest,
    MasterdataResponse,
};
use crate::services::{
    database_backup, database_sync, execute_action, initiate, masterdata, row_fetcher, AppState,
};
use crate::transport::{actions, CallOptions, Endpoint, Envelope, RemoteResult};
use crate::utils::error::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 失败时的错误信息
pub type PeerResult<T> = std::result::Result<T, Vec<String>>;

pub struct Peer<'a> {
    state: &'a AppState,
    endpoint: Endpoint,
}

impl<'a> Peer<'a> {
    pub fn new(state: &'a AppState, endpoint: Endpoint) -> Self {
        Self { state, endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn prefixed(&self, message: impl AsRef<str>) -> String {
        format!("{}: {}", self.endpoint.label(), message.as_ref())
    }

    fn local_error(&self, error: AppError) -> Vec<String> {
        vec![self.prefixed(error.to_string())]
    }

    async fn call<Req, Resp>(
        &self,
        job: &mut Job,
        action: &str,
        request: &Req,
        options: CallOptions,
    ) -> PeerResult<(Resp, RemoteResult)>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let envelope = Envelope::from_payload(request).map_err(|e| self.local_error(e))?;
        let result = self
            .state
            .transport
            .call(&self.endpoint, action, &envelope, options)
            .await;

        job.warnings
            .extend(result.warnings.iter().map(|w| self.prefixed(w)));
        if !result.success {
            return Err(result.errors.iter().map(|e| self.prefixed(e)).collect());
        }

        let response: Resp = result.payload_as().map_err(|e| {
            vec![self.prefixed(format!("Unexpected response to {}: {}", action, e))]
        })?;
        Ok((response, result))
    }

    /// 向该站点申请传输令牌，返回令牌原文
    pub async fn initiate(&self, job: &mut Job, migration_type: &str) -> PeerResult<String> {
        if self.endpoint.is_local() {
            return initiate::issue_token(self.state, migration_type)
                .await
                .map_err(|e| self.local_error(e));
        }

        let request = InitiateRequest {
            migration_type: migration_type.to_string(),
        };
        let (response, _): (InitiateResponse, _) = self
            .call(job, actions::INITIATE, &request, CallOptions::no_retry())
            .await?;
        Ok(response.token)
    }

    pub async fn masterdata(&self, job: &mut Job, slugs: &[&str]) -> PeerResult<MasterdataResponse> {
        let request = MasterdataRequest {
            slugs: slugs.iter().map(|s| s.to_string()).collect(),
        };
        if self.endpoint.is_local() {
            return masterdata::serve(self.state, &request)
                .await
                .map_err(|e| self.local_error(e));
        }

        let (response, _) = self
            .call(job, actions::MASTERDATA, &request, CallOptions::default())
            .await?;
        Ok(response)
    }

    /// 读取一批行，同时返回响应长度
    pub async fn fetch_rows(
        &self,
        job: &mut Job,
        request: &FetchRowsRequest,
    ) -> PeerResult<(FetchRowsResponse, u64)> {
        if self.endpoint.is_local() {
            let response = row_fetcher::fetch_rows(self.state.database.as_ref(), request)
                .await
                .map_err(|e| self.local_error(e))?;
            let length = response.response_size;
            return Ok((response, length));
        }

        let request = DbSyncRequest::Pull(request.clone());
        let (response, result): (FetchRowsResponse, _) = self
            .call(job, actions::DB_SYNC, &request, CallOptions::default())
            .await?;
        Ok((response, result.body.len() as u64))
    }

    /// 执行 SQL，遇到第一条失败即停止
    pub async fn execute_sql(&self, job: &mut Job, request: DbSyncRequest) -> PeerResult<usize> {
        if self.endpoint.is_local() {
            let statements = match &request {
                DbSyncRequest::Push { sql_inserts } | DbSyncRequest::Finalize { sql_inserts } => {
                    sql_inserts.as_slice()
                }
                DbSyncRequest::Pull(_) => {
                    return Err(vec![self.prefixed("Pull requests can not be executed as SQL")]);
                }
            };
            let outcome = database_sync::execute_statements(self.state.database.as_ref(), statements)
                .await
                .map_err(|e| self.local_error(e))?;
            if !outcome.failures.is_empty() {
                return Err(outcome.user_errors().iter().map(|e| self.prefixed(e)).collect());
            }
            return Ok(outcome.executed);
        }

        let (response, _): (ExecuteResponse, _) = self
            .call(job, actions::DB_SYNC, &request, CallOptions::default())
            .await?;
        Ok(response.executed)
    }

    pub async fn backup(&self, job: &mut Job, request: &BackupRequest) -> PeerResult<BackupResponse> {
        if self.endpoint.is_local() {
            return database_backup::write_chunk(self.state, request)
                .await
                .map_err(|e| self.local_error(e));
        }

        let (response, _) = self
            .call(job, actions::BACKUP_DATABASE, request, CallOptions::default())
            .await?;
        Ok(response)
    }

    pub async fn execute_action(&self, job: &mut Job, request: &ExecuteActionRequest) -> PeerResult<()> {
        if self.endpoint.is_local() {
            return execute_action::execute(self.state, request)
                .await
                .map_err(|e| self.local_error(e));
        }

        let _: (serde_json::Value, _) = self
            .call(job, actions::EXECUTE_ACTION, request, CallOptions::no_retry())
            .await?;
        Ok(())
    }
}
