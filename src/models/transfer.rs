//! 站点间服务的请求与响应结构

use crate::models::{FileDetails, SiteDetails, Table, TableSummary};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 单个列值，原始字节或 NULL；JSON 中为 base64 字符串
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowValue(pub Option<Vec<u8>>);

impl RowValue {
    pub fn null() -> Self {
        RowValue(None)
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        RowValue(Some(value.into()))
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for RowValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Some(bytes) => serializer.serialize_str(&general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for RowValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(s) => general_purpose::STANDARD
                .decode(s.as_bytes())
                .map(|bytes| RowValue(Some(bytes)))
                .map_err(serde::de::Error::custom),
            None => Ok(RowValue(None)),
        }
    }
}

/// 一行数据，顺序与请求中的 column_names 一致
pub type Row = Vec<RowValue>;

pub fn row_size(row: &[RowValue]) -> u64 {
    row.iter().map(|v| v.len() as u64).sum()
}

/// 按大小和时间限制读取一批行
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FetchRowsRequest {
    pub table: String,
    pub column_names: Vec<String>,
    pub bit_columns: Vec<String>,
    pub primary_key_column: Option<String>,
    pub last_primary_key: Option<i64>,
    pub completed_rows: u64,
    pub max_response_size: u64,
    pub default_rows_per_request: u64,
    /// 秒
    pub time_limit: f64,
}

impl FetchRowsRequest {
    /// 基于表的游标构造请求
    pub fn for_table(table: &Table, max_response_size: u64, rows_per_request: u64, time_limit: f64) -> Self {
        Self {
            table: table.name.clone(),
            column_names: table.column_names(),
            bit_columns: table.bit_columns(),
            primary_key_column: table.primary_key_column.clone(),
            last_primary_key: table.last_primary_key,
            completed_rows: table.completed_rows,
            max_response_size,
            default_rows_per_request: rows_per_request,
            time_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FetchRowsResponse {
    pub rows: Vec<Row>,
    pub has_more_rows_in_table: bool,
    pub last_primary_key: Option<i64>,
    pub completed_rows: u64,
    pub response_size: u64,
}

/// wpsynchro_db_sync 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DbSyncRequest {
    /// 读取行 (源端)
    Pull(FetchRowsRequest),
    /// 执行 SQL (目标端)，遇错即停
    Push { sql_inserts: Vec<String> },
    /// finalize 的 SQL 组
    Finalize { sql_inserts: Vec<String> },
}

/// 执行 SQL 的结果
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecuteResponse {
    pub executed: usize,
}

/// wpsynchro_initiate 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateRequest {
    #[serde(rename = "type")]
    pub migration_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InitiateResponse {
    pub token: String,
}

/// wpsynchro_masterdata 请求
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MasterdataRequest {
    /// dbdetails / filedetails
    pub slugs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MasterdataResponse {
    pub base: Option<SiteDetails>,
    pub dbdetails: Option<Vec<Table>>,
    pub tmptables_dbdetails: Option<Vec<TableSummary>>,
    pub files: Option<FileDetails>,
}

/// wpsynchro_backupdatabase 请求，table 携带游标
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackupRequest {
    pub table: Table,
    /// 备份目录下的文件名
    pub filename: String,
    /// 秒
    pub time_limit: f64,
    pub max_memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackupResponse {
    pub rows_written: u64,
    pub has_more_rows_in_table: bool,
    pub last_primary_key: Option<i64>,
    pub completed_rows: u64,
    /// 备份文件在该站点上的路径
    pub location: String,
}

/// wpsynchro_execute_action 请求，如 clearcaches、cleartransfertoken
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecuteActionRequest {
    pub actions: Vec<String>,
}

/// 管理接口: 运行一次迁移
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunRequest {
    pub migration_id: String,
    pub job_id: String,
    pub migration_restart: bool,
}

/// 管理接口: 查询状态
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StatusRequest {
    pub migration_id: String,
    pub job_id: String,
}
