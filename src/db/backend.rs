//! 被迁移的 WordPress 数据库

use crate::generators::select_sql::{quote_identifier, ChunkQuery, ChunkQueryGenerator};
use crate::models::{ColumnKind, Row, RowValue, Table, TableColumn, TableSummary};
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection as _, MySql, MySqlPool, Row as _};
use std::collections::BTreeMap;

/// 数据库服务器信息
#[derive(Debug, Clone, Default)]
pub struct ServerDetails {
    pub version: String,
    pub max_allowed_packet: u64,
}

/// 分块读取的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRow {
    pub values: Row,
    pub primary_key: Option<i64>,
    /// 截至本行的累计字符长度
    pub running_total: u64,
}

/// 执行失败的语句
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFailure {
    pub error: String,
    pub statement: String,
}

/// 批量执行的结果
#[derive(Debug, Clone, Default)]
pub struct ExecuteOutcome {
    pub executed: usize,
    pub failures: Vec<SqlFailure>,
}

impl ExecuteOutcome {
    /// 给用户看的错误信息
    pub fn user_errors(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| crate::db::describe_sql_error(&f.error, &f.statement))
            .collect()
    }
}

#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    async fn server_details(&self) -> Result<ServerDetails>;

    /// 全部表和视图，含列、主键、建表语句与精确行数
    async fn tables(&self) -> Result<Vec<Table>>;

    /// 名称以 prefix 开头的表及其精确行数
    async fn table_summaries(&self, prefix: &str) -> Result<Vec<TableSummary>>;

    async fn fetch_chunk(&self, query: &ChunkQuery) -> Result<Vec<FetchedRow>>;

    /// 在同一连接上关闭外键检查后依次执行
    async fn execute(&self, statements: &[String], stop_on_error: bool) -> Result<ExecuteOutcome>;
}

const FOREIGN_KEY_CHECKS_OFF: &str = "SET FOREIGN_KEY_CHECKS = 0";
const FOREIGN_KEY_CHECKS_ON: &str = "SET FOREIGN_KEY_CHECKS = 1";

/// 整数类型才能作为游标主键
fn is_integer_type(data_type: &str) -> bool {
    matches!(
        data_type.to_lowercase().as_str(),
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
    )
}

/// bigint unsigned 的取值可能超出 i64 游标
fn may_exceed_signed_cursor(data_type: &str, column_type: &str) -> bool {
    data_type.eq_ignore_ascii_case("bigint") && column_type.to_lowercase().contains("unsigned")
}

/// 一个数据库会话，会话级设置在语句之间保持
#[async_trait]
pub trait SqlSession: Send {
    async fn run(&mut self, sql: &str) -> std::result::Result<(), String>;
}

#[async_trait]
impl SqlSession for PoolConnection<MySql> {
    async fn run(&mut self, sql: &str) -> std::result::Result<(), String> {
        let conn: &mut sqlx::MySqlConnection = &mut **self;
        sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// 关闭外键检查执行一批语句，结束后恢复
pub async fn execute_batch(
    session: &mut dyn SqlSession,
    statements: &[String],
    stop_on_error: bool,
) -> Result<ExecuteOutcome> {
    session.run(FOREIGN_KEY_CHECKS_OFF).await.map_err(AppError::Connection)?;

    let mut outcome = ExecuteOutcome::default();
    for statement in statements {
        match session.run(statement).await {
            Ok(()) => outcome.executed += 1,
            Err(error) => {
                let excerpt: String = statement.chars().take(200).collect();
                tracing::error!("SQL query failed execution: {} - {}", error, excerpt);
                outcome.failures.push(SqlFailure {
                    error,
                    statement: statement.clone(),
                });
                if stop_on_error {
                    break;
                }
            }
        }
    }

    session.run(FOREIGN_KEY_CHECKS_ON).await.map_err(|e| {
        AppError::Connection(format!("Could not restore foreign key checks: {}", e))
    })?;
    Ok(outcome)
}

pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT CAST(COUNT(*) AS SIGNED) FROM {}",
            quote_identifier(table)
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to count rows in {}: {}", table, e);
            e
        })?;
        Ok(count.max(0) as u64)
    }

    /// 主键最大值是否在 i64 范围内
    async fn fits_signed_cursor(&self, table: &str, column: &str) -> Result<bool> {
        let fits: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT CAST(COALESCE(MAX({}), 0) <= {} AS SIGNED) FROM {}",
            quote_identifier(column),
            i64::MAX,
            quote_identifier(table)
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(fits.unwrap_or(1) == 1)
    }

    async fn create_statement(&self, table: &str) -> Result<String> {
        let row = sqlx::query(&format!("SHOW CREATE TABLE {}", quote_identifier(table)))
            .persistent(false)
            .fetch_one(&self.pool)
            .await?;
        let raw: Vec<u8> = row.try_get_unchecked(1)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// 每张表的列，附带是否主键与 COLUMN_TYPE
    async fn columns(&self) -> Result<BTreeMap<String, Vec<(TableColumn, bool, String)>>> {
        let rows = sqlx::query(
            r#"
            SELECT
                CAST(TABLE_NAME AS CHAR) AS TABLE_NAME,
                CAST(COLUMN_NAME AS CHAR) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR) AS DATA_TYPE,
                CAST(COLUMN_TYPE AS CHAR) AS COLUMN_TYPE,
                CAST(EXTRA AS CHAR) AS EXTRA,
                CAST(COLUMN_KEY AS CHAR) AS COLUMN_KEY
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE()
            ORDER BY TABLE_NAME, ORDINAL_POSITION
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query columns: {}", e);
            e
        })?;

        let mut by_table: BTreeMap<String, Vec<(TableColumn, bool, String)>> = BTreeMap::new();
        for row in rows {
            let table: String = row.try_get("TABLE_NAME")?;
            let data_type: String = row.try_get("DATA_TYPE")?;
            let column_type: String = row.try_get("COLUMN_TYPE")?;
            let extra: String = row.try_get::<Option<String>, _>("EXTRA")?.unwrap_or_default();
            let key: String = row.try_get::<Option<String>, _>("COLUMN_KEY")?.unwrap_or_default();
            let column = TableColumn {
                name: row.try_get("COLUMN_NAME")?,
                kind: ColumnKind::classify(&data_type, &extra),
                data_type,
            };
            by_table.entry(table).or_default().push((column, key == "PRI", column_type));
        }
        Ok(by_table)
    }
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
    async fn server_details(&self) -> Result<ServerDetails> {
        let version: String = sqlx::query_scalar("SELECT CAST(VERSION() AS CHAR)")
            .fetch_one(&self.pool)
            .await?;
        let max_allowed_packet: i64 =
            sqlx::query_scalar("SELECT CAST(@@max_allowed_packet AS SIGNED)")
                .fetch_one(&self.pool)
                .await?;

        Ok(ServerDetails {
            version,
            max_allowed_packet: max_allowed_packet.max(0) as u64,
        })
    }

    async fn tables(&self) -> Result<Vec<Table>> {
        tracing::debug!("Fetching table details");
        let rows = sqlx::query(
            r#"
            SELECT
                CAST(TABLE_NAME AS CHAR) AS TABLE_NAME,
                CAST(TABLE_TYPE AS CHAR) AS TABLE_TYPE,
                CAST(COALESCE(AVG_ROW_LENGTH, 0) AS SIGNED) AS AVG_ROW_LENGTH,
                CAST(COALESCE(DATA_LENGTH, 0) AS SIGNED) AS DATA_LENGTH
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
            ORDER BY TABLE_NAME
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut columns = self.columns().await?;
        let mut tables = Vec::with_capacity(rows.len());

        for row in rows {
            let name: String = row.try_get("TABLE_NAME")?;
            let table_type: String = row.try_get("TABLE_TYPE")?;
            let is_view = table_type.eq_ignore_ascii_case("VIEW");
            let table_columns = columns.remove(&name).unwrap_or_default();

            let pk_columns: Vec<(&TableColumn, &str)> = table_columns
                .iter()
                .filter(|(_, is_pk, _)| *is_pk)
                .map(|(c, _, column_type)| (c, column_type.as_str()))
                .collect();
            let primary_key_column = match pk_columns.as_slice() {
                [(single, column_type)] if is_integer_type(&single.data_type) => {
                    if may_exceed_signed_cursor(&single.data_type, column_type)
                        && !self.fits_signed_cursor(&name, &single.name).await?
                    {
                        tracing::info!("Table {} has keys above the signed range, using offset paging", name);
                        None
                    } else {
                        Some(single.name.clone())
                    }
                }
                _ => None,
            };

            let rows_count = if is_view { 0 } else { self.count_rows(&name).await? };
            let create_table = self.create_statement(&name).await?;

            tables.push(Table {
                rows: rows_count,
                row_avg_bytes: row.try_get::<i64, _>("AVG_ROW_LENGTH")?.max(0) as u64,
                data_total_bytes: row.try_get::<i64, _>("DATA_LENGTH")?.max(0) as u64,
                primary_key_column,
                columns: table_columns.into_iter().map(|(c, _, _)| c).collect(),
                create_table,
                is_view,
                name,
                ..Default::default()
            });
        }

        tracing::info!("Found {} tables and views", tables.len());
        Ok(tables)
    }

    async fn table_summaries(&self, prefix: &str) -> Result<Vec<TableSummary>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR)
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::new();
        for name in names.into_iter().filter(|n| n.starts_with(prefix)) {
            let rows = self.count_rows(&name).await?;
            summaries.push(TableSummary { name, rows });
        }
        Ok(summaries)
    }

    async fn fetch_chunk(&self, query: &ChunkQuery) -> Result<Vec<FetchedRow>> {
        let sql = ChunkQueryGenerator::generate(query)?;
        let rows = sqlx::query(&sql)
            .persistent(false)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch rows from {}: {}", query.table, e);
                e
            })?;

        let column_count = query.column_names.len();
        let mut fetched = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: Option<Vec<u8>> = row.try_get_unchecked(i)?;
                values.push(RowValue(value));
            }

            let (primary_key, total_index) = if query.primary_key_column.is_some() {
                let pk: Option<i64> = row.try_get_unchecked(column_count)?;
                (pk, column_count + 1)
            } else {
                (None, column_count)
            };
            let running_total: Option<i64> = row.try_get_unchecked(total_index)?;

            fetched.push(FetchedRow {
                values,
                primary_key,
                running_total: running_total.unwrap_or(0).max(0) as u64,
            });
        }

        Ok(fetched)
    }

    async fn execute(&self, statements: &[String], stop_on_error: bool) -> Result<ExecuteOutcome> {
        let mut conn = self.pool.acquire().await?;
        let result = execute_batch(&mut conn, statements, stop_on_error).await;
        if result.is_err() {
            // 会话状态未知，不放回连接池
            if let Err(e) = conn.detach().close().await {
                tracing::warn!("Could not close database connection: {}", e);
            }
        }
        result
    }
}
