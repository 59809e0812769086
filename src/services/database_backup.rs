//! 数据库备份阶段: 目标端把将被覆盖的表写成 SQL 文件

use crate::generators::create_table::handle_table_prefix_change;
use crate::generators::insert_sql::InsertGenerator;
use crate::models::{BackupRequest, BackupResponse, FetchRowsRequest, Job, Table};
use crate::services::{row_fetcher, AppState, MigrationContext};
use crate::utils::error::{AppError, Result};
use crate::utils::system::format_thousands;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use tokio::io::AsyncWriteExt;

const ONE_MB: u64 = 1024 * 1024;
/// 无平均行长时每次读取的行数
const DEFAULT_ROWS_PER_RUN: u64 = 9900;
/// 备份文件中单条 INSERT 的上限
const BACKUP_MAX_PACKET: u64 = 200 * 1024 * 1024;
/// 新建备份文件前保留的旧文件数
const OLD_BACKUPS_TO_KEEP: usize = 19;

const INITIAL_LAST_RUN: f64 = 2.0;

const BACKUP_FAILED: &str = "Database backup failed, which means we can not continue the migration.";

pub fn backup_filename(job_id: &str) -> String {
    format!("database_backup_{}.sql", job_id)
}

fn validate_filename(filename: &str) -> Result<()> {
    let valid = !filename.is_empty()
        && filename.ends_with(".sql")
        && !filename.contains(['/', '\\'])
        && !filename.contains("..");
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("Invalid backup filename: {}", filename)))
    }
}

/// 服务端: 读取一批行并追加到备份文件
pub async fn write_chunk(state: &AppState, request: &BackupRequest) -> Result<BackupResponse> {
    validate_filename(&request.filename)?;
    let dir = &state.settings.backup_dir;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&request.filename);

    if !tokio::fs::try_exists(&path).await? {
        delete_old_backups(dir, OLD_BACKUPS_TO_KEEP).await?;
    }

    let table = &request.table;
    let rows_per_run = if table.row_avg_bytes > 0 {
        ONE_MB.div_ceil(table.row_avg_bytes)
    } else {
        DEFAULT_ROWS_PER_RUN
    };
    let fetch = FetchRowsRequest::for_table(table, ONE_MB, rows_per_run, request.time_limit);
    let response = row_fetcher::fetch_rows(state.database.as_ref(), &fetch).await?;

    let mut content = String::new();
    if table.completed_rows == 0 {
        content.push('\n');
        content.push_str(&table.create_table);
        content.push_str(";\n");
    }

    let rows_written = response.rows.len() as u64;
    if rows_written > 0 {
        let output = InsertGenerator::new(
            table,
            &table.name,
            &fetch.column_names,
            BACKUP_MAX_PACKET,
            request.max_memory_bytes,
        )
        .generate(response.rows);
        for warning in &output.warnings {
            tracing::warn!("{}", warning);
        }

        content.push_str("SET FOREIGN_KEY_CHECKS=0;\n");
        for statement in output.statements {
            content.push_str(&statement);
            content.push_str(";\n");
        }
    }

    append(&path, content.as_bytes()).await.map_err(|e| {
        tracing::error!("Appending database backup to {} failed: {}", path.display(), e);
        e
    })?;
    tracing::debug!("Wrote {} rows of {} to {}", rows_written, table.name, path.display());

    Ok(BackupResponse {
        rows_written,
        has_more_rows_in_table: response.has_more_rows_in_table,
        last_primary_key: response.last_primary_key,
        completed_rows: response.completed_rows,
        location: path.display().to_string(),
    })
}

async fn append(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

/// 只保留最新的 keep 个 .sql 文件
async fn delete_old_backups(dir: &Path, keep: usize) -> Result<()> {
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_sql = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("sql"));
        let metadata = entry.metadata().await?;
        if is_sql && metadata.is_file() {
            files.push((metadata.modified()?, path));
        }
    }

    if files.len() <= keep {
        return Ok(());
    }
    files.sort();
    let excess = files.len() - keep;
    for (_, path) in files.into_iter().take(excess) {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Could not delete old backup {}: {}", path.display(), e);
        } else {
            tracing::info!("Deleted old database backup {}", path.display());
        }
    }
    Ok(())
}

/// 客户端: 在时间预算内逐表备份
pub async fn run(ctx: &mut MigrationContext<'_>) {
    if !ctx.job.backup_initialized {
        initialize(ctx);
    }

    let mut last_run = INITIAL_LAST_RUN;
    while ctx.timer.should_continue(last_run) {
        let Some(index) = ctx.job.backup_tables.iter().position(|t| !t.is_completed) else {
            ctx.logger.info("Database backup completed");
            ctx.job.database_backup_completed = true;
            break;
        };

        let started = Instant::now();
        backup_chunk(ctx, index).await;
        last_run = started.elapsed().as_secs_f64();
        update_progress(&mut ctx.job);

        if ctx.job.has_errors() {
            break;
        }
    }
}

/// 目标端上会被迁移覆盖的表
fn initialize(ctx: &mut MigrationContext<'_>) {
    let job = &mut ctx.job;
    let mut backup_tables = Vec::new();
    for table in job.tables.iter().filter(|t| !t.is_view) {
        let target_name = if ctx.migration.db_table_prefix_change {
            handle_table_prefix_change(&table.name, &job.source.wpdb_prefix, &job.target.wpdb_prefix)
        } else {
            table.name.clone()
        };
        if let Some(existing) = job
            .target_tables
            .iter()
            .find(|t| t.name == target_name && !t.is_view)
        {
            backup_tables.push(Table {
                completed_rows: 0,
                last_primary_key: None,
                is_completed: false,
                ..existing.clone()
            });
        }
    }

    job.backup_filename = backup_filename(&job.id);
    ctx.logger.info(&format!(
        "Backing up {} tables on target into {}",
        backup_tables.len(),
        job.backup_filename
    ));
    job.backup_tables = backup_tables;
    job.backup_initialized = true;
    update_progress(job);
}

async fn backup_chunk(ctx: &mut MigrationContext<'_>, index: usize) {
    let table = ctx.job.backup_tables[index].clone();
    let request = BackupRequest {
        time_limit: ctx.timer.remaining() / 2.0,
        max_memory_bytes: ctx.job.max_memory_bytes,
        filename: ctx.job.backup_filename.clone(),
        table,
    };

    let target = ctx.target();
    let response = match target.backup(&mut ctx.job, &request).await {
        Ok(response) => response,
        Err(errors) => {
            for error in &errors {
                ctx.logger.critical(error);
            }
            ctx.job.errors.extend(errors);
            ctx.job.errors.push(BACKUP_FAILED.to_string());
            return;
        }
    };

    if request.table.completed_rows == 0 {
        ctx.logger.info(&format!(
            "Database backup of {} is written to {} on {}",
            request.table.name,
            response.location,
            target.endpoint().base_url
        ));
    }

    let state = &mut ctx.job.backup_tables[index];
    state.completed_rows = response.completed_rows;
    state.rows = state.rows.max(state.completed_rows);
    if response.last_primary_key.is_some() {
        state.last_primary_key = response.last_primary_key;
    }
    if !response.has_more_rows_in_table {
        ctx.logger.debug(&format!("Backup of table {} completed", state.name));
        state.is_completed = true;
    }
}

pub fn update_progress(job: &mut Job) {
    let total_tables = job.backup_tables.len();
    let done_tables = job.backup_tables.iter().filter(|t| t.is_completed).count();
    let (total_rows, completed_rows) = job
        .backup_tables
        .iter()
        .fold((0u64, 0u64), |acc, t| (acc.0 + t.rows, acc.1 + t.completed_rows.min(t.rows)));

    let percent = if done_tables == total_tables {
        100
    } else if total_rows > 0 {
        (completed_rows * 100 / total_rows).min(99)
    } else {
        (done_tables * 100 / total_tables) as u64
    };
    job.database_backup_progress = percent as u32;
    job.database_backup_progress_description = if percent < 100 {
        format!(
            "Tables: {} / {} - Rows: {} / {}",
            done_tables,
            total_tables,
            format_thousands(completed_rows),
            format_thousands(total_rows)
        )
    } else {
        String::new()
    };
}
