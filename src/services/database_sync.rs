//! 数据库同步阶段: 逐表分块复制到目标端的临时表

use crate::db::{DatabaseBackend, ExecuteOutcome};
use crate::generators::create_table::CreateTableGenerator;
use crate::generators::insert_sql::InsertGenerator;
use crate::models::{DbSyncRequest, FetchRowsRequest, Job};
use crate::services::{throttle, MigrationContext};
use crate::utils::error::Result;
use crate::utils::system::{format_data_size, format_thousands, memory_peak_bytes};
use std::time::Instant;

/// 第一轮之前假定的单块耗时 (秒)
const INITIAL_LAST_RUN: f64 = 2.0;

const SYNC_FAILED: &str = "Database migration failed with error, which means we can not continue the migration.";

/// 服务端: 依次执行语句，遇到第一条失败即停止
pub async fn execute_statements(database: &dyn DatabaseBackend, statements: &[String]) -> Result<ExecuteOutcome> {
    database.execute(statements, true).await
}

/// 客户端: 在时间预算内尽可能多地同步数据块
pub async fn run(ctx: &mut MigrationContext<'_>) {
    ctx.logger.info(&format!(
        "Starting database migration loop with remaining time: {:.2}",
        ctx.timer.remaining()
    ));

    if !ctx.job.db_first_run_setup {
        create_temp_tables(ctx).await;
        if ctx.job.has_errors() {
            return;
        }
        ctx.job.db_first_run_setup = true;
    }

    let max_time_per_sync = ctx.timer.max_time_per_sync();
    let mut last_run = INITIAL_LAST_RUN;

    while ctx.timer.should_continue(last_run) {
        let next = ctx.job.tables.iter().position(|t| !t.is_completed);
        for table in ctx.job.tables.iter_mut().take(next.unwrap_or(usize::MAX)) {
            table.rows = table.completed_rows;
        }

        let Some(index) = next else {
            update_progress(&mut ctx.job);
            ctx.job.database_completed = true;
            break;
        };

        let started = Instant::now();
        sync_chunk(ctx, index).await;
        last_run = started.elapsed().as_secs_f64();

        throttle::adjust_after_chunk(&mut ctx.job, last_run, max_time_per_sync, memory_peak_bytes());
        ctx.logger.debug(&format!(
            "Last run in: {:.3} seconds - response size throttle: {} and remaining time: {:.2}",
            last_run,
            ctx.job.db_throttle_table_response_size,
            ctx.timer.remaining()
        ));
        update_progress(&mut ctx.job);

        if ctx.job.has_errors() {
            break;
        }
        if let Err(e) = ctx.save_job().await {
            ctx.logger.error(&format!("Could not save job during database migration: {}", e));
        }
    }

    ctx.logger.info(&format!(
        "Ending database migration loop with remaining time: {:.2} seconds",
        ctx.timer.remaining()
    ));
}

/// 在目标端创建全部临时表
async fn create_temp_tables(ctx: &mut MigrationContext<'_>) {
    let statements = CreateTableGenerator::generate(&mut ctx.job.tables, &ctx.job.target.sql_version);
    ctx.logger.info(&format!("Creating {} temporary tables on target", statements.len() - 1));

    let target = ctx.target();
    if let Err(errors) = target
        .execute_sql(&mut ctx.job, DbSyncRequest::Push { sql_inserts: statements })
        .await
    {
        for error in &errors {
            ctx.logger.critical(error);
        }
        ctx.job.errors.extend(errors);
    }
}

/// 同步一个数据块: 从源端读取，生成 INSERT，在目标端执行
async fn sync_chunk(ctx: &mut MigrationContext<'_>, index: usize) {
    let table = ctx.job.tables[index].clone();
    let response_size = throttle::response_size_for_table(&mut ctx.job, &table.name);
    let rows_per_request = table.initial_rows_per_request(ctx.job.db_response_size_wanted_default);
    let request = FetchRowsRequest::for_table(&table, response_size, rows_per_request, ctx.timer.remaining() / 2.0);

    let source = ctx.source();
    let (response, body_len) = match source.fetch_rows(&mut ctx.job, &request).await {
        Ok(result) => result,
        Err(errors) => {
            ctx.job.errors.extend(errors);
            ctx.job.errors.push(SYNC_FAILED.to_string());
            return;
        }
    };
    ctx.job.db_last_response_length = body_len;

    let fetched = response.rows.len() as u64;
    ctx.logger.debug(&format!("Got {} rows from {}", fetched, table.name));

    if fetched > 0 {
        let temp_name = table.temp_name.clone().unwrap_or_else(|| table.name.clone());
        let output = InsertGenerator::new(
            &table,
            &temp_name,
            &request.column_names,
            ctx.job.max_sql_packet_bytes,
            ctx.job.max_memory_bytes,
        )
        .with_search_replaces(&ctx.job.search_replaces)
        .generate(response.rows);

        for failure in &output.serialized_failures {
            ctx.logger.error(&format!("{} Value starts with: {}", failure.message(), failure.excerpt));
        }
        for warning in output.warnings {
            ctx.logger.warning(&warning);
            ctx.job.warnings.push(warning);
        }

        if !output.statements.is_empty() {
            let target = ctx.target();
            let request = DbSyncRequest::Push {
                sql_inserts: output.statements,
            };
            if let Err(errors) = target.execute_sql(&mut ctx.job, request).await {
                for error in &errors {
                    ctx.logger.critical(error);
                }
                ctx.job.errors.extend(errors);
                ctx.job.errors.push(SYNC_FAILED.to_string());
                return;
            }
        }
        ctx.logger.debug(&format!("Inserted {} rows into target database", fetched));
    }

    let state = &mut ctx.job.tables[index];
    state.completed_rows += fetched;
    state.rows = state.rows.max(state.completed_rows);
    if response.last_primary_key.is_some() {
        state.last_primary_key = response.last_primary_key;
    }
    if !response.has_more_rows_in_table {
        ctx.logger.info(&format!("Marking table: {} as completed", state.name));
        state.is_completed = true;
    }
}

/// 按行数计算进度，并生成进度描述
pub fn update_progress(job: &mut Job) {
    let (total_rows, completed_rows, total_size) = job.tables.iter().fold((0u64, 0u64, 0u64), |acc, t| {
        (acc.0 + t.rows, acc.1 + t.completed_rows, acc.2 + t.data_total_bytes)
    });

    let percent = if total_rows > 0 {
        (completed_rows * 100 / total_rows).min(100)
    } else {
        100
    };
    job.database_progress = percent as u32;

    job.database_progress_description = if percent < 100 {
        format!(
            "Data: {} / {} - Rows: {} / {}",
            format_data_size(total_size as f64 * percent as f64 / 100.0),
            format_data_size(total_size as f64),
            format_thousands(completed_rows),
            format_thousands(total_rows)
        )
    } else {
        String::new()
    };
}
