//! 数据库 finalize: 把临时表换成正式表
//!
//! 每次调用只推进一个单元 (准备、一组 SQL、一张多余临时表或最终检查)，
//! 并要求控制器为下一单元留出完整的时间片。

use crate::generators::create_table::handle_table_prefix_change;
use crate::generators::insert_sql::escape_bytes;
use crate::generators::select_sql::quote_identifier;
use crate::models::{DbSyncRequest, Job, Migration, TableSummary};
use crate::services::masterdata::{SLUG_DBDETAILS, SLUG_TMPTABLES};
use crate::services::MigrationContext;
use std::collections::HashMap;

/// 行数差异超过该百分比时给出警告
const ROW_COUNT_MARGIN_PERCENT: u64 = 5;

const RETRIEVE_FAILED: &str = "Could not retrieve data from remote site for finalizing";

/// SQL 字符串字面量内容
fn sql_string(value: &str) -> String {
    String::from_utf8_lossy(&escape_bytes(value.as_bytes())).into_owned()
}

/// LIKE 模式中的前缀
fn like_prefix(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        if matches!(c, '\\' | '_' | '%') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("{}%", sql_string(&escaped))
}

pub async fn run(ctx: &mut MigrationContext<'_>) {
    ctx.logger.info(&format!(
        "Starting database finalize with remaining time: {:.2}",
        ctx.timer.remaining()
    ));

    if !ctx.job.finalize_db_initialized {
        ctx.job.finalize_progress_description = "Preparing database finalize".to_string();
        // 取不到目标端临时表时保持未初始化，恢复后重新准备
        if prepare(ctx).await {
            ctx.job.finalize_db_initialized = true;
        }
        ctx.job.request_full_timeframe = true;
        return;
    }

    if let Some(group) = ctx.job.finalize_db_sql_queries.pop() {
        ctx.job.finalize_progress_description = format!(
            "Finalizing table {} out of {}",
            ctx.job.finalize_db_sql_queries_count - ctx.job.finalize_db_sql_queries.len(),
            ctx.job.finalize_db_sql_queries_count
        );
        ctx.logger.debug(&format!("Executing {} finalize statements on target", group.len()));
        if !execute_on_target(ctx, group.clone()).await {
            // 恢复后重试同一组
            ctx.job.finalize_db_sql_queries.push(group);
        }
        ctx.job.request_full_timeframe = true;
        return;
    }

    if !ctx.job.has_errors() && !ctx.job.finalize_db_excess_tables_initialized {
        let Some(queries) = excess_table_queries(ctx).await else {
            return;
        };
        ctx.job.finalize_db_excess_table_queries_count = queries.len();
        ctx.job.finalize_db_excess_table_queries = queries;
        ctx.job.finalize_db_excess_tables_initialized = true;
        ctx.job.request_full_timeframe = true;
        return;
    }

    if !ctx.job.has_errors() {
        if let Some(statement) = ctx.job.finalize_db_excess_table_queries.pop() {
            ctx.job.finalize_progress_description = format!(
                "Removing old temporary table - {} out of {}",
                ctx.job.finalize_db_excess_table_queries_count - ctx.job.finalize_db_excess_table_queries.len(),
                ctx.job.finalize_db_excess_table_queries_count
            );
            if !execute_on_target(ctx, vec![statement.clone()]).await {
                ctx.job.finalize_db_excess_table_queries.push(statement);
            }
            ctx.job.request_full_timeframe = true;
            return;
        }
    }

    if !ctx.job.has_errors() {
        ctx.job.finalize_progress_description = "Check that all tables on target is in correct case".to_string();
        check_table_cases(ctx).await;
    }

    if !ctx.job.has_errors() {
        ctx.logger.info("Database finalize completed");
        ctx.job.finalize_db_completed = true;
    }
}

async fn execute_on_target(ctx: &mut MigrationContext<'_>, statements: Vec<String>) -> bool {
    let target = ctx.target();
    match target
        .execute_sql(&mut ctx.job, DbSyncRequest::Finalize { sql_inserts: statements })
        .await
    {
        Ok(_) => true,
        Err(errors) => {
            for error in &errors {
                ctx.logger.critical(error);
            }
            ctx.job.errors.extend(errors);
            false
        }
    }
}

async fn retrieve_target_tables(ctx: &mut MigrationContext<'_>, temp_tables: bool) -> Option<Vec<TableSummary>> {
    let slug = if temp_tables { SLUG_TMPTABLES } else { SLUG_DBDETAILS };
    let target = ctx.target();
    let response = match target.masterdata(&mut ctx.job, &[slug]).await {
        Ok(response) => response,
        Err(errors) => {
            ctx.job.errors.extend(errors);
            return None;
        }
    };

    let tables = if temp_tables {
        response.tmptables_dbdetails
    } else {
        response.dbdetails.map(|tables| {
            tables
                .into_iter()
                .map(|t| TableSummary { name: t.name, rows: t.rows })
                .collect()
        })
    };
    if tables.is_none() {
        ctx.logger.critical(RETRIEVE_FAILED);
        ctx.job.errors.push(RETRIEVE_FAILED.to_string());
    }
    tables
}

/// 生成全部 finalize SQL 组，按执行顺序的逆序存入 Job；组已生成时返回 true
async fn prepare(ctx: &mut MigrationContext<'_>) -> bool {
    ctx.logger.info("Prepare SQL queries for database finalize");

    let Some(temp_tables) = retrieve_target_tables(ctx, true).await else {
        return false;
    };
    let temp_rows: HashMap<String, u64> = temp_tables.into_iter().map(|t| (t.name, t.rows)).collect();

    for table in ctx.job.tables.clone().iter().filter(|t| !t.is_temp_table()) {
        let temp_name = table.temp_name.clone().unwrap_or_default();
        match temp_rows.get(&temp_name) {
            Some(to_rows) => check_row_count(&mut ctx.job, &table.name, table.rows, *to_rows),
            None => {
                ctx.logger.critical(&format!(
                    "Table {} does not exist on target, but it should. Temp name is {}",
                    table.name, temp_name
                ));
                ctx.job.errors.push(format!(
                    "Finalize: Error in database migration for table {} - It is not transferred",
                    table.name
                ));
            }
        }
    }

    let groups = build_sql_groups(&ctx.migration, &mut ctx.job);
    ctx.logger.debug(&format!("Prepared {} finalize SQL groups", groups.len()));
    ctx.job.finalize_db_sql_queries_count = groups.len();
    ctx.job.finalize_db_sql_queries = groups;
    true
}

/// 组装 SQL 组: 保留数据、普通表、users/usermeta/options、视图，最后整体反转供 pop 使用
pub fn build_sql_groups(migration: &Migration, job: &mut Job) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let keep = data_to_keep_statements(migration, job);
    if !keep.is_empty() {
        groups.push(keep);
    }

    let mut last: [Option<Vec<String>>; 3] = [None, None, None];
    job.finalize_db_table_to_expect_on_target.clear();

    for table in &job.tables {
        let Some(temp_name) = table.temp_name.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };

        let mut group = Vec::new();
        let mut table_name = table.name.clone();
        if migration.db_table_prefix_change {
            table_name = handle_table_prefix_change(&table_name, &job.source.wpdb_prefix, &job.target.wpdb_prefix);
            group.extend(prefix_change_statements(job, &table_name, temp_name));
        }

        job.finalize_db_table_to_expect_on_target.push(table_name.clone());
        group.push(format!("DROP TABLE IF EXISTS {}", quote_identifier(&table_name)));
        group.push(format!(
            "RENAME TABLE {} TO {}",
            quote_identifier(temp_name),
            quote_identifier(&table_name)
        ));

        if table_name == job.target.wp_users_table {
            last[0] = Some(group);
        } else if table_name == job.target.wp_usermeta_table {
            last[1] = Some(group);
        } else if table_name == job.target.wp_options_table {
            last[2] = Some(group);
        } else {
            groups.push(group);
        }
    }
    groups.extend(last.into_iter().flatten());

    for view in &job.views {
        groups.push(vec![
            format!("DROP VIEW IF EXISTS {}", quote_identifier(&view.name)),
            view.create_table.clone(),
        ]);
    }

    groups.reverse();
    groups
}

/// 把目标端现有的 wpsynchro_ 与需要保留的 options 复制进临时 options 表
fn data_to_keep_statements(migration: &Migration, job: &Job) -> Vec<String> {
    let Some(temp_options) = job
        .tables
        .iter()
        .find(|t| t.name == job.source.wp_options_table)
        .and_then(|t| t.temp_name.as_deref())
        .filter(|n| !n.is_empty())
    else {
        return Vec::new();
    };

    let temp = quote_identifier(temp_options);
    let current = quote_identifier(&job.target.wp_options_table);
    let copy = |condition: &str| {
        vec![
            format!("DELETE FROM {} WHERE option_name {}", temp, condition),
            format!(
                "INSERT INTO {} (option_name,option_value,autoload) SELECT option_name,option_value,autoload FROM {} WHERE option_name {}",
                temp, current, condition
            ),
        ]
    };

    let mut statements = copy(&format!("LIKE '{}'", like_prefix("wpsynchro_")));
    for key in migration.preserved_option_keys() {
        statements.extend(copy(&format!("= '{}'", sql_string(&key))));
    }
    statements
}

/// 前缀变化时改写 usermeta.meta_key 与 options.option_name 中的前缀
pub fn prefix_change_statements(job: &Job, table_name: &str, temp_name: &str) -> Vec<String> {
    let (source_prefix, target_prefix) = (&job.source.wpdb_prefix, &job.target.wpdb_prefix);
    if source_prefix == target_prefix {
        return Vec::new();
    }

    let column = if table_name == job.target.wp_usermeta_table || table_name == format!("{}usermeta", target_prefix) {
        "meta_key"
    } else if table_name == job.target.wp_options_table {
        "option_name"
    } else {
        return Vec::new();
    };

    let temp = quote_identifier(temp_name);
    vec![
        format!("DELETE FROM {} WHERE {} LIKE '{}'", temp, column, like_prefix(target_prefix)),
        format!(
            "UPDATE {} SET {} = REPLACE({}, '{}', '{}') WHERE {} LIKE '{}'",
            temp,
            column,
            column,
            sql_string(source_prefix),
            sql_string(target_prefix),
            column,
            like_prefix(source_prefix)
        ),
    ]
}

/// 比较源端与目标端临时表的行数
pub fn check_row_count(job: &mut Job, table: &str, from_rows: u64, to_rows: u64) {
    if from_rows == 0 && to_rows != 0 {
        job.errors.push(format!(
            "Finalize: Error in database migration for table {} - It should not contain any rows",
            table
        ));
        return;
    }
    if from_rows > 0 && to_rows == 0 {
        job.errors.push(format!(
            "Finalize: Error in database migration for table {} - No rows has been transferred, but should contain {} rows. Normally this is because the resource limits has been hit and the database content is too large. Contact support if this continues to fail.",
            table, from_rows
        ));
        return;
    }
    if to_rows * 100 < (100 - ROW_COUNT_MARGIN_PERCENT) * from_rows {
        job.warnings.push(format!(
            "Finalize: Warning in database migration for table {} - It differs more than {}% in size, which indicate something has gone wrong during transfer. We found {} rows, but expected around {} rows.",
            table, ROW_COUNT_MARGIN_PERCENT, to_rows, from_rows
        ));
    }
}

/// 目标端上剩余的临时表
async fn excess_table_queries(ctx: &mut MigrationContext<'_>) -> Option<Vec<String>> {
    let tables = retrieve_target_tables(ctx, true).await?;
    if tables.is_empty() {
        ctx.logger.debug("No excess temp tables to delete");
    }
    Some(
        tables
            .iter()
            .map(|t| format!("DROP TABLE IF EXISTS {}", quote_identifier(&t.name)))
            .collect(),
    )
}

async fn check_table_cases(ctx: &mut MigrationContext<'_>) {
    let Some(tables) = retrieve_target_tables(ctx, false).await else {
        return;
    };
    let warnings = table_case_warnings(&ctx.job.finalize_db_table_to_expect_on_target, &tables);
    for warning in warnings {
        ctx.logger.warning(&warning);
        ctx.job.warnings.push(warning);
    }
}

/// 先精确匹配，失败后才忽略大小写匹配
pub fn table_case_warnings(expected: &[String], on_target: &[TableSummary]) -> Vec<String> {
    let mut warnings = Vec::new();
    for name in expected {
        if on_target.iter().any(|t| t.name == *name) {
            continue;
        }
        match on_target.iter().find(|t| t.name.eq_ignore_ascii_case(name)) {
            Some(found) => warnings.push(format!(
                "Finalize: Table {} is not found with the correct case. We found a table called {}. This may or may not give you problems. This happens due to SQL server configuration.",
                name, found.name
            )),
            None => warnings.push(format!(
                "Finalize: Table {} is not found on target. It may be a problem with the rename from temp table name.",
                name
            )),
        }
    }
    warnings
}

/// 完成比例 0.0 ..= 1.0: 准备 10%，SQL 组 80%，清理 10%
pub fn percent_completed(job: &Job) -> f64 {
    fn part(weight: f64, started: bool, total: usize, remaining: usize) -> f64 {
        if !started {
            0.0
        } else if total == 0 {
            weight
        } else {
            weight * (total - remaining.min(total)) as f64 / total as f64
        }
    }

    let mut completion = if job.finalize_db_initialized { 10.0 } else { 0.0 };
    completion += part(
        80.0,
        job.finalize_db_initialized,
        job.finalize_db_sql_queries_count,
        job.finalize_db_sql_queries.len(),
    );
    completion += part(
        10.0,
        job.finalize_db_excess_tables_initialized,
        job.finalize_db_excess_table_queries_count,
        job.finalize_db_excess_table_queries.len(),
    );
    completion / 100.0
}
