//! masterdata 阶段: 交换两端的环境和表结构信息

use crate::db::schema::OPTIONS_TABLE;
use crate::models::{
    FileDetails, Job, MasterdataRequest, MasterdataResponse, Migration, SearchReplace, SiteDetails,
    TMP_TABLE_PREFIX,
};
use crate::services::{AppState, MigrationContext};
use crate::utils::error::Result;
use crate::utils::system::{memory_usage_bytes, version_lt};
use std::collections::HashSet;

pub const SLUG_DBDETAILS: &str = "dbdetails";
pub const SLUG_FILEDETAILS: &str = "filedetails";
pub const SLUG_TMPTABLES: &str = "tmptables";

/// 服务端: 按请求的 slug 返回本站信息，base 总是返回
pub async fn serve(state: &AppState, request: &MasterdataRequest) -> Result<MasterdataResponse> {
    let settings = &state.settings;
    let server = state.database.server_details().await?;
    let wants = |slug: &str| request.slugs.iter().any(|s| s == slug);

    let base = SiteDetails {
        client_home_url: settings.site_url.trim_end_matches('/').to_string(),
        wpdb_prefix: settings.table_prefix.clone(),
        wp_options_table: settings.options_table(),
        wp_users_table: settings.users_table(),
        wp_usermeta_table: settings.usermeta_table(),
        max_allowed_packet_size: server.max_allowed_packet,
        max_post_size: settings.max_post_size,
        memory_limit: settings.memory_limit,
        sql_version: server.version,
        plugin_version: settings.plugin_version.clone(),
        wp_version: settings.wp_version.clone(),
        mu_plugin_enabled: settings.mu_plugin_enabled,
        files: FileDetails::default(),
    };

    let mut response = MasterdataResponse {
        base: Some(base),
        ..Default::default()
    };

    if wants(SLUG_DBDETAILS) {
        let tables = state
            .database
            .tables()
            .await?
            .into_iter()
            .filter(|t| t.name != OPTIONS_TABLE && !t.is_temp_table())
            .collect();
        response.dbdetails = Some(tables);
    }
    if wants(SLUG_TMPTABLES) {
        response.tmptables_dbdetails = Some(state.database.table_summaries(TMP_TABLE_PREFIX).await?);
    }
    if wants(SLUG_FILEDETAILS) {
        response.files = Some(file_details(&settings.abspath));
    }

    Ok(response)
}

fn file_details(abspath: &str) -> FileDetails {
    let home = abspath.trim_end_matches('/').to_string();
    let wp_content = format!("{}/wp-content", home);
    FileDetails {
        uploads_dir: format!("{}/uploads", wp_content),
        plugins_dir: format!("{}/plugins", wp_content),
        themes_dir: format!("{}/themes", wp_content),
        wp_content_dir: wp_content,
        home_dir: home,
    }
}

/// 客户端: 取得两端 masterdata 并整理到 Job
pub async fn run(ctx: &mut MigrationContext<'_>) {
    ctx.timer.start_timer("masterdata");
    ctx.logger.info(&format!(
        "Getting masterdata from source and target with remaining time: {:.2}",
        ctx.timer.remaining()
    ));

    let slugs = [SLUG_DBDETAILS, SLUG_FILEDETAILS];
    let Some(source) = retrieve(ctx, true, &slugs).await else {
        return;
    };
    let Some(target) = retrieve(ctx, false, &slugs).await else {
        return;
    };

    for (label, response) in [("source", &source), ("target", &target)] {
        if response.dbdetails.is_none() {
            let message = format!(
                "Did not retrieve correct database masterdata from target '{}' - See log file",
                label
            );
            ctx.logger.critical(&message);
            ctx.job.errors.push(message);
            return;
        }
    }

    ctx.job.source = site_details(&source);
    ctx.job.target = site_details(&target);
    ctx.job.tables = source.dbdetails.unwrap_or_default();
    ctx.job.target_tables = target.dbdetails.unwrap_or_default();

    initialize_configuration(&ctx.migration, &mut ctx.job, memory_usage_bytes());
    check_compatibility(&ctx.migration, &mut ctx.job);
    for warning in &ctx.job.warnings {
        ctx.logger.warning(warning);
    }

    let elapsed = ctx.timer.end_timer("masterdata");
    ctx.logger.info(&format!("Completed masterdata on: {:.3} seconds", elapsed));

    if !ctx.job.has_errors() {
        ctx.job.masterdata_completed = true;
        ctx.job.masterdata_progress = 100;
    }
}

async fn retrieve(ctx: &mut MigrationContext<'_>, source: bool, slugs: &[&str]) -> Option<MasterdataResponse> {
    let peer = if source { ctx.source() } else { ctx.target() };
    ctx.logger.debug(&format!(
        "Calling masterdata service on: {} as {}",
        peer.endpoint().base_url,
        if source { "source" } else { "target" }
    ));

    match peer.masterdata(&mut ctx.job, slugs).await {
        Ok(response) => Some(response),
        Err(errors) => {
            let message = format!(
                "Could not retrieve masterdata from target '{}', which means we can not continue the migration.",
                peer.endpoint().service_url(crate::transport::actions::MASTERDATA)
            );
            ctx.logger.critical(&message);
            ctx.job.errors.extend(errors);
            ctx.job.errors.push(message);
            None
        }
    }
}

fn site_details(response: &MasterdataResponse) -> SiteDetails {
    let mut details = response.base.clone().unwrap_or_default();
    if let Some(files) = &response.files {
        details.files = files.clone();
    }
    details
}

/// 合并查找替换、过滤表并计算两端共同的容量上限
pub fn initialize_configuration(migration: &Migration, job: &mut Job, current_memory_usage: u64) {
    let mut search_replaces = migration.search_replaces.clone();
    search_replaces.push(SearchReplace::new(
        job.source.client_home_url.clone(),
        job.target.client_home_url.clone(),
    ));
    search_replaces.push(SearchReplace::new(
        job.source.files.home_dir.clone(),
        job.target.files.home_dir.clone(),
    ));
    job.search_replaces = if migration.ignore_all_search_replaces {
        Vec::new()
    } else {
        remove_duplicate_search_replaces(search_replaces)
    };

    let mut tables = std::mem::take(&mut job.tables);
    if !migration.include_all_database_tables {
        let only_include = &migration.only_include_database_table_names;
        tables.retain(|t| only_include.iter().any(|name| *name == t.name));
    }

    let (views, mut tables): (Vec<_>, Vec<_>) = tables.into_iter().partition(|t| t.is_view);
    for table in tables.iter_mut() {
        if table.rows == 0 {
            table.is_completed = true;
        }
    }
    tables.retain(|t| !t.is_temp_table());
    job.views = views;
    job.tables = tables;

    job.max_sql_packet_bytes = job
        .source
        .max_allowed_packet_size
        .min(job.target.max_allowed_packet_size);
    job.max_request_bytes = job.source.max_post_size.min(job.target.max_post_size) * 9 / 10;
    let memory = job.source.memory_limit.min(job.target.memory_limit);
    job.max_memory_bytes = (memory.saturating_sub(current_memory_usage) as f64 * 0.7).round() as u64;
}

/// 去掉重复和 from 等于 to 的规则，保持原顺序
pub fn remove_duplicate_search_replaces(search_replaces: Vec<SearchReplace>) -> Vec<SearchReplace> {
    let mut seen = HashSet::new();
    search_replaces
        .into_iter()
        .filter(|sr| sr.from != sr.to && !sr.from.is_empty())
        .filter(|sr| seen.insert(sr.clone()))
        .collect()
}

/// 版本与配置兼容性检查，错误阻止迁移，警告只提示
pub fn check_compatibility(migration: &Migration, job: &mut Job) {
    if migration.sync_database && version_lt(&job.target.sql_version, "5.7") {
        for table in job.tables.iter().filter(|t| t.uses_column_type("json")) {
            job.errors.push(format!(
                "The database table \"{}\" is not supported on the target database version ({}) and therefore it can not be migrated. To fix this error, either exclude the table from migration or upgrade the target database to a newer version.",
                table.name, job.target.sql_version
            ));
        }
    }

    if job.has_errors() {
        return;
    }

    if job.source.plugin_version != job.target.plugin_version {
        job.errors.push(format!(
            "WP Synchro plugin versions do not match on both sides. One runs version {} and other runs {}. Make sure they use same version to prevent problems caused by different versions of plugin.",
            job.source.plugin_version, job.target.plugin_version
        ));
    }

    if job.source.wp_version != job.target.wp_version {
        job.warnings.push(format!(
            "WordPress versions are different on the source and target. Source WP version is: {} and target WP version is: {}. This is just a warning, as in most cases it will not cause problems. But in some cases it can cause failures in the very last steps of the migration. If you experience that, make sure to have the same WP version on both ends.",
            job.source.wp_version, job.target.wp_version
        ));
    }

    if migration.sync_database
        && !migration.db_table_prefix_change
        && job.source.wpdb_prefix != job.target.wpdb_prefix
    {
        job.warnings.push(format!(
            "Database table prefixes are different on the source and target site. Source uses '{}' and target uses '{}'. Table prefix migration is not enabled in the migration configuration. This is just a warning, as the migration can complete, but the tables will not be used by the target site. Recommended action is to turn on the table prefix migration in the migration configuration.",
            job.source.wpdb_prefix, job.target.wpdb_prefix
        ));
    }

    if migration.sync_files && !job.target.mu_plugin_enabled {
        job.errors.push(
            "When doing file migrations, it is required to have the WP Synchro MU plugin active on the target site. It can be enabled on the target site in menu WP Synchro > Setup.".to_string(),
        );
    }
}
