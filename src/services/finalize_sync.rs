//! finalize 阶段: 先文件后数据库，最后在目标端执行收尾动作

use crate::models::{ExecuteActionRequest, Job};
use crate::services::{database_finalize, MigrationContext};

const ACTIONS_FAILED: &str = "Some finalize actions failed to run - This can be cache clearing error or other error from target site. This normally does not impact the migration that much and therefore just a warning.";

pub async fn run(ctx: &mut MigrationContext<'_>) {
    ctx.logger.info(&format!(
        "Running finalize with remaining time: {:.2}",
        ctx.timer.remaining()
    ));

    if !ctx.migration.sync_files {
        ctx.job.finalize_files_completed = true;
    }
    if !ctx.migration.sync_database {
        ctx.job.finalize_db_completed = true;
    }

    update_progress(&mut ctx.job);
    if ctx.job.has_errors() {
        return;
    }

    if !ctx.job.finalize_files_completed {
        let files = ctx.state.files.clone();
        files.finalize_files(ctx).await;
        update_progress(&mut ctx.job);
        return;
    }

    if !ctx.job.finalize_db_completed {
        database_finalize::run(ctx).await;
        update_progress(&mut ctx.job);
        return;
    }

    ctx.job.finalize_progress = 100;
    run_target_actions(ctx).await;

    ctx.logger.info("Finalize completed");
    ctx.job.finalize_progress_description = String::new();
    ctx.job.finalize_completed = true;
}

async fn run_target_actions(ctx: &mut MigrationContext<'_>) {
    let mut actions = Vec::new();
    if ctx.migration.clear_cache_on_success {
        actions.push("clearcaches".to_string());
    }
    actions.push("cleartransfertoken".to_string());
    ctx.logger.debug(&format!("Executing finalize actions on target: {}", actions.join(", ")));

    let target = ctx.target();
    if let Err(errors) = target
        .execute_action(&mut ctx.job, &ExecuteActionRequest { actions })
        .await
    {
        for error in &errors {
            ctx.logger.warning(error);
        }
        ctx.job.warnings.push(ACTIONS_FAILED.to_string());
    }
}

/// 10 起步，文件与数据库各占 45
pub fn update_progress(job: &mut Job) {
    let mut progress = 10.0;
    if job.finalize_files_completed {
        progress += 45.0;
    }
    if job.finalize_db_completed {
        progress += 45.0;
    } else {
        progress += (45.0 * database_finalize::percent_completed(job)).floor();
    }
    job.finalize_progress = (progress as u32).min(100);
}
