//! 迁移主控制器
//!
//! 每次调用加载 Job，持有运行锁推进一个阶段单元，然后保存并返回结果。

use crate::db::{JobRepository, MigrationRepository, SiteStateRepository, SyncLogRepository};
use crate::models::{Job, MigrationReport, RunRequest, SyncLogState};
use crate::services::{
    database_backup, database_sync, finalize_sync, initiate, masterdata, status, AppState,
    MigrationContext, MigrationEvent, MigrationOutcome,
};
use crate::utils::error::Result;
use crate::utils::timer::clamp_max_execution_time;

pub const ALREADY_RUNNING: &str = "Job is already running or error has happened - Check PHP error logs";

pub struct MigrationController<'a> {
    state: &'a AppState,
}

impl<'a> MigrationController<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    /// 运行一次迁移
    pub async fn run(&self, request: &RunRequest) -> Result<MigrationReport> {
        let store = self.state.store.as_ref();
        let migration = MigrationRepository::new(store)
            .find_by_id(&request.migration_id)
            .await?;

        if let Err(e) = SiteStateRepository::new(store).update_last_running().await {
            tracing::warn!("Could not update last running timestamp: {}", e);
        }

        let mut ctx = {
            let _guard = self.state.run_guard.lock().await;
            let jobs = JobRepository::new(store);
            let mut job = jobs
                .find(&request.migration_id, &request.job_id)
                .await?
                .unwrap_or_else(|| Job::new(&request.migration_id, &request.job_id));

            if request.migration_restart {
                job.errors.clear();
                job.warnings.clear();
                job.run_lock = false;
                jobs.save(&job).await?;
                tracing::info!("User restarted the migration {} job {}", job.migration_id, job.id);
            }

            if job.run_lock {
                tracing::error!("{} (job {})", ALREADY_RUNNING, job.id);
                let mut report = run_report(&job);
                report.errors.push(ALREADY_RUNNING.to_string());
                return Ok(report.finish());
            }
            if job.is_completed {
                return Ok(run_report(&job));
            }

            let mut ctx = MigrationContext::new(self.state, migration, job).await?;
            let now = chrono::Utc::now().timestamp();
            let max_execution_time = clamp_max_execution_time(self.state.settings.max_execution_time);
            ctx.job.run_lock = true;
            ctx.job.run_lock_timer = now;
            ctx.job.run_lock_problem_time = now + (max_execution_time as f64 * 1.5).ceil() as i64;
            ctx.save_job().await?;
            ctx
        };

        ctx.logger.info(&format!(
            "Starting migration loop - With allotted time: {:.2} seconds",
            ctx.timer.remaining()
        ));
        ctx.job.request_full_timeframe = false;
        dispatch(&mut ctx).await;

        let was_completed = ctx.job.is_completed;
        ctx.job.update_completed_state();
        ctx.job.run_lock = false;
        ctx.save_job().await?;

        let report = run_report(&ctx.job);
        self.after_run(&ctx, !was_completed && ctx.job.is_completed).await;

        ctx.timer.log_timers();
        ctx.logger.info(&format!(
            "Ending migration loop - with remaining time: {:.2}",
            ctx.timer.remaining()
        ));
        Ok(report)
    }

    /// 状态查询
    pub async fn status(&self, migration_id: &str, job_id: &str) -> Result<MigrationReport> {
        status::migration_status(self.state, migration_id, job_id).await
    }

    async fn after_run(&self, ctx: &MigrationContext<'_>, newly_completed: bool) {
        let store = self.state.store.as_ref();
        let (job_id, migration_id) = (ctx.job.id.as_str(), ctx.migration.id.as_str());

        let outcome = if ctx.job.has_errors() {
            MigrationOutcome::Failed
        } else if newly_completed {
            MigrationOutcome::Completed
        } else {
            return;
        };

        let log_state = match outcome {
            MigrationOutcome::Failed => SyncLogState::Failed,
            MigrationOutcome::Completed => SyncLogState::Completed,
        };
        if let Err(e) = SyncLogRepository::new(store).set_state(job_id, migration_id, log_state).await {
            ctx.logger.error(&format!("Could not update sync log: {}", e));
        }

        if outcome == MigrationOutcome::Completed {
            match SiteStateRepository::new(store).increment_success_count().await {
                Ok(count) => ctx.logger.debug(&format!("Successful migrations on this site: {}", count)),
                Err(e) => ctx.logger.error(&format!("Could not update success count: {}", e)),
            }
        }

        let event = MigrationEvent {
            migration_id: migration_id.to_string(),
            job_id: job_id.to_string(),
            outcome,
            errors: ctx.job.errors.clone(),
            warnings: ctx.job.warnings.clone(),
        };
        self.state.notifier.notify(&event).await;
    }
}

/// 推进第一个未完成的阶段，未启用的阶段直接标记完成
async fn dispatch(ctx: &mut MigrationContext<'_>) {
    let sync_database = ctx.migration.sync_database;
    let sync_files = ctx.migration.sync_files;
    let backup = sync_database && ctx.migration.database_backup;

    if !ctx.job.initiation_completed {
        initiate::run(ctx).await;
    } else if !ctx.job.masterdata_completed {
        masterdata::run(ctx).await;
    } else if !ctx.job.database_backup_completed {
        if backup {
            database_backup::run(ctx).await;
        } else {
            ctx.job.database_backup_progress = 100;
            ctx.job.database_backup_completed = true;
        }
    } else if !ctx.job.database_completed {
        if sync_database {
            database_sync::run(ctx).await;
        } else {
            ctx.job.database_progress = 100;
            ctx.job.database_completed = true;
        }
    } else if !ctx.job.files_all_completed {
        if sync_files {
            let files = ctx.state.files.clone();
            files.run_files_sync(ctx).await;
        } else {
            ctx.job.files_progress = 100;
            ctx.job.files_all_completed = true;
        }
    } else if !ctx.job.finalize_completed {
        finalize_sync::run(ctx).await;
    }
}

fn run_report(job: &Job) -> MigrationReport {
    MigrationReport {
        is_completed: job.is_completed,
        transfertoken: job.local_transfer_token.clone(),
        errors: job.errors.clone(),
        warnings: job.warnings.clone(),
        stages: Vec::new(),
        migration_complete_messages: job.finalize_success_messages.clone(),
        should_continue: false,
    }
    .finish()
}
