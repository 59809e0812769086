//! 迁移状态查询，供前端轮询

use crate::db::{JobRepository, MigrationRepository};
use crate::models::{Job, Migration, MigrationReport, StageStatus};
use crate::services::AppState;
use crate::utils::error::Result;

const STALE_LOCK: &str = "The migration process seem to have problems - It may be PHP errors - please check the PHP logs";

pub async fn migration_status(state: &AppState, migration_id: &str, job_id: &str) -> Result<MigrationReport> {
    let migration = MigrationRepository::new(state.store.as_ref())
        .find_by_id(migration_id)
        .await?;
    let job = JobRepository::new(state.store.as_ref())
        .find(migration_id, job_id)
        .await?
        .unwrap_or_else(|| Job::new(migration_id, job_id));

    Ok(build_report(&migration, &job, chrono::Utc::now().timestamp()))
}

fn stage(id: &str, title: &str, help_text: &str, percent_complete: u32, status_text: &str) -> StageStatus {
    StageStatus {
        id: id.to_string(),
        title: title.to_string(),
        help_text: help_text.to_string(),
        percent_complete,
        status_text: status_text.to_string(),
    }
}

/// 按迁移配置列出阶段，并检测失效的运行锁
pub fn build_report(migration: &Migration, job: &Job, now: i64) -> MigrationReport {
    let mut stages = vec![
        stage(
            "initialize",
            "Initialize",
            "Initiating migration on source and target and sets up security tokens on both ends",
            if job.initiation_completed { 100 } else { 10 },
            "",
        ),
        stage(
            "masterdata",
            "Masterdata",
            "Fetching masterdata on both source and target and check that we are ready to migrate",
            job.masterdata_progress,
            "",
        ),
    ];

    if migration.sync_database && migration.database_backup {
        stages.push(stage(
            "databasebackup",
            "Database backup",
            "Backup of database tables that will be changed by database sync. Backup location can be found in the log",
            job.database_backup_progress,
            &job.database_backup_progress_description,
        ));
    }
    if migration.sync_database {
        stages.push(stage(
            "databasesync",
            "Migrate database",
            "Migrate the database, moving the database table rows to the target",
            job.database_progress,
            &job.database_progress_description,
        ));
    }
    if migration.sync_files {
        stages.push(stage(
            "filessync",
            "Migrate files",
            "Migrate the files, by comparing and transferring the missing files",
            job.files_progress,
            &job.files_progress_description,
        ));
    }
    stages.push(stage(
        "finalize",
        "Finalizing",
        "Completes the migration by doing the last few steps and cleaning up",
        job.finalize_progress,
        &job.finalize_progress_description,
    ));

    let mut errors = job.errors.clone();
    if job.run_lock && job.run_lock_problem_time > 0 && job.run_lock_problem_time < now {
        tracing::warn!("Run lock for job {} passed its problem time", job.id);
        errors.push(STALE_LOCK.to_string());
    }

    MigrationReport {
        is_completed: job.is_completed,
        transfertoken: String::new(),
        errors,
        warnings: job.warnings.clone(),
        stages,
        migration_complete_messages: job.finalize_success_messages.clone(),
        should_continue: false,
    }
    .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::services::testing::TwoSites;
    use crate::utils::error::AppError;

    fn ids(report: &MigrationReport) -> Vec<&str> {
        report.stages.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_stages_follow_configuration() {
        let job = Job::new("m", "j");
        let mut migration = Migration::default();
        let report = build_report(&migration, &job, 0);
        assert_eq!(ids(&report), vec!["initialize", "masterdata", "databasesync", "finalize"]);
        assert_eq!(report.stages[0].percent_complete, 10);
        assert!(report.should_continue);

        migration.database_backup = true;
        migration.sync_files = true;
        let report = build_report(&migration, &job, 0);
        assert_eq!(
            ids(&report),
            vec!["initialize", "masterdata", "databasebackup", "databasesync", "filessync", "finalize"]
        );

        migration.sync_database = false;
        let report = build_report(&migration, &job, 0);
        assert_eq!(ids(&report), vec!["initialize", "masterdata", "filessync", "finalize"]);
    }

    #[test]
    fn test_progress_is_copied_from_job() {
        let mut job = Job::new("m", "j");
        job.initiation_completed = true;
        job.masterdata_progress = 100;
        job.database_progress = 42;
        job.database_progress_description = "Data: 1kB / 2kB - Rows: 1 / 2".into();
        job.finalize_success_messages = vec!["Done".into()];

        let report = build_report(&Migration::default(), &job, 0);
        assert_eq!(report.stages[0].percent_complete, 100);
        assert_eq!(report.stages[2].percent_complete, 42);
        assert_eq!(report.stages[2].status_text, "Data: 1kB / 2kB - Rows: 1 / 2");
        assert_eq!(report.migration_complete_messages, vec!["Done"]);
    }

    #[test]
    fn test_stale_run_lock_is_reported() {
        let mut job = Job::new("m", "j");
        job.run_lock = true;
        job.run_lock_problem_time = 1_000;

        let report = build_report(&Migration::default(), &job, 999);
        assert!(report.errors.is_empty());

        let report = build_report(&Migration::default(), &job, 1_001);
        assert_eq!(report.errors, vec![STALE_LOCK]);
        assert!(!report.should_continue);
        assert!(job.errors.is_empty());

        job.run_lock = false;
        assert!(build_report(&Migration::default(), &job, 1_001).errors.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_migration() {
        let sites = TwoSites::new(Direction::Pull).await;
        let result = migration_status(&sites.target.state, "missing", "j").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
