//! 初始化阶段: 向两端申请传输令牌

use crate::db::{SiteStateRepository, SyncLogRepository};
use crate::services::{AppState, MigrationContext};
use crate::utils::error::{AppError, Result};

/// 传输令牌有效期 (秒)
pub const TOKEN_LIFESPAN_SECS: i64 = 10800;

const MIN_TOKEN_LEN: usize = 20;

/// 服务端: 校验迁移类型后签发新令牌，返回令牌原文
pub async fn issue_token(state: &AppState, migration_type: &str) -> Result<String> {
    let settings = &state.settings;
    match migration_type {
        "local" => {}
        "pull" if !settings.allow_pull => {
            return Err(AppError::Unauthorized(
                "Pulling from this site is not allowed - Change configuration on remote server".to_string(),
            ));
        }
        "push" if !settings.allow_push => {
            return Err(AppError::Unauthorized(
                "Pushing to this site is not allowed - Change configuration on remote server".to_string(),
            ));
        }
        "pull" | "push" => {}
        _ => {
            return Err(AppError::InvalidInput(
                "Remote host does not allow that - Make sure it is same WP Synchro version".to_string(),
            ));
        }
    }

    let token = SiteStateRepository::new(state.store.as_ref())
        .new_transfer_token(TOKEN_LIFESPAN_SECS)
        .await?;
    tracing::info!("Issued transfer token for migration type {}", migration_type);
    Ok(token)
}

/// 客户端: 记录同步日志，取得本地与远端令牌
pub async fn run(ctx: &mut MigrationContext<'_>) {
    ctx.timer.start_timer("initiate");
    ctx.logger.info(&format!(
        "Initiating with remote and local host with remaining time: {:.2}",
        ctx.timer.remaining()
    ));

    if let Err(e) = SyncLogRepository::new(ctx.state.store.as_ref())
        .start_migration(&ctx.job.id, &ctx.migration.id, &ctx.migration.overview_description())
        .await
    {
        ctx.logger.error(&format!("Could not write sync log: {}", e));
    }

    let Some(local_token) = fetch_token(ctx, true).await else {
        return;
    };
    let Some(remote_token) = fetch_token(ctx, false).await else {
        return;
    };

    ctx.job.local_transfer_token = local_token;
    ctx.job.remote_transfer_token = remote_token;
    ctx.refresh_endpoints();
    ctx.job.initiation_completed = true;

    let elapsed = ctx.timer.end_timer("initiate");
    ctx.logger.info(&format!("Initiation completed on: {:.3} seconds", elapsed));
}

async fn fetch_token(ctx: &mut MigrationContext<'_>, local: bool) -> Option<String> {
    let (peer, migration_type) = if local {
        (ctx.local(), "local".to_string())
    } else {
        (ctx.remote(), ctx.migration.direction.as_str().to_string())
    };
    ctx.logger.debug(&format!("Calling initiate service for {}", peer.endpoint().base_url));

    match peer.initiate(&mut ctx.job, &migration_type).await {
        Ok(token) if token.len() >= MIN_TOKEN_LEN => Some(token),
        Ok(_) => {
            let message = format!(
                "Could not initialize with {} - Check that WP Synchro is installed, connection to the site is not blocked, migration type (push/pull) is allowed in setup and that health check runs without errors on the site",
                peer.endpoint().base_url
            );
            ctx.logger.critical(&message);
            ctx.job.errors.push(message);
            None
        }
        Err(errors) => {
            for error in &errors {
                ctx.logger.critical(error);
            }
            ctx.job.errors.extend(errors);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, SyncLogState};
    use crate::services::testing::TwoSites;
    use crate::settings::Settings;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_issue_token_checks_allowed_types() {
        let sites = TwoSites::new(Direction::Pull).await;
        let mut state = sites.source.state.clone();
        state.settings = Arc::new(Settings {
            allow_pull: false,
            ..(*state.settings).clone()
        });

        assert!(issue_token(&state, "local").await.unwrap().len() >= MIN_TOKEN_LEN);
        assert!(issue_token(&state, "push").await.is_ok());
        assert!(matches!(issue_token(&state, "pull").await, Err(AppError::Unauthorized(_))));
        assert!(matches!(issue_token(&state, "sideways").await, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_run_stores_both_tokens() {
        let sites = TwoSites::new(Direction::Pull).await;
        let id = sites.save_migration(|_| {}).await;
        let mut ctx = sites.context(&id, "job1").await;

        run(&mut ctx).await;

        assert!(ctx.job.errors.is_empty(), "{:?}", ctx.job.errors);
        assert!(ctx.job.initiation_completed);
        assert!(ctx.job.local_transfer_token.len() >= MIN_TOKEN_LEN);
        assert!(ctx.job.remote_transfer_token.len() >= MIN_TOKEN_LEN);
        assert!(ctx.endpoints.remote().token.is_some());

        let logs = SyncLogRepository::new(sites.local().store.as_ref()).find_all().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].state, SyncLogState::Started);
    }

    #[tokio::test]
    async fn test_run_reports_refused_remote() {
        let sites = TwoSites::new(Direction::Push).await;
        let id = sites
            .save_migration(|m| m.access_key = "not-the-right-key".into())
            .await;
        let mut ctx = sites.context(&id, "job1").await;

        run(&mut ctx).await;

        assert!(!ctx.job.initiation_completed);
        assert!(!ctx.job.errors.is_empty());
        assert!(ctx.job.errors[0].starts_with("Remote site: "), "{:?}", ctx.job.errors);
    }
}
