//! 文件同步组件接口

use crate::services::MigrationContext;
use async_trait::async_trait;

/// 文件同步，与数据库同步共用 Job 字段和计时器
#[async_trait]
pub trait FilesSync: Send + Sync {
    /// 推进文件同步阶段，完成时设置 files_all_completed
    async fn run_files_sync(&self, ctx: &mut MigrationContext<'_>);

    /// finalize 阶段的文件部分，完成时设置 finalize_files_completed
    async fn finalize_files(&self, ctx: &mut MigrationContext<'_>);
}

/// 不传输文件，直接把文件阶段标记为完成
pub struct SkipFilesSync;

#[async_trait]
impl FilesSync for SkipFilesSync {
    async fn run_files_sync(&self, ctx: &mut MigrationContext<'_>) {
        let message = "File migration is not available on this installation - no files were migrated";
        ctx.logger.warning(message);
        ctx.job.warnings.push(message.to_string());
        ctx.job.files_progress = 100;
        ctx.job.files_progress_description = String::new();
        ctx.job.files_all_completed = true;
    }

    async fn finalize_files(&self, ctx: &mut MigrationContext<'_>) {
        ctx.job.finalize_files_completed = true;
    }
}
