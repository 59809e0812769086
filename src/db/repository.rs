use crate::db::OptionStore;
use crate::models::{Job, Migration, SyncLogEntry, SyncLogState};
use crate::utils::crypto;
use crate::utils::error::{AppError, Result};
use serde::{Deserialize, Serialize};

const MIGRATIONS_KEY: &str = "wpsynchro_migrations";
const SYNC_LOGS_KEY: &str = "wpsynchro_sync_logs";
const ACCESS_KEY_KEY: &str = "wpsynchro_accesskey";
const TRANSFER_TOKEN_KEY: &str = "wpsynchro_transfer_token";
const SUCCESS_COUNT_KEY: &str = "wpsynchro_success_count";
const LAST_RUN_KEY: &str = "wpsynchro_migration_last_run_timestamp";

/// 同步日志保留条数
pub const SYNC_LOGS_TO_KEEP: usize = 20;
/// 上次运行超过该秒数后才认为可以安全开始新的迁移
pub const SAFE_TO_START_AFTER_SECS: i64 = 35;

/// 迁移配置仓库
pub struct MigrationRepository<'a> {
    store: &'a dyn OptionStore,
}

impl<'a> MigrationRepository<'a> {
    pub fn new(store: &'a dyn OptionStore) -> Self {
        Self { store }
    }

    /// 获取所有迁移
    pub async fn find_all(&self) -> Result<Vec<Migration>> {
        match self.store.get(MIGRATIONS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// 根据 ID 获取迁移
    pub async fn find_by_id(&self, id: &str) -> Result<Migration> {
        self.find_all()
            .await?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Migration with id {} not found", id)))
    }

    /// 新建或更新迁移，返回其 ID
    pub async fn save(&self, mut migration: Migration) -> Result<String> {
        migration.validate()?;
        if migration.id.is_empty() {
            migration.id = crate::utils::system::unique_id();
        }

        let mut migrations = self.find_all().await?;
        match migrations.iter_mut().find(|m| m.id == migration.id) {
            Some(existing) => *existing = migration.clone(),
            None => migrations.push(migration.clone()),
        }

        self.store
            .set(MIGRATIONS_KEY, &serde_json::to_string(&migrations)?)
            .await?;
        Ok(migration.id)
    }

    /// 删除迁移及其所有 Job
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut migrations = self.find_all().await?;
        migrations.retain(|m| m.id != id);
        self.store
            .set(MIGRATIONS_KEY, &serde_json::to_string(&migrations)?)
            .await?;
        self.store.delete_prefix(&format!("wpsynchro_{}_", id)).await?;
        Ok(())
    }
}

/// Job 仓库
pub struct JobRepository<'a> {
    store: &'a dyn OptionStore,
}

impl<'a> JobRepository<'a> {
    pub fn new(store: &'a dyn OptionStore) -> Self {
        Self { store }
    }

    pub async fn find(&self, migration_id: &str, job_id: &str) -> Result<Option<Job>> {
        match self.store.get(&Job::option_key(migration_id, job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, job: &Job) -> Result<()> {
        let raw = serde_json::to_string(job)?;
        self.store
            .set(&Job::option_key(&job.migration_id, &job.id), &raw)
            .await
            .map_err(|e| {
                tracing::error!("Failed to save job {}: {}", job.id, e);
                e
            })
    }

    pub async fn delete(&self, migration_id: &str, job_id: &str) -> Result<()> {
        self.store.delete(&Job::option_key(migration_id, job_id)).await
    }
}

/// 同步日志仓库
pub struct SyncLogRepository<'a> {
    store: &'a dyn OptionStore,
}

impl<'a> SyncLogRepository<'a> {
    pub fn new(store: &'a dyn OptionStore) -> Self {
        Self { store }
    }

    pub async fn find_all(&self) -> Result<Vec<SyncLogEntry>> {
        match self.store.get(SYNC_LOGS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// 记录迁移开始，超出保留条数的旧日志连同对应 Job 一起删除
    pub async fn start_migration(&self, job_id: &str, migration_id: &str, description: &str) -> Result<()> {
        let mut logs = self.find_all().await?;
        logs.push(SyncLogEntry {
            job_id: job_id.to_string(),
            migration_id: migration_id.to_string(),
            description: description.to_string(),
            state: SyncLogState::Started,
            start_time: chrono::Utc::now().timestamp(),
            end_time: None,
        });

        while logs.len() > SYNC_LOGS_TO_KEEP {
            let old = logs.remove(0);
            JobRepository::new(self.store)
                .delete(&old.migration_id, &old.job_id)
                .await?;
            tracing::debug!("Purged old job {} from sync log", old.job_id);
        }

        self.store.set(SYNC_LOGS_KEY, &serde_json::to_string(&logs)?).await
    }

    pub async fn set_state(&self, job_id: &str, migration_id: &str, state: SyncLogState) -> Result<()> {
        let mut logs = self.find_all().await?;
        if let Some(entry) = logs
            .iter_mut()
            .find(|l| l.job_id == job_id && l.migration_id == migration_id)
        {
            entry.state = state;
            if state != SyncLogState::Started {
                entry.end_time = Some(chrono::Utc::now().timestamp());
            }
        }
        self.store.set(SYNC_LOGS_KEY, &serde_json::to_string(&logs)?).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    expires_at: i64,
}

/// 本站状态: 访问密钥、传输令牌、计数器
pub struct SiteStateRepository<'a> {
    store: &'a dyn OptionStore,
}

impl<'a> SiteStateRepository<'a> {
    pub fn new(store: &'a dyn OptionStore) -> Self {
        Self { store }
    }

    /// 本站访问密钥，不存在时生成
    pub async fn access_key(&self) -> Result<String> {
        if let Some(key) = self.store.get(ACCESS_KEY_KEY).await? {
            if !key.is_empty() {
                return Ok(key);
            }
        }
        let key = crypto::generate_access_key();
        self.store.set(ACCESS_KEY_KEY, &key).await?;
        tracing::info!("Generated new access key for this site");
        Ok(key)
    }

    /// 生成新的传输令牌并替换旧令牌，返回令牌原文
    pub async fn new_transfer_token(&self, lifespan_secs: i64) -> Result<String> {
        let stored = StoredToken {
            token: crypto::generate_token(),
            expires_at: chrono::Utc::now().timestamp() + lifespan_secs,
        };
        self.store
            .set(TRANSFER_TOKEN_KEY, &serde_json::to_string(&stored)?)
            .await?;
        Ok(stored.token)
    }

    /// 校验调用方出示的令牌
    pub async fn validate_transfer_token(&self, presented: &str) -> Result<bool> {
        let presented = presented.trim();
        if presented.len() < 20 {
            return Ok(false);
        }

        let stored: StoredToken = match self.store.get(TRANSFER_TOKEN_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => return Ok(false),
        };
        if stored.expires_at < chrono::Utc::now().timestamp() {
            tracing::debug!("Transfer token expired");
            return Ok(false);
        }

        let access_key = self.access_key().await?;
        let expected = crypto::token_hash(&stored.token, &access_key);
        Ok(crypto::constant_time_eq(&expected, presented))
    }

    pub async fn clear_transfer_token(&self) -> Result<()> {
        self.store.delete(TRANSFER_TOKEN_KEY).await
    }

    pub async fn success_count(&self) -> Result<u64> {
        Ok(self
            .store
            .get(SUCCESS_COUNT_KEY)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub async fn increment_success_count(&self) -> Result<u64> {
        let count = self.success_count().await? + 1;
        self.store.set(SUCCESS_COUNT_KEY, &count.to_string()).await?;
        Ok(count)
    }

    pub async fn update_last_running(&self) -> Result<()> {
        self.store
            .set(LAST_RUN_KEY, &chrono::Utc::now().timestamp().to_string())
            .await
    }

    /// 距上次运行超过 35 秒才算安全
    pub async fn is_safe_to_start(&self) -> Result<bool> {
        let last: i64 = self
            .store
            .get(LAST_RUN_KEY)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(chrono::Utc::now().timestamp() - last > SAFE_TO_START_AFTER_SECS)
    }
}
