pub mod controller;
pub mod database_backup;
pub mod database_finalize;
pub mod database_sync;
pub mod execute_action;
pub mod files_sync;
pub mod finalize_sync;
pub mod initiate;
pub mod logger;
pub mod masterdata;
pub mod notifier;
pub mod peer;
pub mod row_fetcher;
pub mod status;
pub mod throttle;

use crate::db::{DatabaseBackend, JobRepository, OptionStore, SiteStateRepository};
use crate::models::{Job, Migration};
use crate::settings::Settings;
use crate::transport::{Endpoints, RemoteTransport};
use crate::utils::error::Result;
use crate::utils::Timer;
use std::sync::Arc;

pub use controller::MigrationController;
pub use files_sync::{FilesSync, SkipFilesSync};
pub use logger::{LogLevel, MigrationLogger, NullLogger, TracingLogger};
pub use notifier::{LogNotifier, MigrationEvent, MigrationNotifier, MigrationOutcome, WebhookNotifier};
pub use peer::Peer;

/// 本站的共享依赖
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn OptionStore>,
    pub database: Arc<dyn DatabaseBackend>,
    pub transport: Arc<dyn RemoteTransport>,
    pub files: Arc<dyn FilesSync>,
    pub notifier: Arc<dyn MigrationNotifier>,
    /// 串行化运行锁的检查与设置
    pub run_guard: Arc<tokio::sync::Mutex<()>>,
}

/// 单次运行请求的上下文，请求结束即丢弃
pub struct MigrationContext<'a> {
    pub state: &'a AppState,
    pub migration: Migration,
    pub job: Job,
    pub timer: Timer,
    pub endpoints: Endpoints,
    pub logger: Arc<dyn MigrationLogger>,
    local_access_key: String,
}

impl<'a> MigrationContext<'a> {
    pub async fn new(state: &'a AppState, migration: Migration, job: Job) -> Result<Self> {
        let local_access_key = SiteStateRepository::new(state.store.as_ref()).access_key().await?;
        let endpoints = Endpoints::resolve(&migration, &job, &state.settings, &local_access_key);
        let logger: Arc<dyn MigrationLogger> = Arc::new(TracingLogger::new(&migration.id, &job.id));

        Ok(Self {
            state,
            timer: Timer::start(state.settings.max_execution_time),
            migration,
            job,
            endpoints,
            logger,
            local_access_key,
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn MigrationLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// 令牌变化后重新解析两端
    pub fn refresh_endpoints(&mut self) {
        self.endpoints = Endpoints::resolve(
            &self.migration,
            &self.job,
            &self.state.settings,
            &self.local_access_key,
        );
    }

    pub fn source(&self) -> Peer<'a> {
        Peer::new(self.state, self.endpoints.source.clone())
    }

    pub fn target(&self) -> Peer<'a> {
        Peer::new(self.state, self.endpoints.target.clone())
    }

    pub fn local(&self) -> Peer<'a> {
        Peer::new(self.state, self.endpoints.local().clone())
    }

    pub fn remote(&self) -> Peer<'a> {
        Peer::new(self.state, self.endpoints.remote().clone())
    }

    pub async fn save_job(&self) -> Result<()> {
        JobRepository::new(self.state.store.as_ref()).save(&self.job).await
    }
}
