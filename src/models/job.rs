use crate::models::{SearchReplace, Table};
use serde::{Deserialize, Serialize};

/// 响应大小默认值 (字节)
pub const DB_RESPONSE_SIZE_WANTED_DEFAULT: u64 = 125_000;
/// 响应大小上限 (字节)
pub const DB_RESPONSE_SIZE_WANTED_MAX: u64 = 2_500_000;

/// 站点文件目录
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FileDetails {
    pub home_dir: String,
    pub wp_content_dir: String,
    pub uploads_dir: String,
    pub plugins_dir: String,
    pub themes_dir: String,
}

/// 一端站点的 masterdata
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SiteDetails {
    pub client_home_url: String,
    pub wpdb_prefix: String,
    pub wp_options_table: String,
    pub wp_users_table: String,
    pub wp_usermeta_table: String,
    pub max_allowed_packet_size: u64,
    pub max_post_size: u64,
    pub memory_limit: u64,
    pub sql_version: String,
    pub plugin_version: String,
    pub wp_version: String,
    pub mu_plugin_enabled: bool,
    pub files: FileDetails,
}

/// 一次迁移运行的全部可变状态，每次请求加载、修改并整体写回
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub id: String,
    pub migration_id: String,
    pub created_at: i64,

    // 阶段完成标记
    pub initiation_completed: bool,
    pub masterdata_completed: bool,
    pub database_backup_completed: bool,
    pub database_completed: bool,
    pub files_all_completed: bool,
    pub finalize_completed: bool,
    pub is_completed: bool,

    // 进度
    pub masterdata_progress: u32,
    pub database_backup_progress: u32,
    pub database_backup_progress_description: String,
    pub database_progress: u32,
    pub database_progress_description: String,
    pub files_progress: u32,
    pub files_progress_description: String,
    pub finalize_progress: u32,
    pub finalize_progress_description: String,

    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    // 运行锁
    pub run_lock: bool,
    pub run_lock_timer: i64,
    pub run_lock_problem_time: i64,
    pub request_full_timeframe: bool,

    // 传输令牌
    pub local_transfer_token: String,
    pub remote_transfer_token: String,

    // masterdata
    pub source: SiteDetails,
    pub target: SiteDetails,
    pub tables: Vec<Table>,
    pub target_tables: Vec<Table>,
    pub views: Vec<Table>,
    pub search_replaces: Vec<SearchReplace>,
    pub max_sql_packet_bytes: u64,
    pub max_request_bytes: u64,
    pub max_memory_bytes: u64,

    // 数据库同步节流
    pub db_first_run_setup: bool,
    pub db_response_size_wanted_default: u64,
    pub db_response_size_wanted_max: u64,
    pub db_throttle_table: String,
    pub db_throttle_table_response_size: u64,
    pub db_last_response_length: u64,
    pub db_memory_backoff_done: bool,

    // 数据库备份
    pub backup_tables: Vec<Table>,
    pub backup_initialized: bool,
    pub backup_filename: String,

    // finalize
    pub finalize_files_completed: bool,
    pub finalize_db_completed: bool,
    pub finalize_db_initialized: bool,
    pub finalize_db_sql_queries: Vec<Vec<String>>,
    pub finalize_db_sql_queries_count: usize,
    pub finalize_db_excess_tables_initialized: bool,
    pub finalize_db_excess_table_queries: Vec<String>,
    pub finalize_db_excess_table_queries_count: usize,
    pub finalize_db_table_to_expect_on_target: Vec<String>,
    pub finalize_success_messages: Vec<String>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            id: String::new(),
            migration_id: String::new(),
            created_at: 0,
            initiation_completed: false,
            masterdata_completed: false,
            database_backup_completed: false,
            database_completed: false,
            files_all_completed: false,
            finalize_completed: false,
            is_completed: false,
            masterdata_progress: 0,
            database_backup_progress: 0,
            database_backup_progress_description: String::new(),
            database_progress: 0,
            database_progress_description: String::new(),
            files_progress: 0,
            files_progress_description: String::new(),
            finalize_progress: 0,
            finalize_progress_description: String::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            run_lock: false,
            run_lock_timer: 0,
            run_lock_problem_time: 0,
            request_full_timeframe: false,
            local_transfer_token: String::new(),
            remote_transfer_token: String::new(),
            source: SiteDetails::default(),
            target: SiteDetails::default(),
            tables: Vec::new(),
            target_tables: Vec::new(),
            views: Vec::new(),
            search_replaces: Vec::new(),
            max_sql_packet_bytes: 0,
            max_request_bytes: 0,
            max_memory_bytes: 0,
            db_first_run_setup: false,
            db_response_size_wanted_default: DB_RESPONSE_SIZE_WANTED_DEFAULT,
            db_response_size_wanted_max: DB_RESPONSE_SIZE_WANTED_MAX,
            db_throttle_table: String::new(),
            db_throttle_table_response_size: DB_RESPONSE_SIZE_WANTED_DEFAULT,
            db_last_response_length: 0,
            db_memory_backoff_done: false,
            backup_tables: Vec::new(),
            backup_initialized: false,
            backup_filename: String::new(),
            finalize_files_completed: false,
            finalize_db_completed: false,
            finalize_db_initialized: false,
            finalize_db_sql_queries: Vec::new(),
            finalize_db_sql_queries_count: 0,
            finalize_db_excess_tables_initialized: false,
            finalize_db_excess_table_queries: Vec::new(),
            finalize_db_excess_table_queries_count: 0,
            finalize_db_table_to_expect_on_target: Vec::new(),
            finalize_success_messages: Vec::new(),
        }
    }
}

impl Job {
    pub fn new(migration_id: &str, job_id: &str) -> Self {
        Self {
            id: job_id.to_string(),
            migration_id: migration_id.to_string(),
            created_at: chrono::Utc::now().timestamp(),
            ..Default::default()
        }
    }

    /// option 存储中的键
    pub fn option_key(migration_id: &str, job_id: &str) -> String {
        format!("wpsynchro_{}_{}", migration_id, job_id)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 各阶段都完成后置为已完成，并把完成阶段的进度补到 100
    pub fn update_completed_state(&mut self) {
        if self.masterdata_completed {
            self.masterdata_progress = 100;
        }
        if self.database_backup_completed {
            self.database_backup_progress = 100;
        }
        if self.database_completed {
            self.database_progress = 100;
        }
        if self.files_all_completed {
            self.files_progress = 100;
        }
        if self.finalize_completed {
            self.finalize_progress = 100;
        }

        self.is_completed = self.initiation_completed
            && self.masterdata_completed
            && self.database_backup_completed
            && self.database_completed
            && self.files_all_completed
            && self.finalize_completed;
    }
}
