use serde::{Deserialize, Serialize};

/// 同步日志状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncLogState {
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl SyncLogState {
    pub fn as_str(&self) -> &str {
        match self {
            SyncLogState::Started => "started",
            SyncLogState::Completed => "completed",
            SyncLogState::Failed => "failed",
        }
    }
}

/// 同步日志条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub job_id: String,
    pub migration_id: String,
    pub description: String,
    pub state: SyncLogState,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

/// 单个阶段的进度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageStatus {
    pub id: String,
    pub title: String,
    pub help_text: String,
    pub percent_complete: u32,
    pub status_text: String,
}

/// 运行与状态接口返回的结果
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrationReport {
    pub is_completed: bool,
    pub transfertoken: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stages: Vec<StageStatus>,
    pub migration_complete_messages: Vec<String>,
    pub should_continue: bool,
}

impl MigrationReport {
    /// 有错误或已完成时前端不应继续调用
    pub fn finish(mut self) -> Self {
        self.should_continue = self.errors.is_empty() && !self.is_completed;
        self
    }
}
