//! 迁移日志接口

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

/// 单次迁移运行的日志
pub trait MigrationLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, context: Option<&Value>);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, None);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message, None);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, None);
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message, None);
    }
}

/// 转发到 tracing，附带迁移与任务 ID
pub struct TracingLogger {
    migration_id: String,
    job_id: String,
}

impl TracingLogger {
    pub fn new(migration_id: &str, job_id: &str) -> Self {
        Self {
            migration_id: migration_id.to_string(),
            job_id: job_id.to_string(),
        }
    }
}

impl MigrationLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, context: Option<&Value>) {
        let context = context.map(Value::to_string).unwrap_or_default();
        let (migration_id, job_id) = (self.migration_id.as_str(), self.job_id.as_str());

        match level {
            LogLevel::Debug => tracing::debug!(migration_id, job_id, context = %context, "{}", message),
            LogLevel::Info => tracing::info!(migration_id, job_id, context = %context, "{}", message),
            LogLevel::Warning => tracing::warn!(migration_id, job_id, context = %context, "{}", message),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(migration_id, job_id, context = %context, level = level.as_str(), "{}", message)
            }
        }
    }
}

/// 丢弃所有日志
pub struct NullLogger;

impl MigrationLogger for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str, _context: Option<&Value>) {}
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// 记录日志内容，供测试断言
    #[derive(Default)]
    pub struct RecordingLogger {
        pub entries: Mutex<Vec<(LogLevel, String)>>,
    }

    impl MigrationLogger for RecordingLogger {
        fn log(&self, level: LogLevel, message: &str, _context: Option<&Value>) {
            if let Ok(mut entries) = self.entries.lock() {
                entries.push((level, message.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingLogger;
    use super::*;

    #[test]
    fn test_default_methods_forward_level() {
        let logger = RecordingLogger::default();
        logger.info("starting");
        logger.warning("careful");
        logger.critical("stopped");

        let entries = logger.entries.lock().unwrap();
        assert_eq!(
            entries.iter().map(|(l, _)| *l).collect::<Vec<_>>(),
            vec![LogLevel::Info, LogLevel::Warning, LogLevel::Critical]
        );
        assert_eq!(entries[1].1, "careful");
    }

    #[test]
    fn test_tracing_and_null_loggers_accept_context() {
        let context = serde_json::json!({"table": "wp_posts"});
        TracingLogger::new("m1", "j1").log(LogLevel::Error, "failed", Some(&context));
        NullLogger.log(LogLevel::Info, "ignored", None);
        assert_eq!(LogLevel::Critical.as_str(), "CRITICAL");
    }
}
