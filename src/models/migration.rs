use crate::utils::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// 迁移方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Direction {
    /// 从远端拉取到本站
    #[serde(rename = "pull")]
    #[default]
    Pull,
    /// 从本站推送到远端
    #[serde(rename = "push")]
    Push,
}

impl TryFrom<String> for Direction {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "pull" => Ok(Direction::Pull),
            "push" => Ok(Direction::Push),
            _ => Err(format!("Unknown migration direction: {}", s)),
        }
    }
}

impl Direction {
    pub fn as_str(&self) -> &str {
        match self {
            Direction::Pull => "pull",
            Direction::Push => "push",
        }
    }
}

/// 远端连接方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[serde(rename = "direct")]
    #[default]
    Direct,
    #[serde(rename = "basicauth")]
    BasicAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// 查找替换规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchReplace {
    pub from: String,
    pub to: String,
}

impl SearchReplace {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// 文件位置规则，由文件同步组件使用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileLocation {
    /// 基准目录: abspath, wp-content, uploads, plugins, themes
    pub base: String,
    pub path: String,
    /// keep: 保留目标端多余文件; clean: 删除
    pub strategy: String,
    #[serde(default)]
    pub exclusions: Vec<String>,
}

/// 迁移配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Migration {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    /// 远端站点地址
    pub site_url: String,
    /// 远端站点的访问密钥
    pub access_key: String,
    pub connection_type: ConnectionType,
    pub basic_auth: Option<BasicAuth>,
    pub verify_ssl: bool,

    pub sync_database: bool,
    pub sync_files: bool,
    pub database_backup: bool,
    pub include_all_database_tables: bool,
    pub only_include_database_table_names: Vec<String>,
    pub search_replaces: Vec<SearchReplace>,
    pub ignore_all_search_replaces: bool,
    pub db_table_prefix_change: bool,
    pub db_preserve_active_plugins: bool,
    pub db_preserve_blog_public: bool,
    /// 逗号分隔的额外保留 option 名称
    pub db_preserve_options_custom: String,
    pub clear_cache_on_success: bool,
    pub file_locations: Vec<FileLocation>,
}

impl Default for Migration {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            direction: Direction::Pull,
            site_url: String::new(),
            access_key: String::new(),
            connection_type: ConnectionType::Direct,
            basic_auth: None,
            verify_ssl: true,
            sync_database: true,
            sync_files: false,
            database_backup: false,
            include_all_database_tables: true,
            only_include_database_table_names: Vec::new(),
            search_replaces: Vec::new(),
            ignore_all_search_replaces: false,
            db_table_prefix_change: true,
            db_preserve_active_plugins: true,
            db_preserve_blog_public: true,
            db_preserve_options_custom: String::new(),
            clear_cache_on_success: true,
            file_locations: Vec::new(),
        }
    }
}

impl Migration {
    /// 保存前校验并清理
    pub fn validate(&mut self) -> Result<()> {
        self.site_url = self.site_url.trim().trim_end_matches('/').to_string();
        self.access_key = self.access_key.trim().to_string();

        if self.site_url.is_empty() {
            return Err(AppError::InvalidInput("site_url is required".to_string()));
        }
        if !self.site_url.starts_with("http://") && !self.site_url.starts_with("https://") {
            return Err(AppError::InvalidInput(format!(
                "site_url must start with http:// or https://, got {}",
                self.site_url
            )));
        }
        if self.access_key.is_empty() {
            return Err(AppError::InvalidInput("access_key is required".to_string()));
        }
        if self.connection_type == ConnectionType::BasicAuth && self.basic_auth.is_none() {
            return Err(AppError::InvalidInput(
                "basic_auth credentials are required for connection_type basicauth".to_string(),
            ));
        }
        if !self.sync_database && !self.sync_files {
            return Err(AppError::InvalidInput(
                "Nothing to migrate - enable database or files".to_string(),
            ));
        }

        self.search_replaces.retain(|sr| !sr.from.is_empty());
        Ok(())
    }

    /// finalize 时需要保留的 options 键
    pub fn preserved_option_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if self.db_preserve_active_plugins {
            keys.push("active_plugins".to_string());
        }
        if self.db_preserve_blog_public {
            keys.push("blog_public".to_string());
        }
        for key in self.db_preserve_options_custom.split(',') {
            let key = key.trim();
            if !key.is_empty() && !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        keys
    }

    /// 简短描述，用于同步日志
    pub fn overview_description(&self) -> String {
        let mut parts = Vec::new();
        if self.sync_database {
            parts.push("database");
        }
        if self.sync_files {
            parts.push("files");
        }
        let verb = match self.direction {
            Direction::Pull => "Pull from",
            Direction::Push => "Push to",
        };
        format!("{} {} ({})", verb, self.site_url, parts.join(", "))
    }
}
