//! WP Synchro 迁移服务
//!
//! 在两个站点之间分块、可恢复地迁移数据库与文件。

pub mod api;
pub mod db;
pub mod generators;
pub mod models;
pub mod services;
pub mod settings;
pub mod transport;
pub mod utils;
