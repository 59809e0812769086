/// option 存储表名
pub const OPTIONS_TABLE: &str = "wpsynchro_options";

/// option 存储表的 CREATE TABLE 语句
pub const CREATE_OPTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wpsynchro_options (
    option_name VARCHAR(191) NOT NULL PRIMARY KEY,
    option_value LONGTEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci;
"#;
