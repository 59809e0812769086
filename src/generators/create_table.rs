use crate::generators::select_sql::quote_identifier;
use crate::models::{Table, TMP_TABLE_PREFIX};
use crate::utils::system::{unique_id, version_lt};
use once_cell::sync::Lazy;
use regex::Regex;

static CONSTRAINT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CONSTRAINT\s`[^`]+`").expect("constraint name pattern"));
static KEY_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"KEY\s`[^`]+`").expect("key name pattern"));

/// 建表前的第一条语句
pub const DISABLE_FOREIGN_KEY_CHECKS: &str = "SET FOREIGN_KEY_CHECKS = 0;";

/// 新的临时表名
pub fn new_temp_name() -> String {
    format!("{}{}", TMP_TABLE_PREFIX, unique_id())
}

/// 源端表名按前缀变更映射到目标端
pub fn handle_table_prefix_change(table_name: &str, source_prefix: &str, target_prefix: &str) -> String {
    if source_prefix != target_prefix {
        if let Some(rest) = table_name.strip_prefix(source_prefix) {
            return format!("{}{}", target_prefix, rest);
        }
    }
    table_name.to_string()
}

/// 临时表建表语句生成器
pub struct CreateTableGenerator;

impl CreateTableGenerator {
    /// 为所有表分配临时表名并生成建表语句列表。
    ///
    /// 语句中对本表和其它迁移表的引用都改为临时表名，已有临时表名的表保持不变。
    pub fn generate(tables: &mut [Table], target_sql_version: &str) -> Vec<String> {
        let mut statements = vec![DISABLE_FOREIGN_KEY_CHECKS.to_string()];

        for table in tables.iter_mut() {
            if table.temp_name.as_deref().map_or(true, str::is_empty) {
                table.temp_name = Some(new_temp_name());
            }
        }

        let names: Vec<(String, String)> = tables
            .iter()
            .map(|t| (t.name.clone(), t.temp_name.clone().unwrap_or_default()))
            .collect();

        for table in tables.iter() {
            let temp_name = table.temp_name.as_deref().unwrap_or_default();
            let mut create = table
                .create_table
                .replace(&quote_identifier(&table.name), &quote_identifier(temp_name));

            for (other, other_temp) in &names {
                if *other == table.name {
                    continue;
                }
                let quoted = quote_identifier(other);
                if table.create_table.contains(&quoted) {
                    create = create.replace(&quoted, &quote_identifier(other_temp));
                }
            }

            statements.push(Self::adapt(&create, target_sql_version));
        }

        statements
    }

    /// 随机化约束与索引名，并按目标版本降级排序规则
    pub fn adapt(create: &str, target_sql_version: &str) -> String {
        let create = CONSTRAINT_NAME.replace_all(create, |_: &regex::Captures| {
            format!("CONSTRAINT `{}`", unique_id())
        });
        let create = KEY_NAME.replace_all(&create, |_: &regex::Captures| {
            format!("KEY `{}`", unique_id())
        });
        let mut create = create.into_owned();

        if create.to_lowercase().contains("utf8mb4_0900_ai_ci") && version_lt(target_sql_version, "8") {
            create = create.replace("utf8mb4_0900_ai_ci", "utf8mb4_unicode_520_ci");
        }

        let is_mysql_55 = !version_lt(target_sql_version, "5.5") && version_lt(target_sql_version, "5.6");
        let is_mariadb_101 =
            !version_lt(target_sql_version, "10.1") && version_lt(target_sql_version, "10.2");
        if is_mysql_55 || is_mariadb_101 {
            create = create.replace("utf8mb4_unicode_520_ci", "utf8mb4_unicode_ci");
        }

        create
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, create: &str) -> Table {
        Table {
            name: name.into(),
            create_table: create.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_rewrites_references() {
        let mut tables = vec![
            table("wp_orders", "CREATE TABLE `wp_orders` (`id` int, CONSTRAINT `fk_user` FOREIGN KEY (`user_id`) REFERENCES `wp_users` (`ID`))"),
            table("wp_users", "CREATE TABLE `wp_users` (`ID` bigint, PRIMARY KEY (`ID`), KEY `user_login_key` (`user_login`))"),
        ];

        let statements = CreateTableGenerator::generate(&mut tables, "8.0.36");
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], DISABLE_FOREIGN_KEY_CHECKS);

        let orders_temp = tables[0].temp_name.clone().unwrap();
        let users_temp = tables[1].temp_name.clone().unwrap();
        assert!(orders_temp.starts_with(TMP_TABLE_PREFIX));
        assert_ne!(orders_temp, users_temp);

        assert!(statements[1].starts_with(&format!("CREATE TABLE `{}`", orders_temp)));
        assert!(statements[1].contains(&format!("REFERENCES `{}`", users_temp)));
        assert!(!statements[1].contains("fk_user"));
        assert!(!statements[2].contains("user_login_key"));
        assert!(statements[2].contains("PRIMARY KEY (`ID`)"));
    }

    #[test]
    fn test_existing_temp_names_kept() {
        let mut tables = vec![table("wp_posts", "CREATE TABLE `wp_posts` (`ID` int)")];
        tables[0].temp_name = Some("wpsyntmp_fixed".into());
        let statements = CreateTableGenerator::generate(&mut tables, "8.0");
        assert_eq!(statements[1], "CREATE TABLE `wpsyntmp_fixed` (`ID` int)");
    }

    #[test]
    fn test_collation_downgrades() {
        let create = "CREATE TABLE `t` (`a` text) COLLATE=utf8mb4_0900_ai_ci";
        assert!(CreateTableGenerator::adapt(create, "8.0.30").contains("utf8mb4_0900_ai_ci"));
        assert!(CreateTableGenerator::adapt(create, "5.7.40").contains("utf8mb4_unicode_520_ci"));
        assert!(CreateTableGenerator::adapt(create, "5.5.62").contains("COLLATE=utf8mb4_unicode_ci"));

        let create_520 = "CREATE TABLE `t` (`a` text) COLLATE=utf8mb4_unicode_520_ci";
        assert!(CreateTableGenerator::adapt(create_520, "10.1.48-MariaDB").contains("COLLATE=utf8mb4_unicode_ci"));
        assert!(CreateTableGenerator::adapt(create_520, "10.6.12-MariaDB").contains("utf8mb4_unicode_520_ci"));
    }

    #[test]
    fn test_prefix_change() {
        assert_eq!(handle_table_prefix_change("wp_posts", "wp_", "wpx_"), "wpx_posts");
        assert_eq!(handle_table_prefix_change("other_posts", "wp_", "wpx_"), "other_posts");
        assert_eq!(handle_table_prefix_change("wp_posts", "wp_", "wp_"), "wp_posts");
    }
}
