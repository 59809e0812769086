//! 键值 option 存储
//!
//! Job、Migration 以及站点状态都以 JSON 文本的形式保存在这里。

use crate::db::schema::OPTIONS_TABLE;
use crate::utils::error::Result;
use async_trait::async_trait;
use sqlx::MySqlPool;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[async_trait]
pub trait OptionStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>>;
    async fn set(&self, name: &str, value: &str) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    /// 删除所有以 prefix 开头的键，返回删除数量
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
    /// 列出以 prefix 开头的键
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// MySQL 实现
pub struct MySqlOptionStore {
    pool: MySqlPool,
}

impl MySqlOptionStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// LIKE 模式转义
fn like_prefix(prefix: &str) -> String {
    let escaped = prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{}%", escaped)
}

#[async_trait]
impl OptionStore for MySqlOptionStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(&format!(
            "SELECT option_value FROM {} WHERE option_name = ?",
            OPTIONS_TABLE
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (option_name, option_value) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE option_value = VALUES(option_value)",
            OPTIONS_TABLE
        ))
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE option_name = ?",
            OPTIONS_TABLE
        ))
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE option_name LIKE ?",
            OPTIONS_TABLE
        ))
        .bind(like_prefix(prefix))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT option_name FROM {} WHERE option_name LIKE ? ORDER BY option_name",
            OPTIONS_TABLE
        ))
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }
}

/// 内存实现
#[derive(Default)]
pub struct MemoryOptionStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryOptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl OptionStore for MemoryOptionStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock().get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        self.lock().insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.lock().remove(name);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut values = self.lock();
        let before = values.len();
        values.retain(|key, _| !key.starts_with(prefix));
        Ok((before - values.len()) as u64)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("wpsynchro_m1_"), "wpsynchro\\_m1\\_%");
        assert_eq!(like_prefix("50%"), "50\\%%");
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryOptionStore::new();
        store.set("wpsynchro_a_1", "one").await.unwrap();
        store.set("wpsynchro_a_2", "two").await.unwrap();
        store.set("wpsynchro_b_1", "three").await.unwrap();

        assert_eq!(store.get("wpsynchro_a_1").await.unwrap().as_deref(), Some("one"));
        assert_eq!(store.keys_with_prefix("wpsynchro_a_").await.unwrap().len(), 2);
        assert_eq!(store.delete_prefix("wpsynchro_a_").await.unwrap(), 2);
        assert!(store.get("wpsynchro_a_2").await.unwrap().is_none());

        store.delete("wpsynchro_b_1").await.unwrap();
        assert!(store.keys_with_prefix("wpsynchro_").await.unwrap().is_empty());
    }
}
