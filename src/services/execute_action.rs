//! 服务端: finalize 后的收尾动作

use crate::db::SiteStateRepository;
use crate::generators::select_sql::quote_identifier;
use crate::models::ExecuteActionRequest;
use crate::services::AppState;
use crate::utils::error::{AppError, Result};

pub const CLEAR_CACHES: &str = "clearcaches";
pub const CLEAR_TRANSFER_TOKEN: &str = "cleartransfertoken";

/// 依次执行请求的动作；transient 总是被清理
pub async fn execute(state: &AppState, request: &ExecuteActionRequest) -> Result<()> {
    let options = quote_identifier(&state.settings.options_table());
    let mut statements = Vec::new();

    for action in &request.actions {
        match action.as_str() {
            CLEAR_CACHES => {
                statements.push(format!("DELETE FROM {} WHERE option_name = 'rewrite_rules'", options));
            }
            CLEAR_TRANSFER_TOKEN => {}
            other => tracing::warn!("Ignoring unknown finalize action: {}", other),
        }
    }
    statements.push(format!(r"DELETE FROM {} WHERE option_name LIKE '\_transient\_%'", options));
    statements.push(format!(r"DELETE FROM {} WHERE option_name LIKE '\_site\_transient\_%'", options));

    let outcome = state.database.execute(&statements, false).await?;
    if !outcome.failures.is_empty() {
        return Err(AppError::Unknown(format!(
            "Could not clear caches: {}",
            outcome.user_errors().join(", ")
        )));
    }
    tracing::info!("Executed {} cache clearing statements", outcome.executed);

    if request.actions.iter().any(|a| a == CLEAR_TRANSFER_TOKEN) {
        SiteStateRepository::new(state.store.as_ref()).clear_transfer_token().await?;
        tracing::info!("Cleared transfer token");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use crate::models::Direction;
    use crate::services::initiate;
    use crate::services::testing::{option_row, TwoSites, OPTIONS_CREATE};
    use std::sync::Arc;

    fn actions(names: &[&str]) -> ExecuteActionRequest {
        ExecuteActionRequest {
            actions: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_clear_caches_and_transients() {
        let sites = TwoSites::new(Direction::Pull).await;
        let database = Arc::new(MemoryDatabase::new());
        database.add_table(OPTIONS_CREATE, vec![
            option_row(1, "siteurl", "https://x.example"),
            option_row(2, "rewrite_rules", "a:0:{}"),
            option_row(3, "_transient_doing_cron", "1"),
            option_row(4, "_site_transient_update_core", "a:0:{}"),
            option_row(5, "my_transient_setting", "keep"),
        ]);
        let mut state = sites.target.state.clone();
        state.database = database.clone();

        execute(&state, &actions(&[CLEAR_CACHES])).await.unwrap();

        let names = database.column_values("wp_options", "option_name");
        assert_eq!(
            names,
            vec![Some("siteurl".to_string()), Some("my_transient_setting".to_string())]
        );
    }

    #[tokio::test]
    async fn test_clear_transfer_token() {
        let sites = TwoSites::new(Direction::Pull).await;
        let state = &sites.source.state;
        let token = initiate::issue_token(state, "pull").await.unwrap();
        let presented = crate::utils::crypto::token_hash(&token, &sites.source.access_key().await);
        let repo = SiteStateRepository::new(state.store.as_ref());
        assert!(repo.validate_transfer_token(&presented).await.unwrap());

        execute(state, &actions(&[CLEAR_TRANSFER_TOKEN])).await.unwrap();

        assert!(!repo.validate_transfer_token(&presented).await.unwrap());
        // 没有 clearcaches 时不动 rewrite_rules
        assert!(sites
            .source
            .database
            .executed()
            .iter()
            .all(|s| !s.contains("rewrite_rules")));
    }

    #[tokio::test]
    async fn test_sql_failure_is_reported() {
        let sites = TwoSites::new(Direction::Pull).await;
        sites.target.database.fail_statements_containing("transient");

        let result = execute(&sites.target.state, &actions(&[CLEAR_CACHES])).await;
        assert!(matches!(result, Err(AppError::Unknown(_))));
    }
}
