//! 测试用的内存数据库，只理解迁移流程会生成的那几类语句

use crate::db::backend::{DatabaseBackend, ExecuteOutcome, FetchedRow, ServerDetails, SqlFailure};
use crate::generators::select_sql::ChunkQuery;
use crate::models::{ColumnKind, Row, RowValue, Table, TableColumn, TableSummary};
use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Mutex;

type Value = Option<Vec<u8>>;

static CREATE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^CREATE TABLE `([^`]+)`\s*\((.*)\)[^)]*$").expect("create table"));
static CREATE_VIEW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^CREATE\b.*?\bVIEW `([^`]+)`").expect("create view"));
static DROP_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DROP TABLE IF EXISTS `([^`]+)`$").expect("drop table"));
static DROP_VIEW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DROP VIEW IF EXISTS `([^`]+)`$").expect("drop view"));
static RENAME_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^RENAME TABLE `([^`]+)` TO `([^`]+)`$").expect("rename"));
static INSERT_VALUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^INSERT INTO `([^`]+)` \(([^)]*)\) VALUES (.*)$").expect("insert values")
});
static INSERT_SELECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^INSERT INTO `([^`]+)` \(([^)]*)\) SELECT ([^ ]+) FROM `?([^`\s]+)`? WHERE (\w+) (=|LIKE) '(.*)'$")
        .expect("insert select")
});
static DELETE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^DELETE FROM\s+`([^`]+)`\s+WHERE (\w+) (=|LIKE) '(.*)'$").expect("delete")
});
static UPDATE_REPLACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^UPDATE `([^`]+)` SET (\w+) = REPLACE\(\w+, '(.*)', '(.*)'\) WHERE (\w+) LIKE '(.*)'$")
        .expect("update replace")
});

struct MemTable {
    meta: Table,
    rows: Vec<Vec<Value>>,
}

#[derive(Default)]
struct MemState {
    tables: BTreeMap<String, MemTable>,
    views: BTreeMap<String, String>,
    executed: Vec<String>,
    fail_on: Option<String>,
}

/// 内存中的 DatabaseBackend
pub struct MemoryDatabase {
    version: String,
    max_allowed_packet: u64,
    state: Mutex<MemState>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self {
            version: "8.0.36".to_string(),
            max_allowed_packet: 16 * 1024 * 1024,
            state: Mutex::new(MemState::default()),
        }
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(version: &str, max_allowed_packet: u64) -> Self {
        Self {
            version: version.to_string(),
            max_allowed_packet,
            ..Self::default()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 通过建表语句建表并写入行
    pub fn add_table(&self, create: &str, rows: Vec<Row>) {
        let mut state = self.lock();
        let name = create_table(&mut state, create).expect("valid create statement");
        if let Some(table) = state.tables.get_mut(&name) {
            table.rows = rows
                .into_iter()
                .map(|row| row.into_iter().map(|v| v.0).collect())
                .collect();
        }
    }

    pub fn add_view(&self, name: &str, create: &str) {
        self.lock().views.insert(name.to_string(), create.to_string());
    }

    /// 包含该片段的语句执行失败
    pub fn fail_statements_containing(&self, fragment: &str) {
        self.lock().fail_on = Some(fragment.to_string());
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    pub fn view_names(&self) -> Vec<String> {
        self.lock().views.keys().cloned().collect()
    }

    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.lock().tables.get(table).map(|t| {
            t.rows
                .iter()
                .map(|row| row.iter().cloned().map(RowValue).collect())
                .collect()
        })
    }

    /// 某列的所有值 (UTF-8 文本)
    pub fn column_values(&self, table: &str, column: &str) -> Vec<Option<String>> {
        let state = self.lock();
        let Some(t) = state.tables.get(table) else {
            return Vec::new();
        };
        let Some(index) = t.meta.columns.iter().position(|c| c.name == column) else {
            return Vec::new();
        };
        t.rows
            .iter()
            .map(|row| row[index].as_ref().map(|v| String::from_utf8_lossy(v).into_owned()))
            .collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }
}

fn column_index(table: &MemTable, column: &str) -> std::result::Result<usize, String> {
    table
        .meta
        .columns
        .iter()
        .position(|c| c.name == column)
        .ok_or_else(|| format!("Unknown column '{}' in '{}'", column, table.meta.name))
}

fn missing_table(name: &str) -> String {
    format!("Table '{}' doesn't exist", name)
}

/// 按最外层逗号拆分
fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in body.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '`' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(current.trim().to_string());
                    current.clear();
                    continue;
                }
                _ => {}
            },
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn strip_backticks(name: &str) -> String {
    name.trim().trim_matches('`').to_string()
}

fn create_table(state: &mut MemState, statement: &str) -> std::result::Result<String, String> {
    let caps = CREATE_TABLE
        .captures(statement)
        .ok_or_else(|| format!("Unsupported create statement: {}", statement))?;
    let name = caps[1].to_string();
    if state.tables.contains_key(&name) {
        return Err(format!("Table '{}' already exists", name));
    }

    let mut columns = Vec::new();
    let mut pk: Vec<String> = Vec::new();
    for part in split_top_level(&caps[2]) {
        if let Some(rest) = part.strip_prefix('`') {
            let end = rest.find('`').unwrap_or(rest.len());
            let column_name = rest[..end].to_string();
            let definition = rest[end..].trim_start_matches('`').trim();
            let data_type: String = definition
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or_default()
                .to_lowercase();
            let extra = if definition.to_uppercase().contains("GENERATED") {
                "VIRTUAL GENERATED"
            } else {
                ""
            };
            columns.push(TableColumn {
                name: column_name,
                kind: ColumnKind::classify(&data_type, extra),
                data_type,
            });
        } else if let Some(rest) = part.strip_prefix("PRIMARY KEY") {
            let inner = rest.trim().trim_start_matches('(').trim_end_matches(')');
            pk = inner.split(',').map(strip_backticks).collect();
        }
    }

    let primary_key_column = match pk.as_slice() {
        [single] => columns
            .iter()
            .find(|c| &c.name == single && c.kind == ColumnKind::Numeric)
            .map(|c| c.name.clone()),
        _ => None,
    };

    state.tables.insert(
        name.clone(),
        MemTable {
            meta: Table {
                name: name.clone(),
                columns,
                primary_key_column,
                create_table: statement.to_string(),
                ..Default::default()
            },
            rows: Vec::new(),
        },
    );
    Ok(name)
}

fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() {
            out.push(match raw[i + 1] {
                b'0' => 0,
                b'n' => b'\n',
                b'r' => b'\r',
                b'Z' => 0x1a,
                other => other,
            });
            i += 2;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// LIKE 模式的字符串层反转义，保留 \_ 与 \%
fn unescape_like(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() && matches!(raw[i + 1], b'_' | b'%') {
            out.extend_from_slice(&raw[i..i + 2]);
            i += 2;
        } else if raw[i] == b'\\' && i + 1 < raw.len() {
            out.extend(unescape(&raw[i..i + 2]));
            i += 2;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// 解析 `(...),(...)` 形式的值列表
fn parse_tuples(input: &[u8]) -> std::result::Result<Vec<Vec<Value>>, String> {
    let mut tuples = Vec::new();
    let mut i = 0;
    let skip_ws = |i: &mut usize| {
        while *i < input.len() && input[*i].is_ascii_whitespace() {
            *i += 1;
        }
    };

    loop {
        skip_ws(&mut i);
        if i >= input.len() {
            break;
        }
        if input[i] != b'(' {
            return Err(format!("Syntax error near position {}", i));
        }
        i += 1;
        let mut values = Vec::new();
        loop {
            skip_ws(&mut i);
            if i >= input.len() {
                return Err("Unterminated value list".to_string());
            }
            if input[i] == b'\'' {
                let start = i + 1;
                let mut j = start;
                while j < input.len() && input[j] != b'\'' {
                    if input[j] == b'\\' {
                        j += 1;
                    }
                    j += 1;
                }
                values.push(Some(unescape(&input[start..j.min(input.len())])));
                i = j + 1;
            } else if input[i..].starts_with(b"b'") {
                let start = i + 2;
                let end = start + input[start..].iter().position(|c| *c == b'\'').unwrap_or(0);
                let bits = std::str::from_utf8(&input[start..end]).unwrap_or("0");
                let number = u64::from_str_radix(bits, 2).map_err(|e| e.to_string())?;
                values.push(Some(number.to_string().into_bytes()));
                i = end + 1;
            } else {
                let start = i;
                while i < input.len() && input[i] != b',' && input[i] != b')' {
                    i += 1;
                }
                let token = std::str::from_utf8(&input[start..i]).map_err(|e| e.to_string())?.trim();
                if token.eq_ignore_ascii_case("NULL") {
                    values.push(None);
                } else if let Some(hex_digits) = token.strip_prefix("0x") {
                    values.push(Some(hex::decode(hex_digits).map_err(|e| e.to_string())?));
                } else {
                    values.push(Some(token.as_bytes().to_vec()));
                }
            }

            skip_ws(&mut i);
            match input.get(i) {
                Some(b',') => i += 1,
                Some(b')') => {
                    i += 1;
                    break;
                }
                _ => return Err("Malformed value list".to_string()),
            }
        }
        tuples.push(values);

        skip_ws(&mut i);
        if input.get(i) == Some(&b',') {
            i += 1;
        }
    }
    Ok(tuples)
}

/// SQL LIKE，支持 % _ 与反斜杠转义
fn like_match(value: &[u8], pattern: &[u8]) -> bool {
    match pattern.first() {
        None => value.is_empty(),
        Some(b'%') => (0..=value.len()).any(|skip| like_match(&value[skip..], &pattern[1..])),
        Some(b'_') => !value.is_empty() && like_match(&value[1..], &pattern[1..]),
        Some(b'\\') if pattern.len() > 1 => {
            value.first() == Some(&pattern[1]) && like_match(&value[1..], &pattern[2..])
        }
        Some(c) => value.first() == Some(c) && like_match(&value[1..], &pattern[1..]),
    }
}

fn matches_where(value: &Value, op: &str, literal: &str) -> bool {
    let Some(value) = value else { return false };
    if op == "LIKE" {
        like_match(value, &unescape_like(literal.as_bytes()))
    } else {
        *value == unescape(literal.as_bytes())
    }
}

fn column_list(raw: &str) -> Vec<String> {
    raw.split(',').map(strip_backticks).filter(|c| !c.is_empty()).collect()
}

fn apply(state: &mut MemState, statement: &str) -> std::result::Result<(), String> {
    let statement = statement.trim().trim_end_matches(';');

    if statement.starts_with("SET ") {
        return Ok(());
    }

    if statement.starts_with("CREATE TABLE") {
        return create_table(state, statement).map(|_| ());
    }

    if let Some(caps) = CREATE_VIEW.captures(statement) {
        let name = caps[1].to_string();
        if state.views.contains_key(&name) || state.tables.contains_key(&name) {
            return Err(format!("Table '{}' already exists", name));
        }
        state.views.insert(name, statement.to_string());
        return Ok(());
    }

    if let Some(caps) = DROP_TABLE.captures(statement) {
        state.tables.remove(&caps[1]);
        return Ok(());
    }

    if let Some(caps) = DROP_VIEW.captures(statement) {
        state.views.remove(&caps[1]);
        return Ok(());
    }

    if let Some(caps) = RENAME_TABLE.captures(statement) {
        let (from, to) = (caps[1].to_string(), caps[2].to_string());
        if state.tables.contains_key(&to) {
            return Err(format!("Table '{}' already exists", to));
        }
        let mut table = state.tables.remove(&from).ok_or_else(|| missing_table(&from))?;
        table.meta.name = to.clone();
        state.tables.insert(to, table);
        return Ok(());
    }

    if let Some(caps) = INSERT_SELECT.captures(statement) {
        let target_columns = column_list(&caps[2]);
        let source_columns = column_list(&caps[3]);
        let (where_column, op, literal) = (&caps[5], &caps[6], &caps[7]);

        let source = state.tables.get(&caps[4]).ok_or_else(|| missing_table(&caps[4]))?;
        let where_index = column_index(source, where_column)?;
        let source_indexes = source_columns
            .iter()
            .map(|c| column_index(source, c))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let selected: Vec<Vec<Value>> = source
            .rows
            .iter()
            .filter(|row| matches_where(&row[where_index], op, literal))
            .map(|row| source_indexes.iter().map(|i| row[*i].clone()).collect())
            .collect();

        let target = state.tables.get_mut(&caps[1]).ok_or_else(|| missing_table(&caps[1]))?;
        insert_rows(target, &target_columns, selected)?;
        return Ok(());
    }

    if let Some(caps) = INSERT_VALUES.captures(statement) {
        let columns = column_list(&caps[2]);
        let tuples = parse_tuples(caps[3].as_bytes())?;
        let target = state.tables.get_mut(&caps[1]).ok_or_else(|| missing_table(&caps[1]))?;
        if tuples.iter().any(|t| t.len() != columns.len()) {
            return Err("Column count doesn't match value count".to_string());
        }
        insert_rows(target, &columns, tuples)?;
        return Ok(());
    }

    if let Some(caps) = DELETE.captures(statement) {
        let table = state.tables.get_mut(&caps[1]).ok_or_else(|| missing_table(&caps[1]))?;
        let index = column_index(table, &caps[2])?;
        let (op, literal) = (caps[3].to_string(), caps[4].to_string());
        table.rows.retain(|row| !matches_where(&row[index], &op, &literal));
        return Ok(());
    }

    if let Some(caps) = UPDATE_REPLACE.captures(statement) {
        let table = state.tables.get_mut(&caps[1]).ok_or_else(|| missing_table(&caps[1]))?;
        let set_index = column_index(table, &caps[2])?;
        let where_index = column_index(table, &caps[5])?;
        let from = unescape(caps[3].as_bytes());
        let to = unescape(caps[4].as_bytes());
        let pattern = caps[6].to_string();
        for row in table.rows.iter_mut() {
            if matches_where(&row[where_index], "LIKE", &pattern) {
                if let Some(value) = row[set_index].as_ref() {
                    let (replaced, _) = crate::utils::serialized::replace_bytes(value, &from, &to);
                    row[set_index] = Some(replaced);
                }
            }
        }
        return Ok(());
    }

    Err(format!("Unsupported statement: {}", statement))
}

fn insert_rows(
    table: &mut MemTable,
    columns: &[String],
    tuples: Vec<Vec<Value>>,
) -> std::result::Result<(), String> {
    let indexes = columns
        .iter()
        .map(|c| column_index(table, c))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let width = table.meta.columns.len();
    for tuple in tuples {
        let mut row: Vec<Value> = vec![None; width];
        for (value, index) in tuple.into_iter().zip(&indexes) {
            row[*index] = value;
        }
        table.rows.push(row);
    }
    Ok(())
}

fn char_length(value: &Value) -> u64 {
    value
        .as_ref()
        .map(|v| String::from_utf8_lossy(v).chars().count() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl DatabaseBackend for MemoryDatabase {
    async fn server_details(&self) -> Result<ServerDetails> {
        Ok(ServerDetails {
            version: self.version.clone(),
            max_allowed_packet: self.max_allowed_packet,
        })
    }

    async fn tables(&self) -> Result<Vec<Table>> {
        let state = self.lock();
        let mut tables: Vec<Table> = state
            .tables
            .values()
            .map(|t| {
                let data_total: u64 = t.rows.iter().flatten().map(char_length).sum();
                let rows = t.rows.len() as u64;
                // 主键超出 i64 时改用偏移量分页
                let primary_key_column = t.meta.primary_key_column.clone().filter(|pk| {
                    column_index(t, pk).is_ok_and(|i| {
                        t.rows.iter().all(|row| {
                            row[i]
                                .as_ref()
                                .is_none_or(|v| String::from_utf8_lossy(v).parse::<i64>().is_ok())
                        })
                    })
                });
                Table {
                    rows,
                    data_total_bytes: data_total,
                    row_avg_bytes: if rows > 0 { data_total / rows } else { 0 },
                    primary_key_column,
                    ..t.meta.clone()
                }
            })
            .collect();
        tables.extend(state.views.iter().map(|(name, create)| Table {
            name: name.clone(),
            create_table: create.clone(),
            is_view: true,
            ..Default::default()
        }));
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    async fn table_summaries(&self, prefix: &str) -> Result<Vec<TableSummary>> {
        Ok(self
            .lock()
            .tables
            .values()
            .filter(|t| t.meta.name.starts_with(prefix))
            .map(|t| TableSummary {
                name: t.meta.name.clone(),
                rows: t.rows.len() as u64,
            })
            .collect())
    }

    async fn fetch_chunk(&self, query: &ChunkQuery) -> Result<Vec<FetchedRow>> {
        let state = self.lock();
        let table = state
            .tables
            .get(&query.table)
            .ok_or_else(|| AppError::NotFound(missing_table(&query.table)))?;
        let indexes = query
            .column_names
            .iter()
            .map(|c| column_index(table, c))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(AppError::InvalidInput)?;

        let limit = query.limit.max(1) as usize;
        let candidates: Vec<(Option<i64>, &Vec<Value>)> = match &query.primary_key_column {
            Some(pk) => {
                let pk_index = column_index(table, pk).map_err(AppError::InvalidInput)?;
                let mut keyed: Vec<(Option<i64>, &Vec<Value>)> = table
                    .rows
                    .iter()
                    .map(|row| {
                        let key = row[pk_index]
                            .as_ref()
                            .and_then(|v| String::from_utf8_lossy(v).parse::<i64>().ok());
                        (key, row)
                    })
                    .filter(|(key, _)| match (key, query.last_primary_key) {
                        (Some(key), Some(last)) => *key > last,
                        (Some(_), None) => true,
                        (None, _) => false,
                    })
                    .collect();
                keyed.sort_by_key(|(key, _)| *key);
                keyed.into_iter().take(limit).collect()
            }
            None => {
                let mut ordered: Vec<&Vec<Value>> = table.rows.iter().collect();
                ordered.sort_by(|a, b| {
                    let a: Vec<&Value> = indexes.iter().map(|i| &a[*i]).collect();
                    let b: Vec<&Value> = indexes.iter().map(|i| &b[*i]).collect();
                    a.cmp(&b)
                });
                ordered
                    .into_iter()
                    .skip(query.offset as usize)
                    .take(limit)
                    .map(|row| (None, row))
                    .collect()
            }
        };

        let mut total = 0u64;
        let mut fetched = Vec::new();
        for (key, row) in candidates {
            if total >= query.remaining_bytes {
                break;
            }
            let values: Row = indexes.iter().map(|i| RowValue(row[*i].clone())).collect();
            total += indexes.iter().map(|i| char_length(&row[*i])).sum::<u64>();
            fetched.push(FetchedRow {
                values,
                primary_key: key,
                running_total: total,
            });
        }
        Ok(fetched)
    }

    async fn execute(&self, statements: &[String], stop_on_error: bool) -> Result<ExecuteOutcome> {
        let mut state = self.lock();
        let mut outcome = ExecuteOutcome::default();
        for statement in statements {
            state.executed.push(statement.clone());
            let forced = state
                .fail_on
                .as_deref()
                .is_some_and(|fragment| statement.contains(fragment));
            let result = if forced {
                Err("Simulated failure".to_string())
            } else {
                apply(&mut state, statement)
            };
            match result {
                Ok(()) => outcome.executed += 1,
                Err(error) => {
                    outcome.failures.push(SqlFailure {
                        error,
                        statement: statement.clone(),
                    });
                    if stop_on_error {
                        break;
                    }
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: &str = "CREATE TABLE `wp_options` (\n  `option_id` bigint unsigned NOT NULL AUTO_INCREMENT,\n  `option_name` varchar(191) NOT NULL DEFAULT '',\n  `option_value` longtext NOT NULL,\n  PRIMARY KEY (`option_id`)\n) ENGINE=InnoDB";

    fn option(id: i64, name: &str, value: &str) -> Row {
        vec![
            RowValue::bytes(id.to_string().into_bytes()),
            RowValue::bytes(name.as_bytes().to_vec()),
            RowValue::bytes(value.as_bytes().to_vec()),
        ]
    }

    #[tokio::test]
    async fn test_create_insert_rename() {
        let db = MemoryDatabase::new();
        db.add_table(OPTIONS, vec![option(1, "home", "http://a")]);
        let tables = db.tables().await.unwrap();
        assert_eq!(tables[0].primary_key_column.as_deref(), Some("option_id"));
        assert_eq!(tables[0].rows, 1);

        let outcome = db
            .execute(
                &[
                    "CREATE TABLE `wpsyntmp_1` (`option_id` bigint, `option_name` varchar(191), `option_value` longtext, PRIMARY KEY (`option_id`))".to_string(),
                    "INSERT INTO `wpsyntmp_1` (`option_id`,`option_name`,`option_value`) VALUES (1,'home','it\\'s'),(2,'x',NULL)".to_string(),
                    "DROP TABLE IF EXISTS `wp_options`".to_string(),
                    "RENAME TABLE `wpsyntmp_1` TO `wp_options`".to_string(),
                ],
                true,
            )
            .await
            .unwrap();
        assert_eq!(outcome.executed, 4);
        assert_eq!(
            db.column_values("wp_options", "option_value"),
            vec![Some("it's".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_fetch_chunk_respects_cursor_and_size() {
        let db = MemoryDatabase::new();
        db.add_table(
            OPTIONS,
            (1..=5).map(|i| option(i, &format!("k{}", i), "0123456789")).collect(),
        );
        let query = ChunkQuery {
            table: "wp_options".into(),
            column_names: vec!["option_id".into(), "option_name".into(), "option_value".into()],
            primary_key_column: Some("option_id".into()),
            last_primary_key: Some(2),
            limit: 10,
            remaining_bytes: 20,
            ..Default::default()
        };
        let rows = db.fetch_chunk(&query).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].primary_key, Some(3));
        assert_eq!(rows[1].running_total, 26);
    }

    #[tokio::test]
    async fn test_unsigned_keys_above_signed_range_use_offset_paging() {
        let db = MemoryDatabase::new();
        let mut rows = vec![option(1, "home", "a"), option(2, "siteurl", "b")];
        rows.push(vec![
            RowValue::bytes(u64::MAX.to_string().into_bytes()),
            RowValue::bytes(b"huge".to_vec()),
            RowValue::bytes(b"c".to_vec()),
        ]);
        db.add_table(OPTIONS, rows);

        let tables = db.tables().await.unwrap();
        assert_eq!(tables[0].primary_key_column, None);

        let query = ChunkQuery {
            table: "wp_options".into(),
            column_names: vec!["option_id".into(), "option_name".into(), "option_value".into()],
            primary_key_column: None,
            limit: 10,
            remaining_bytes: 1000,
            ..Default::default()
        };
        let fetched = db.fetch_chunk(&query).await.unwrap();
        assert_eq!(fetched.len(), 3);
        assert!(fetched.iter().all(|row| row.primary_key.is_none()));
    }

    #[tokio::test]
    async fn test_statement_failure_stops() {
        let db = MemoryDatabase::new();
        let outcome = db
            .execute(
                &["INSERT INTO `missing` (`a`) VALUES (1)".to_string(), "SET x = 1".to_string()],
                true,
            )
            .await
            .unwrap();
        assert_eq!(outcome.executed, 0);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[test]
    fn test_like_match() {
        assert!(like_match(b"wpsynchro_license", br"wpsynchro\_%"));
        assert!(!like_match(b"wpsynchroXlicense", br"wpsynchro\_%"));
        assert!(like_match(b"abc", b"a_c"));
    }
}
