use crate::utils::error::{AppError, Result};

/// 结果集中主键列的别名
pub const PK_ALIAS: &str = "wpsynchro_pk";
/// 结果集中累计行长的别名
pub const ROW_LENGTH_ALIAS: &str = "wpsynchro_rowlength";

/// 标识符加反引号
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// 一次分块读取的参数
#[derive(Debug, Clone, Default)]
pub struct ChunkQuery {
    pub table: String,
    pub column_names: Vec<String>,
    pub bit_columns: Vec<String>,
    /// 有单列整数主键时按主键游标读取
    pub primary_key_column: Option<String>,
    pub last_primary_key: Option<i64>,
    /// 无主键时的偏移量
    pub offset: u64,
    pub limit: u64,
    /// 本块允许的累计字节数
    pub remaining_bytes: u64,
}

/// 分块读取语句生成器
pub struct ChunkQueryGenerator;

impl ChunkQueryGenerator {
    /// 生成分块 SELECT。
    ///
    /// 内层子查询按游标取 `limit` 行并把所有列转为二进制，外层用会话变量
    /// 累加每行的字符长度，累计值超过 `remaining_bytes` 的行不再返回。
    pub fn generate(query: &ChunkQuery) -> Result<String> {
        if query.column_names.is_empty() {
            return Err(AppError::SqlGeneration(format!(
                "Table {} has no columns to select",
                query.table
            )));
        }

        let table = quote_identifier(&query.table);
        let limit = query.limit.max(1);

        let select_columns: Vec<String> = query
            .column_names
            .iter()
            .map(|name| {
                let column = quote_identifier(name);
                if query.bit_columns.iter().any(|b| b == name) {
                    format!("CAST(CAST({} AS UNSIGNED) AS BINARY) AS {}", column, column)
                } else {
                    format!("CAST({} AS BINARY) AS {}", column, column)
                }
            })
            .collect();

        let length_sum = query
            .column_names
            .iter()
            .map(|name| format!("COALESCE(CHAR_LENGTH(t1.{}),0)", quote_identifier(name)))
            .collect::<Vec<_>>()
            .join("+");

        let inner = match &query.primary_key_column {
            Some(pk) => {
                let pk = quote_identifier(pk);
                let cursor = match query.last_primary_key {
                    Some(last) => format!(" WHERE {} > {}", pk, last),
                    None => String::new(),
                };
                format!(
                    "SELECT {}, CAST({} AS SIGNED) AS {} FROM {}{} ORDER BY {} LIMIT {}",
                    select_columns.join(", "),
                    pk,
                    PK_ALIAS,
                    table,
                    cursor,
                    pk,
                    limit
                )
            }
            None => {
                let order: Vec<String> =
                    query.column_names.iter().map(|c| quote_identifier(c)).collect();
                format!(
                    "SELECT {} FROM {} ORDER BY {} LIMIT {},{}",
                    select_columns.join(", "),
                    table,
                    order.join(","),
                    query.offset,
                    limit
                )
            }
        };

        let outer_order = if query.primary_key_column.is_some() {
            format!(" ORDER BY t1.{}", PK_ALIAS)
        } else {
            String::new()
        };

        Ok(format!(
            "SELECT t1.*, CAST(@total := @total + ({}) AS SIGNED) AS {} FROM ({}) AS t1 \
             JOIN (SELECT @total:=0) AS r WHERE @total < {}{}",
            length_sum,
            ROW_LENGTH_ALIAS,
            inner,
            query.remaining_bytes,
            outer_order
        ))
    }
}
