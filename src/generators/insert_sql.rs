use crate::generators::select_sql::quote_identifier;
use crate::models::{ColumnKind, Row, SearchReplace, Table};
use crate::utils::serialized::{is_serialized, replace_bytes, RewriteAbort, SerializedRewriter};

/// 单条 INSERT 最多包含的行数
pub const MAX_ROWS_PER_INSERT: usize = 998;

/// 不做查找替换的列
const SEARCH_REPLACE_EXEMPT_COLUMN: &str = "guid";

/// 与 mysqli_real_escape_string 相同的转义
pub fn escape_bytes(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + value.len() / 8);
    for &b in value {
        match b {
            0 => out.extend_from_slice(b"\\0"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\'' => out.extend_from_slice(b"\\'"),
            b'"' => out.extend_from_slice(b"\\\""),
            0x1a => out.extend_from_slice(b"\\Z"),
            other => out.push(other),
        }
    }
    out
}

/// 带引号的字符串字面量，非 UTF-8 内容输出为十六进制字面量
pub fn quote_bytes(value: &[u8]) -> String {
    match String::from_utf8(escape_bytes(value)) {
        Ok(escaped) => format!("'{}'", escaped),
        Err(_) => format!("0x{}", hex::encode(value)),
    }
}

/// 对一个字符串值执行查找替换。
///
/// 序列化数据按长度前缀安全改写，失败时保留原值并返回中止信息。
pub fn handle_search_replace(
    data: &mut Vec<u8>,
    replaces: &[SearchReplace],
    rewriter: &SerializedRewriter,
) -> Option<RewriteAbort> {
    if replaces.is_empty() {
        return None;
    }

    if is_serialized(data) {
        return rewriter.rewrite(data, replaces).err();
    }

    for sr in replaces {
        let (replaced, count) = replace_bytes(data, sr.from.as_bytes(), sr.to.as_bytes());
        if count > 0 {
            *data = replaced;
        }
    }
    None
}

/// bit 列读出的是十进制数字，输出为 b'<二进制>'
fn bit_literal(value: &[u8]) -> String {
    let decimal = String::from_utf8_lossy(value);
    let number: u64 = decimal.trim().parse().unwrap_or(0);
    format!("b'{:b}'", number)
}

/// 生成 INSERT 的结果
#[derive(Debug, Default)]
pub struct InsertOutput {
    pub statements: Vec<String>,
    pub warnings: Vec<String>,
    /// 序列化数据改写失败，值保持原样
    pub serialized_failures: Vec<RewriteAbort>,
    pub rows_skipped: usize,
}

/// INSERT 语句生成器
pub struct InsertGenerator<'a> {
    table: &'a Table,
    /// 写入的目标表名 (临时表或备份时的原表名)
    target_table: &'a str,
    column_names: &'a [String],
    search_replaces: &'a [SearchReplace],
    max_packet_bytes: u64,
    max_memory_bytes: u64,
    rewriter: SerializedRewriter,
}

impl<'a> InsertGenerator<'a> {
    pub fn new(
        table: &'a Table,
        target_table: &'a str,
        column_names: &'a [String],
        max_packet_bytes: u64,
        max_memory_bytes: u64,
    ) -> Self {
        Self {
            table,
            target_table,
            column_names,
            search_replaces: &[],
            max_packet_bytes: if max_packet_bytes == 0 { u64::MAX } else { max_packet_bytes },
            max_memory_bytes: if max_memory_bytes == 0 { u64::MAX } else { max_memory_bytes },
            rewriter: SerializedRewriter::default(),
        }
    }

    pub fn with_search_replaces(mut self, search_replaces: &'a [SearchReplace]) -> Self {
        self.search_replaces = search_replaces;
        self
    }

    pub fn with_rewriter(mut self, rewriter: SerializedRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// 生成成批的 INSERT 语句，`rows` 的列顺序与 `column_names` 一致
    pub fn generate(&self, rows: Vec<Row>) -> InsertOutput {
        let mut output = InsertOutput::default();

        let kept: Vec<(usize, &String, ColumnKind)> = self
            .column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (i, name, self.table.kind_of(name)))
            .filter(|(_, _, kind)| *kind != ColumnKind::Generated)
            .collect();
        if kept.is_empty() {
            return output;
        }

        let prefix = format!(
            "INSERT INTO {} ({}) VALUES ",
            quote_identifier(self.target_table),
            kept.iter()
                .map(|(_, name, _)| quote_identifier(name))
                .collect::<Vec<_>>()
                .join(",")
        );

        let mut buffer = String::new();
        let mut buffer_len: u64 = 0;
        let mut count = 0usize;

        for mut row in rows {
            let fragment = match self.row_fragment(&mut row, &kept, &mut output) {
                Some(fragment) => fragment,
                None => {
                    output.rows_skipped += 1;
                    continue;
                }
            };
            let fragment_len = fragment.len() as u64;

            if fragment_len > self.max_packet_bytes {
                output.warnings.push(format!(
                    "Large row ignored from table: {} - Size: {} - This happens when a table row is larger than your system limits allows. These limits are a combination of max SQL packet size, memory limits and max post size on both ends of the migration.",
                    self.table.name, fragment_len
                ));
                output.rows_skipped += 1;
                continue;
            }

            if count > 0
                && (buffer_len + fragment_len >= self.max_packet_bytes || count >= MAX_ROWS_PER_INSERT)
            {
                output.statements.push(finish_statement(&buffer));
                buffer.clear();
                count = 0;
            }

            if count == 0 {
                buffer.push_str(&prefix);
                buffer_len = prefix.len() as u64;
            }
            buffer.push_str(&fragment);
            buffer_len += fragment_len;
            count += 1;
        }

        if count > 0 {
            output.statements.push(finish_statement(&buffer));
        }
        output
    }

    /// 单行的 `(...),` 片段，需要跳过该行时返回 None
    fn row_fragment(
        &self,
        row: &mut Row,
        kept: &[(usize, &String, ColumnKind)],
        output: &mut InsertOutput,
    ) -> Option<String> {
        let mut values = Vec::with_capacity(kept.len());

        for (index, name, kind) in kept {
            let value = match row.get_mut(*index).and_then(|v| v.0.as_mut()) {
                Some(value) => value,
                None => {
                    values.push("NULL".to_string());
                    continue;
                }
            };

            let encoded = match kind {
                ColumnKind::String => {
                    if name.as_str() != SEARCH_REPLACE_EXEMPT_COLUMN {
                        if let Some(abort) =
                            handle_search_replace(value, self.search_replaces, &self.rewriter)
                        {
                            output.serialized_failures.push(abort);
                        }
                    }
                    quote_bytes(value)
                }
                ColumnKind::Numeric => {
                    if value.iter().any(|b| *b == b'e' || *b == b'E') {
                        quote_bytes(value)
                    } else {
                        String::from_utf8_lossy(&escape_bytes(value)).into_owned()
                    }
                }
                ColumnKind::Binary => {
                    let expected = value.len() as u64 * 2;
                    if expected > self.max_memory_bytes {
                        output.warnings.push(format!(
                            "Large row with binary column ignored from table: {} - Size of value: {} - Max size {} bytes - Increase memory limit on server",
                            self.table.name,
                            value.len(),
                            self.max_memory_bytes
                        ));
                        return None;
                    }
                    if value.is_empty() {
                        "NULL".to_string()
                    } else {
                        format!("0x{}", hex::encode(value.as_slice()))
                    }
                }
                ColumnKind::Bit => bit_literal(value),
                ColumnKind::Unknown => quote_bytes(value),
                ColumnKind::Generated => continue,
            };
            values.push(encoded);
        }

        Some(format!("({}),", values.join(",")))
    }
}

fn finish_statement(buffer: &str) -> String {
    buffer.trim_end_matches([',', ' ']).to_string()
}
