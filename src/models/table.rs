use serde::{Deserialize, Serialize};

/// 临时表前缀
pub const TMP_TABLE_PREFIX: &str = "wpsyntmp_";

/// 列的编码分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColumnKind {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "numeric")]
    Numeric,
    #[serde(rename = "binary")]
    Binary,
    #[serde(rename = "bit")]
    Bit,
    #[serde(rename = "generated")]
    Generated,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ColumnKind {
    /// 根据 DATA_TYPE 与 EXTRA 分类
    pub fn classify(data_type: &str, extra: &str) -> Self {
        let extra = extra.to_lowercase();
        if extra.contains("generated") {
            return ColumnKind::Generated;
        }

        match data_type.to_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "decimal"
            | "numeric" | "float" | "double" | "real" => ColumnKind::Numeric,
            "bit" => ColumnKind::Bit,
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob"
            | "geometry" | "point" | "linestring" | "polygon" | "multipoint"
            | "multilinestring" | "multipolygon" | "geometrycollection" => ColumnKind::Binary,
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "enum"
            | "set" | "date" | "datetime" | "timestamp" | "time" | "year" | "json" => {
                ColumnKind::String
            }
            _ => ColumnKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    /// 原始 DATA_TYPE，如 varchar、json
    pub data_type: String,
    pub kind: ColumnKind,
}

/// 迁移中的表 (masterdata + 传输游标)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Table {
    pub name: String,
    /// 目标端的临时表名
    pub temp_name: Option<String>,
    pub rows: u64,
    pub row_avg_bytes: u64,
    pub data_total_bytes: u64,
    /// 单列整数主键，其它情况按偏移量分页
    pub primary_key_column: Option<String>,
    pub columns: Vec<TableColumn>,
    pub create_table: String,
    pub is_view: bool,

    pub completed_rows: u64,
    pub last_primary_key: Option<i64>,
    pub is_completed: bool,
}

impl Table {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// 需要按数值读取的 bit 列
    pub fn bit_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Bit)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn kind_of(&self, column: &str) -> ColumnKind {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.kind)
            .unwrap_or(ColumnKind::Unknown)
    }

    pub fn uses_column_type(&self, data_type: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.data_type.eq_ignore_ascii_case(data_type))
    }

    pub fn is_temp_table(&self) -> bool {
        self.name.starts_with(TMP_TABLE_PREFIX)
    }

    /// 首次请求的行数: 默认响应大小 / 平均行长，至少 2 行
    pub fn initial_rows_per_request(&self, default_response_size: u64) -> u64 {
        let avg = self.row_avg_bytes.max(1);
        (default_response_size / avg).max(2)
    }
}

/// 表名与行数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    pub rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_columns() {
        assert_eq!(ColumnKind::classify("bigint", "auto_increment"), ColumnKind::Numeric);
        assert_eq!(ColumnKind::classify("LONGTEXT", ""), ColumnKind::String);
        assert_eq!(ColumnKind::classify("varbinary", ""), ColumnKind::Binary);
        assert_eq!(ColumnKind::classify("bit", ""), ColumnKind::Bit);
        assert_eq!(ColumnKind::classify("int", "VIRTUAL GENERATED"), ColumnKind::Generated);
        assert_eq!(ColumnKind::classify("vector", ""), ColumnKind::Unknown);
    }

    #[test]
    fn test_initial_rows_per_request() {
        let mut table = Table {
            row_avg_bytes: 1000,
            ..Default::default()
        };
        assert_eq!(table.initial_rows_per_request(125_000), 125);

        table.row_avg_bytes = 100_000;
        assert_eq!(table.initial_rows_per_request(125_000), 2);

        table.row_avg_bytes = 0;
        assert_eq!(table.initial_rows_per_request(125_000), 125_000);
    }

    #[test]
    fn test_uses_column_type() {
        let table = Table {
            columns: vec![TableColumn {
                name: "doc".into(),
                data_type: "JSON".into(),
                kind: ColumnKind::String,
            }],
            ..Default::default()
        };
        assert!(table.uses_column_type("json"));
        assert!(!table.uses_column_type("blob"));
    }
}
