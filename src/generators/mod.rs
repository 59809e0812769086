pub mod create_table;
pub mod insert_sql;
pub mod select_sql;

pub use create_table::CreateTableGenerator;
pub use insert_sql::InsertGenerator;
pub use select_sql::{ChunkQuery, ChunkQueryGenerator};
