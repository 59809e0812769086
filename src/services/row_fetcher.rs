//! 源端分块读取行

use crate::db::DatabaseBackend;
use crate::generators::select_sql::ChunkQuery;
use crate::models::{row_size, FetchRowsRequest, FetchRowsResponse};
use crate::utils::error::Result;
use crate::utils::Timer;

/// 按游标读取行，直到达到响应大小、表读完或超过时间限制。
///
/// 累计大小不会超过 `max_response_size`，唯一的例外是响应中的第一行本身就超限。
pub async fn fetch_rows(database: &dyn DatabaseBackend, request: &FetchRowsRequest) -> Result<FetchRowsResponse> {
    let timer = Timer::with_allotted(request.time_limit);
    let limit = request.default_rows_per_request.max(1);

    let mut response = FetchRowsResponse {
        has_more_rows_in_table: true,
        last_primary_key: request.last_primary_key,
        completed_rows: request.completed_rows,
        ..Default::default()
    };

    while response.response_size < request.max_response_size {
        let remaining = request.max_response_size - response.response_size;
        let query = ChunkQuery {
            table: request.table.clone(),
            column_names: request.column_names.clone(),
            bit_columns: request.bit_columns.clone(),
            primary_key_column: request.primary_key_column.clone(),
            last_primary_key: response.last_primary_key,
            offset: response.completed_rows,
            limit,
            remaining_bytes: remaining,
        };

        let chunk = database.fetch_chunk(&query).await?;
        if chunk.is_empty() {
            response.has_more_rows_in_table = false;
            break;
        }

        let chunk_len = chunk.len() as u64;
        let last_total = chunk.last().map(|r| r.running_total).unwrap_or(0);
        let mut overflow = false;

        for row in chunk {
            let size = row_size(&row.values);
            if !response.rows.is_empty() && response.response_size + size > request.max_response_size {
                overflow = true;
                break;
            }
            response.response_size += size;
            if row.primary_key.is_some() {
                response.last_primary_key = row.primary_key;
            }
            response.completed_rows += 1;
            response.rows.push(row.values);
        }

        if overflow {
            break;
        }

        // 行数不足且没有被大小截断，说明表已读完
        if chunk_len < limit && last_total < remaining {
            response.has_more_rows_in_table = false;
            break;
        }

        if timer.remaining() <= 0.0 {
            tracing::debug!("Row fetch for {} stopped by time limit", request.table);
            break;
        }
    }

    tracing::debug!(
        "Fetched {} rows ({} bytes) from {}, more rows: {}",
        response.rows.len(),
        response.response_size,
        request.table,
        response.has_more_rows_in_table
    );

    Ok(response)
}
