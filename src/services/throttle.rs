//! 数据库同步的响应大小节流，状态保存在 Job 中跨请求收敛

use crate::models::Job;

/// 读取当前表应使用的响应大小；换表时重置为默认值
pub fn response_size_for_table(job: &mut Job, table: &str) -> u64 {
    if job.db_throttle_table != table {
        job.db_throttle_table = table.to_string();
        job.db_throttle_table_response_size = job.db_response_size_wanted_default;
    }
    job.db_throttle_table_response_size
}

/// 每个数据块之后调整响应大小
///
/// `last_run` 为本块耗时 (秒)，`memory_peak` 为进程内存峰值 (字节)。
pub fn adjust_after_chunk(job: &mut Job, last_run: f64, max_time_per_sync: f64, memory_peak: u64) {
    let current = job.db_throttle_table_response_size;

    let next = if job.max_memory_bytes > 0 && memory_peak > job.max_memory_bytes && !job.db_memory_backoff_done {
        job.db_memory_backoff_done = true;
        tracing::warn!(
            "Memory peak {} above limit {}, reducing response size",
            memory_peak,
            job.max_memory_bytes
        );
        current * 70 / 100
    } else if job.db_last_response_length > 0 && job.db_last_response_length > job.db_response_size_wanted_max {
        current * 80 / 100
    } else if last_run < max_time_per_sync {
        (current * 105).div_ceil(100)
    } else {
        (current * 90).div_ceil(100)
    };

    job.db_throttle_table_response_size = next.clamp(1, job.db_response_size_wanted_max.max(1));
    tracing::debug!(
        "Response size for {} adjusted {} -> {} (last run {:.2}s)",
        job.db_throttle_table,
        current,
        job.db_throttle_table_response_size,
        last_run
    );
}
