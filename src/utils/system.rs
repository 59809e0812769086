//! 进程与格式化相关的小工具

use rand::Rng;
use std::cmp::Ordering;

/// 当前进程的内存峰值 (字节)，无法读取时返回 0
pub fn memory_peak_bytes() -> u64 {
    read_proc_status("VmHWM:")
}

/// 当前进程的常驻内存 (字节)，无法读取时返回 0
pub fn memory_usage_bytes() -> u64 {
    read_proc_status("VmRSS:")
}

fn read_proc_status(field: &str) -> u64 {
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(content) => content,
        Err(_) => return 0,
    };

    status
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line[field.len()..].trim().split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

/// 时间戳加随机后缀的唯一 ID (十六进制)
pub fn unique_id() -> String {
    let now = chrono::Utc::now();
    let suffix: u16 = rand::thread_rng().r#gen();
    format!(
        "{:08x}{:05x}{:04x}",
        now.timestamp(),
        now.timestamp_subsec_micros(),
        suffix
    )
}

/// 比较两个版本号的数字部分，如 "10.1.48-MariaDB" 与 "10.2"
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let a = version_parts(left);
    let b = version_parts(right);
    let len = a.len().max(b.len());

    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub fn version_lt(left: &str, right: &str) -> bool {
    compare_versions(left, right) == Ordering::Less
}

fn version_parts(version: &str) -> Vec<u64> {
    let numeric: String = version
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    numeric
        .split('.')
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// 进度描述里使用的数据量格式: 小于 1MB 用 kB，否则 MB 保留一位小数
pub fn format_data_size(bytes: f64) -> String {
    let one_mb = 1024.0 * 1024.0;
    if bytes < one_mb {
        format!("{}kB", format_thousands((bytes / 1024.0).round() as u64))
    } else {
        format!("{:.1}MB", bytes / one_mb)
    }
}

/// 千分位格式化
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
