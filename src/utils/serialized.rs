//! PHP 序列化字符串中的查找替换
//!
//! 只改写 `s:<len>:"<bytes>";` 片段的内容并修正长度前缀，长度按字节计算。

use crate::models::SearchReplace;
use std::time::{Duration, Instant};

const STRING_START: &[u8] = b"s:";
const STRING_END: &[u8] = b"\";";
const EXCERPT_LEN: usize = 200;
const TIME_CHECK_ROUNDS: u64 = 10_000;

/// 单个值允许的最长处理时间
pub const MAX_TIME_ALLOWED: Duration = Duration::from_millis(500);

/// 改写中止的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// 长度前缀或结束符不符合格式
    Malformed,
    /// 扫描位置没有前进
    NoProgress,
    /// 超出时间预算
    TimeBudgetExceeded,
}

/// 改写中止，原值保持不变
#[derive(Debug, Clone)]
pub struct RewriteAbort {
    pub reason: AbortReason,
    /// 已经完成改写的片段数
    pub segments_rewritten: usize,
    /// 原值开头的一段，用于日志
    pub excerpt: String,
}

impl RewriteAbort {
    pub fn message(&self) -> &'static str {
        match self.reason {
            AbortReason::Malformed | AbortReason::NoProgress => {
                "Skipping serialized value that is broken, so no search/replaces could be done in this value."
            }
            AbortReason::TimeBudgetExceeded => {
                "Skipping large serialized value that could not be search/replaced within reasonable time."
            }
        }
    }
}

/// 序列化字符串改写器
#[derive(Debug, Clone)]
pub struct SerializedRewriter {
    max_time: Duration,
}

impl Default for SerializedRewriter {
    fn default() -> Self {
        Self {
            max_time: MAX_TIME_ALLOWED,
        }
    }
}

impl SerializedRewriter {
    pub fn with_max_time(max_time: Duration) -> Self {
        Self { max_time }
    }

    /// 在序列化值中执行替换，返回被改写的字符串片段数。
    /// 失败时 `data` 不变。
    pub fn rewrite(
        &self,
        data: &mut Vec<u8>,
        replaces: &[SearchReplace],
    ) -> Result<usize, RewriteAbort> {
        let started = Instant::now();
        let mut work = data.clone();
        let mut offset: usize = 0;
        let mut last_offset: Option<usize> = None;
        let mut rounds: u64 = 0;
        let mut rewritten = 0usize;

        while let Some(data_pos) = find(&work, STRING_START, offset) {
            rounds += 1;

            if last_offset == Some(offset) {
                return Err(self.abort(AbortReason::NoProgress, rewritten, data));
            }
            last_offset = Some(offset);

            if rounds % TIME_CHECK_ROUNDS == 0 && started.elapsed() > self.max_time {
                return Err(self.abort(AbortReason::TimeBudgetExceeded, rewritten, data));
            }

            let length_start = data_pos + STRING_START.len();
            let length_end = match find(&work, b":", length_start) {
                Some(pos) => pos,
                None => return Err(self.abort(AbortReason::Malformed, rewritten, data)),
            };
            let declared_len = match parse_len(&work[length_start..length_end]) {
                Some(len) => len,
                None => return Err(self.abort(AbortReason::Malformed, rewritten, data)),
            };

            // 跳过 `:"`
            let value_start = length_end + 2;
            let bounds = value_start
                .checked_add(declared_len)
                .and_then(|value_end| Some((value_end, value_end.checked_add(STRING_END.len())?)))
                .filter(|&(_, segment_end)| segment_end <= work.len());
            let Some((value_end, segment_end)) = bounds else {
                return Err(self.abort(AbortReason::Malformed, rewritten, data));
            };
            if &work[value_end..segment_end] != STRING_END || work.get(length_end + 1) != Some(&b'"') {
                return Err(self.abort(AbortReason::Malformed, rewritten, data));
            }

            offset = segment_end;

            let mut value = work[value_start..value_end].to_vec();
            let mut changed = false;
            for replace in replaces {
                let (replaced, count) = replace_bytes(&value, replace.from.as_bytes(), replace.to.as_bytes());
                if count > 0 {
                    value = replaced;
                    changed = true;
                }
            }

            if changed {
                let mut segment = Vec::with_capacity(value.len() + 16);
                segment.extend_from_slice(STRING_START);
                segment.extend_from_slice(value.len().to_string().as_bytes());
                segment.extend_from_slice(b":\"");
                segment.extend_from_slice(&value);
                segment.extend_from_slice(STRING_END);

                let old_len = segment_end - data_pos;
                let new_len = segment.len();
                work.splice(data_pos..segment_end, segment);

                offset = offset + new_len - old_len;
                rewritten += 1;
            }
        }

        *data = work;
        Ok(rewritten)
    }

    fn abort(&self, reason: AbortReason, segments_rewritten: usize, original: &[u8]) -> RewriteAbort {
        let end = original.len().min(EXCERPT_LEN);
        RewriteAbort {
            reason,
            segments_rewritten,
            excerpt: String::from_utf8_lossy(&original[..end]).into_owned(),
        }
    }
}

fn parse_len(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// 在 `haystack[from..]` 中查找 `needle`
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// 从左到右替换所有不重叠的匹配，返回新值和替换次数
pub fn replace_bytes(haystack: &[u8], from: &[u8], to: &[u8]) -> (Vec<u8>, usize) {
    if from.is_empty() || haystack.len() < from.len() {
        return (haystack.to_vec(), 0);
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut count = 0;
    let mut pos = 0;
    while let Some(found) = find(haystack, from, pos) {
        out.extend_from_slice(&haystack[pos..found]);
        out.extend_from_slice(to);
        pos = found + from.len();
        count += 1;
    }
    out.extend_from_slice(&haystack[pos..]);
    (out, count)
}

/// 判断一个值是否像 PHP 序列化数据
pub fn is_serialized(data: &[u8]) -> bool {
    let data = trim_php(data);
    if data == b"N;" {
        return true;
    }
    if data.len() < 4 || data[1] != b':' {
        return false;
    }

    let last = data[data.len() - 1];
    if last != b';' && last != b'}' {
        return false;
    }

    match data[0] {
        b's' => data[data.len() - 2] == b'"' && has_length_prefix(data),
        b'a' | b'O' | b'E' => has_length_prefix(data),
        b'b' | b'i' | b'd' => {
            // `x:<number>;` 且分号是最后一个字符
            let body = &data[2..data.len() - 1];
            last == b';'
                && !body.is_empty()
                && body
                    .iter()
                    .all(|c| c.is_ascii_digit() || matches!(c, b'.' | b'E' | b'+' | b'-'))
        }
        _ => false,
    }
}

/// `^x:[0-9]+:`
fn has_length_prefix(data: &[u8]) -> bool {
    let rest = &data[2..];
    let digits = rest.iter().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && rest.get(digits) == Some(&b':')
}

fn trim_php(data: &[u8]) -> &[u8] {
    let is_ws = |c: &u8| matches!(c, b' ' | b'\t' | b'\n' | b'\r' | b'\0' | 0x0b);
    let start = data.iter().position(|c| !is_ws(c)).unwrap_or(data.len());
    let end = data.iter().rposition(|c| !is_ws(c)).map(|p| p + 1).unwrap_or(start);
    &data[start..end.max(start)]
}
