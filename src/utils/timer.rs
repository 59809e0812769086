//! 单次请求内的执行时间预算

use std::collections::HashMap;
use std::time::Instant;

/// 运行环境允许的最长执行时间上限 (秒)
pub const MAX_EXECUTION_TIME_CAP: u64 = 30;

/// 预留给保存状态和返回响应的比例
const SAFETY_FACTOR: f64 = 0.8;

/// 将配置的执行时间规整到 1..=30 秒，非法值按 30 处理
pub fn clamp_max_execution_time(configured: u64) -> u64 {
    if configured == 0 || configured > MAX_EXECUTION_TIME_CAP {
        MAX_EXECUTION_TIME_CAP
    } else {
        configured
    }
}

#[derive(Debug, Clone, Copy)]
struct SubTimer {
    started: Instant,
    ended: Option<Instant>,
}

/// 请求级计时器
#[derive(Debug, Clone)]
pub struct Timer {
    started: Instant,
    allotted: f64,
    timers: HashMap<String, SubTimer>,
}

impl Timer {
    /// 以配置的最长执行时间启动计时
    pub fn start(max_execution_time: u64) -> Self {
        let allotted = clamp_max_execution_time(max_execution_time) as f64 * SAFETY_FACTOR;
        Self::with_allotted(allotted)
    }

    /// 以给定秒数作为预算启动计时 (服务端按调用方传入的时间限制使用)
    pub fn with_allotted(seconds: f64) -> Self {
        Self {
            started: Instant::now(),
            allotted: seconds.max(0.0),
            timers: HashMap::new(),
        }
    }

    pub fn allotted(&self) -> f64 {
        self.allotted
    }

    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// 剩余秒数，可以为负
    pub fn remaining(&self) -> f64 {
        self.allotted - self.elapsed()
    }

    /// 以上一轮耗时预测下一轮，剩余时间不够时返回 false
    pub fn should_continue(&self, last_run: f64) -> bool {
        let remaining = self.remaining();
        remaining > 0.0 && remaining >= last_run
    }

    /// 单个数据块允许的最长耗时: 总预算的 1/5，最多 10 秒
    pub fn max_time_per_sync(&self) -> f64 {
        (self.allotted / 5.0).ceil().min(10.0)
    }

    pub fn start_timer(&mut self, name: &str) {
        self.timers.insert(
            name.to_string(),
            SubTimer {
                started: Instant::now(),
                ended: None,
            },
        );
    }

    /// 结束子计时器并返回耗时，未启动的计时器返回 0
    pub fn end_timer(&mut self, name: &str) -> f64 {
        match self.timers.get_mut(name) {
            Some(timer) => {
                let now = Instant::now();
                timer.ended = Some(now);
                now.duration_since(timer.started).as_secs_f64()
            }
            None => 0.0,
        }
    }

    /// 子计时器耗时，未结束的按当前时间计算
    pub fn elapsed_of(&self, name: &str) -> Option<f64> {
        self.timers.get(name).map(|timer| {
            let end = timer.ended.unwrap_or_else(Instant::now);
            end.duration_since(timer.started).as_secs_f64()
        })
    }

    /// 输出所有子计时器，请求结束时调用
    pub fn log_timers(&self) {
        for (name, timer) in &self.timers {
            let end = timer.ended.unwrap_or_else(Instant::now);
            tracing::debug!(
                "Timer {} took {:.3} seconds",
                name,
                end.duration_since(timer.started).as_secs_f64()
            );
        }
    }
}
