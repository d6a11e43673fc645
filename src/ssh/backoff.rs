// 指数退避重试
//
// 重试状态是显式对象（已尝试次数、下次间隔、最近一次错误），由纯函数 step 推进；
// retry_notify 只是一个在单个任务里 sleep 的简单循环

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 间隔下限，防止间隔为 0 时连续探测
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// 退避计划
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffSchedule {
    /// 首次等待间隔
    pub initial_interval: Duration,
    /// 每次失败后的间隔倍数（小于 1 按 1 处理）
    pub multiplier: f64,
    /// 单次间隔上限
    pub max_interval: Duration,
    /// 最长总耗时，到达后不再发起新的尝试
    pub max_elapsed: Duration,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 1.3,
            max_interval: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

/// 重试状态
#[derive(Debug)]
pub struct BackoffState<E> {
    /// 已完成的尝试次数
    pub attempts: u32,
    /// 下一次失败后的等待间隔（未按剩余时间截断）
    pub next_interval: Duration,
    /// 最近一次失败
    pub last_error: Option<E>,
}

/// step 的结论
#[derive(Debug, PartialEq)]
pub enum Step<E> {
    /// 成功，结束
    Done,
    /// 等待给定时长后再试
    Wait(Duration),
    /// 计划耗尽，携带最后一次错误
    Exhausted(E),
}

impl BackoffSchedule {
    /// 创建新的重试状态
    pub fn start<E>(&self) -> BackoffState<E> {
        BackoffState {
            attempts: 0,
            next_interval: self
                .initial_interval
                .min(self.max_interval)
                .max(MIN_INTERVAL),
            last_error: None,
        }
    }

    /// 根据一次尝试的结果和已耗时推进状态
    ///
    /// 最后一次等待会截断到剩余时间，保证没有尝试晚于 max_elapsed 开始
    pub fn step<E>(
        &self,
        state: &mut BackoffState<E>,
        outcome: Result<(), E>,
        elapsed: Duration,
    ) -> Step<E> {
        state.attempts += 1;

        let error = match outcome {
            Ok(()) => {
                state.last_error = None;
                return Step::Done;
            }
            Err(error) => error,
        };

        if elapsed >= self.max_elapsed {
            state.last_error = None;
            return Step::Exhausted(error);
        }

        let remaining = self.max_elapsed - elapsed;
        let wait = state.next_interval.min(remaining);
        state.next_interval = self.grow(state.next_interval);
        state.last_error = Some(error);
        Step::Wait(wait)
    }

    /// 计算下一个间隔（单调不减，封顶 max_interval）
    fn grow(&self, current: Duration) -> Duration {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(current.as_secs_f64() * multiplier)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
            .max(MIN_INTERVAL)
    }
}

/// 重试失败
#[derive(Debug)]
pub enum RetryError<E> {
    /// 计划耗尽
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last: E,
    },
    /// 被取消
    Cancelled { attempts: u32 },
}

/// 按退避计划重复执行 operation，直到成功、计划耗尽或被取消
///
/// 每次失败且还会重试时调用 notify(错误, 即将等待的时长)。
/// 成功时返回总尝试次数。
pub async fn retry_notify<E, F, Fut, N>(
    schedule: &BackoffSchedule,
    cancel: &CancellationToken,
    mut operation: F,
    mut notify: N,
) -> Result<u32, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    N: FnMut(&E, Duration),
{
    let started = Instant::now();
    let mut state = schedule.start::<E>();

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: state.attempts });
            }
            outcome = operation() => outcome,
        };

        match schedule.step(&mut state, outcome, started.elapsed()) {
            Step::Done => return Ok(state.attempts),
            Step::Exhausted(last) => {
                debug!(
                    "[Backoff] Gave up after {} attempts: {}",
                    state.attempts, last
                );
                return Err(RetryError::Exhausted {
                    attempts: state.attempts,
                    elapsed: started.elapsed(),
                    last,
                });
            }
            Step::Wait(wait) => {
                if let Some(error) = state.last_error.as_ref() {
                    notify(error, wait);
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: state.attempts });
                    }
                    _ = sleep(wait) => {}
                }
            }
        }
    }
}
