//! 眨眼检测模块
//!
//! 基于三状态有限状态机进行眨眼检测：
//! Open（睁眼）→ Closing（低于阈值但未经滞回确认）→ Closed（闭眼）→ Open
//!
//! 闭眼时长一律由帧采集时间戳计算，不使用帧数：
//! - 时长 < min_blink: 视为测量噪声，丢弃
//! - min_blink ≤ 时长 ≤ max_blink: 记为一次眨眼
//! - 时长 > max_blink: 持续闭眼，不算眨眼
//!
//! 两次分析之间间隔超过 staleness 时（丢帧、无脸），状态机直接复位为 Open，
//! 跨越空档的计时不可信，因此不产生任何事件。

use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EyeState {
    #[default]
    Open,
    Closing,
    Closed,
}

/// 状态机参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkConfig {
    /// EAR 阈值，低于此值视为闭眼
    pub ear_threshold: f64,
    /// 连续多少帧低于阈值才确认闭眼
    pub hysteresis_frames: u32,
    pub min_blink: Duration,
    pub max_blink: Duration,
    /// 两帧最大允许间隔
    pub staleness: Duration,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.21,
            hysteresis_frames: 2,
            min_blink: Duration::from_millis(50),
            max_blink: Duration::from_millis(500),
            staleness: Duration::from_millis(1000),
        }
    }
}

/// 一次合格的眨眼，时间戳为重新睁眼的帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkEvent {
    pub reopened_at: Instant,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkOutcome {
    Blink(BlinkEvent),
    /// 闭眼过长，不算眨眼
    SustainedClosure { duration: Duration },
    /// 闭眼过短，视为噪声
    NoiseRejected { duration: Duration },
    /// 未达到滞回帧数就回到阈值之上
    HysteresisRejected,
    /// 帧间空档过长，复位
    StaleReset { gap: Duration },
}

/// 当前这段闭眼的起点
#[derive(Debug, Clone, Copy)]
struct ClosureRecord {
    started_at: Instant,
    below_frames: u32,
}

/// 眨眼状态机
#[derive(Debug, Clone)]
pub struct BlinkStateMachine {
    config: BlinkConfig,
    state: EyeState,
    closure: Option<ClosureRecord>,
    last_sample_at: Option<Instant>,
}

impl BlinkStateMachine {
    pub fn new(config: BlinkConfig) -> Self {
        Self {
            config,
            state: EyeState::Open,
            closure: None,
            last_sample_at: None,
        }
    }

    pub fn state(&self) -> EyeState {
        self.state
    }

    pub fn config(&self) -> &BlinkConfig {
        &self.config
    }

    /// 更换参数但保留当前状态，进行中的闭眼按新参数继续判定
    pub fn set_config(&mut self, config: BlinkConfig) {
        self.config = config;
    }

    /// 已确认闭眼的持续时间；未处于 Closed 时为 None
    pub fn closed_duration(&self, now: Instant) -> Option<Duration> {
        match (self.state, self.closure) {
            (EyeState::Closed, Some(record)) => Some(now.saturating_duration_since(record.started_at)),
            _ => None,
        }
    }

    /// 输入一帧的 EAR 和该帧的采集时间
    pub fn update(&mut self, ear: f64, captured_at: Instant) -> Option<BlinkOutcome> {
        let mut stale = None;
        if let Some(last) = self.last_sample_at {
            let gap = captured_at.saturating_duration_since(last);
            if gap > self.config.staleness && self.state != EyeState::Open {
                tracing::debug!(gap_ms = gap.as_millis() as u64, state = ?self.state, "Frame gap exceeded staleness, resetting");
                self.reset_to_open();
                stale = Some(BlinkOutcome::StaleReset { gap });
            }
        }
        self.last_sample_at = Some(captured_at);

        let below = ear < self.config.ear_threshold;
        let outcome = match self.state {
            EyeState::Open => {
                if below {
                    self.closure = Some(ClosureRecord {
                        started_at: captured_at,
                        below_frames: 1,
                    });
                    self.state = EyeState::Closing;
                    self.confirm_if_due();
                }
                None
            }
            EyeState::Closing => {
                if below {
                    if let Some(record) = self.closure.as_mut() {
                        record.below_frames += 1;
                    }
                    self.confirm_if_due();
                    None
                } else {
                    self.reset_to_open();
                    Some(BlinkOutcome::HysteresisRejected)
                }
            }
            EyeState::Closed => {
                if below {
                    None
                } else {
                    let started_at = self.closure.map(|r| r.started_at).unwrap_or(captured_at);
                    self.reset_to_open();
                    Some(self.classify(captured_at, captured_at.saturating_duration_since(started_at)))
                }
            }
        };

        outcome.or(stale)
    }

    /// 清空所有状态（包括上次采样时间）
    pub fn reset(&mut self) {
        self.reset_to_open();
        self.last_sample_at = None;
    }

    fn reset_to_open(&mut self) {
        self.state = EyeState::Open;
        self.closure = None;
    }

    fn confirm_if_due(&mut self) {
        let confirmed = self
            .closure
            .map(|r| r.below_frames >= self.config.hysteresis_frames.max(1))
            .unwrap_or(false);
        if confirmed {
            self.state = EyeState::Closed;
        }
    }

    fn classify(&self, reopened_at: Instant, duration: Duration) -> BlinkOutcome {
        if duration < self.config.min_blink {
            BlinkOutcome::NoiseRejected { duration }
        } else if duration > self.config.max_blink {
            BlinkOutcome::SustainedClosure { duration }
        } else {
            BlinkOutcome::Blink(BlinkEvent {
                reopened_at,
                duration,
            })
        }
    }
}

impl Default for BlinkStateMachine {
    fn default() -> Self {
        Self::new(BlinkConfig::default())
    }
}
