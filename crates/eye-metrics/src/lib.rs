//! 眼部指标计算库
//!
//! 本库提供基于眼部关键点的逐帧睁眼程度计算和眨眼状态机，
//! 不依赖任何摄像头或人脸模型，输入为已提取的关键点。
//!
//! ## 模块
//! - `ear`: EAR (Eye Aspect Ratio) 眼部纵横比计算
//! - `blink`: 带滞回和时长过滤的眨眼状态机

pub mod blink;
pub mod ear;

// 重新导出核心类型，方便外部使用
pub use blink::{BlinkConfig, BlinkEvent, BlinkOutcome, BlinkStateMachine, EyeState};
pub use ear::{EarCalculator, EyeLandmarks, LandmarkSet, MeasurementRejected};

/// 二维关键点坐标（归一化到 [0,1]）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 欧氏距离
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}
