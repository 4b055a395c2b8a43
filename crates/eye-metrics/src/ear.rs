//! EAR (Eye Aspect Ratio) 计算模块
//!
//! 标准6点公式: EAR = (|p2-p6| + |p3-p5|) / (2 * |p1-p4|)
//! - p1, p4: 眼角点（水平方向）
//! - p2, p3: 上眼睑点
//! - p6, p5: 与之配对的下眼睑点
//!
//! 计算器无内部状态，相同输入永远得到相同输出。

use crate::Point;

/// 水平距离低于此值时视为几何退化，拒绝该帧
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// 单眼 6 个关键点，顺序为 p1..p6
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    pub points: [Point; 6],
}

impl EyeLandmarks {
    pub const fn new(points: [Point; 6]) -> Self {
        Self { points }
    }

    /// 从 12 个浮点数 (6个点 × 2个坐标) 构造，长度不足时返回 None
    pub fn from_flat(coords: &[f64]) -> Option<Self> {
        if coords.len() < 12 {
            return None;
        }
        let mut points = [Point::default(); 6];
        for (i, p) in points.iter_mut().enumerate() {
            *p = Point::new(coords[i * 2], coords[i * 2 + 1]);
        }
        Some(Self { points })
    }

    /// 构造一只 EAR 恰好等于 `ear` 的单位宽度合成眼睛（用于模拟和测试）
    pub fn synthetic(ear: f64) -> Self {
        let half = ear / 2.0;
        Self::new([
            Point::new(0.0, 0.0),
            Point::new(0.3, half),
            Point::new(0.7, half),
            Point::new(1.0, 0.0),
            Point::new(0.7, -half),
            Point::new(0.3, -half),
        ])
    }
}

/// 单帧关键点：左右眼各一组，任意一只可能缺失
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkSet {
    pub left: Option<EyeLandmarks>,
    pub right: Option<EyeLandmarks>,
}

impl LandmarkSet {
    pub fn new(left: Option<EyeLandmarks>, right: Option<EyeLandmarks>) -> Self {
        Self { left, right }
    }

    /// 双眼使用同一组关键点
    pub fn binocular(eye: EyeLandmarks) -> Self {
        Self {
            left: Some(eye),
            right: Some(eye),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementRejected {
    #[error("no eye landmarks in frame")]
    MissingLandmarks,
    #[error("eye corner distance below epsilon")]
    DegenerateGeometry,
}

/// EAR 计算器
#[derive(Debug, Clone, Copy)]
pub struct EarCalculator {
    epsilon: f64,
}

impl Default for EarCalculator {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl EarCalculator {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// 单眼 EAR；水平距离过小（或出现 NaN）时拒绝
    pub fn eye_ratio(&self, eye: &EyeLandmarks) -> Result<f64, MeasurementRejected> {
        let [p1, p2, p3, p4, p5, p6] = eye.points;

        let horizontal = p1.distance(&p4);
        // NaN 比较恒为 false，也会走拒绝分支
        if !(horizontal >= self.epsilon) {
            return Err(MeasurementRejected::DegenerateGeometry);
        }

        let ear = (p2.distance(&p6) + p3.distance(&p5)) / (2.0 * horizontal);
        if ear.is_finite() {
            Ok(ear)
        } else {
            Err(MeasurementRejected::DegenerateGeometry)
        }
    }

    /// 双眼可用时取平均，否则取唯一可用的一只
    pub fn compute(&self, set: &LandmarkSet) -> Result<f64, MeasurementRejected> {
        let left = set.left.as_ref().map(|eye| self.eye_ratio(eye));
        let right = set.right.as_ref().map(|eye| self.eye_ratio(eye));

        match (left, right) {
            (None, None) => Err(MeasurementRejected::MissingLandmarks),
            (Some(Ok(l)), Some(Ok(r))) => Ok((l + r) / 2.0),
            (Some(Ok(ear)), _) | (_, Some(Ok(ear))) => Ok(ear),
            _ => Err(MeasurementRejected::DegenerateGeometry),
        }
    }
}
