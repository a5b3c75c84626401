//! 环路滤波.
//!
//! 每行宏块重建完成后按宏块顺序滤波: 左侧宏块边、内部竖直边、上方宏块边、
//! 内部水平边. 宏块边使用较强的滤波, 内部边只在宏块有残差
//! (或为 4x4 帧内 / SPLIT) 时处理. 简单滤波器只处理亮度.

use super::frame_buffer::FrameBuffer;
use super::header::{FilterType, LoopFilterDeltas, Segmentation};
use super::modes::{MacroblockInfo, MbMode};

/// 单个宏块的滤波强度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct FilterStrength {
    /// 滤波级别 0..=63, 0 表示不滤波
    pub(super) level: u8,
    /// 内部差值上限
    pub(super) interior_limit: u8,
    /// 是否处理内部边
    pub(super) inner: bool,
}

/// 每帧不变的滤波参数
#[derive(Debug, Clone, Copy)]
pub(super) struct FilterParams {
    pub(super) filter_type: FilterType,
    pub(super) level: u8,
    pub(super) sharpness: u8,
    pub(super) keyframe: bool,
}

/// 计算宏块滤波强度: 帧级或分段级别, 加参考帧与模式增量, 钳位到 0..=63
pub(super) fn macroblock_strength(
    params: &FilterParams,
    segmentation: &Segmentation,
    deltas: &LoopFilterDeltas,
    mb: &MacroblockInfo,
) -> FilterStrength {
    let mut level = i32::from(params.level);
    if segmentation.enabled {
        let value = i32::from(segmentation.filter_level[usize::from(mb.segment)]);
        level = if segmentation.absolute_values {
            value
        } else {
            level + value
        };
        level = level.clamp(0, 63);
    }

    if deltas.enabled {
        level += i32::from(deltas.ref_frame[mb.ref_frame as usize]);
        let mode_delta = match mb.mode {
            MbMode::Intra4x4 => Some(0),
            MbMode::Intra16(_) => None,
            MbMode::Zero => Some(1),
            MbMode::Split => Some(3),
            MbMode::Nearest | MbMode::Near | MbMode::New => Some(2),
        };
        if let Some(index) = mode_delta {
            level += i32::from(deltas.mode[index]);
        }
        level = level.clamp(0, 63);
    }

    let mut interior = level;
    if params.sharpness > 0 {
        interior >>= if params.sharpness > 4 { 2 } else { 1 };
        interior = interior.min(9 - i32::from(params.sharpness));
    }
    interior = interior.max(1);

    FilterStrength {
        level: level as u8,
        interior_limit: interior as u8,
        inner: !mb.skip || matches!(mb.mode, MbMode::Intra4x4 | MbMode::Split),
    }
}

/// 对一个宏块的所有边滤波
pub(super) fn filter_macroblock(
    frame: &mut FrameBuffer,
    params: &FilterParams,
    strength: FilterStrength,
    mb_x: usize,
    mb_y: usize,
) {
    if strength.level == 0 {
        return;
    }
    let level = i32::from(strength.level);
    let interior = i32::from(strength.interior_limit);
    let mbedge_limit = 2 * (level + 2) + interior;
    let subedge_limit = 2 * level + interior;

    match params.filter_type {
        FilterType::Simple => {
            let plane = frame.plane_mut(0);
            let stride = plane.stride();
            let origin = plane.offset((mb_x * 16) as isize, (mb_y * 16) as isize);
            let data = plane.data_mut();
            if mb_x > 0 {
                simple_edge(data, origin, 1, stride, mbedge_limit);
            }
            if strength.inner {
                for i in [4, 8, 12] {
                    simple_edge(data, origin + i, 1, stride, subedge_limit);
                }
            }
            if mb_y > 0 {
                simple_edge(data, origin, stride, 1, mbedge_limit);
            }
            if strength.inner {
                for i in [4, 8, 12] {
                    simple_edge(data, origin + i * stride, stride, 1, subedge_limit);
                }
            }
        }
        FilterType::Normal => {
            let hev = hev_threshold(level, params.keyframe);
            let limits = EdgeLimits {
                mbedge: mbedge_limit,
                subedge: subedge_limit,
                interior,
                hev,
            };
            for (index, size) in [(0, 16), (1, 8), (2, 8)] {
                let plane = frame.plane_mut(index);
                let stride = plane.stride();
                let origin = plane.offset((mb_x * size) as isize, (mb_y * size) as isize);
                let data = plane.data_mut();
                filter_plane_block(data, origin, stride, size, &limits, strength.inner, mb_x, mb_y);
            }
        }
    }
}

struct EdgeLimits {
    mbedge: i32,
    subedge: i32,
    interior: i32,
    hev: i32,
}

/// 一个平面内宏块的普通滤波, `size` 为 16 (亮度) 或 8 (色度)
#[allow(clippy::too_many_arguments)]
fn filter_plane_block(
    data: &mut [u8],
    origin: usize,
    stride: usize,
    size: usize,
    limits: &EdgeLimits,
    inner: bool,
    mb_x: usize,
    mb_y: usize,
) {
    if mb_x > 0 {
        for i in 0..size {
            mb_edge(data, origin + i * stride, 1, limits);
        }
    }
    if inner {
        for x in (4..size).step_by(4) {
            for i in 0..size {
                sub_edge(data, origin + i * stride + x, 1, limits);
            }
        }
    }
    if mb_y > 0 {
        for i in 0..size {
            mb_edge(data, origin + i, stride, limits);
        }
    }
    if inner {
        for y in (4..size).step_by(4) {
            for i in 0..size {
                sub_edge(data, origin + y * stride + i, stride, limits);
            }
        }
    }
}

/// 高边缘差异阈值
fn hev_threshold(level: i32, keyframe: bool) -> i32 {
    match (keyframe, level) {
        (true, 40..) => 2,
        (false, 40..) => 3,
        (false, 20..) => 2,
        (_, 15..) => 1,
        _ => 0,
    }
}

// ============================================================
// 边滤波核心
// ============================================================

#[inline]
fn clamp_s8(v: i32) -> i32 {
    v.clamp(-128, 127)
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// 边两侧各 4 个像素: p3 p2 p1 p0 | q0 q1 q2 q3
#[derive(Clone, Copy)]
struct EdgePixels {
    p: [i32; 4],
    q: [i32; 4],
}

impl EdgePixels {
    /// `pos` 为 q0 的位置, `step` 为跨边方向的像素间距
    #[inline]
    fn load(data: &[u8], pos: usize, step: usize) -> Self {
        Self {
            p: std::array::from_fn(|k| i32::from(data[pos - (k + 1) * step])),
            q: std::array::from_fn(|k| i32::from(data[pos + k * step])),
        }
    }

    #[inline]
    fn simple_limit(&self, limit: i32) -> bool {
        2 * (self.p[0] - self.q[0]).abs() + ((self.p[1] - self.q[1]).abs() >> 1) <= limit
    }

    #[inline]
    fn normal_limit(&self, edge_limit: i32, interior: i32) -> bool {
        let (p, q) = (&self.p, &self.q);
        self.simple_limit(edge_limit)
            && (p[3] - p[2]).abs() <= interior
            && (p[2] - p[1]).abs() <= interior
            && (p[1] - p[0]).abs() <= interior
            && (q[3] - q[2]).abs() <= interior
            && (q[2] - q[1]).abs() <= interior
            && (q[1] - q[0]).abs() <= interior
    }

    #[inline]
    fn high_variance(&self, threshold: i32) -> bool {
        (self.p[1] - self.p[0]).abs() > threshold || (self.q[1] - self.q[0]).abs() > threshold
    }
}

/// 调整 p0/q0 (4 抽头时还考虑 p1 - q1); 非 4 抽头时同时调整 p1/q1
#[inline]
fn common_adjust(data: &mut [u8], pos: usize, step: usize, px: &EdgePixels, use_outer_taps: bool) {
    let (p, q) = (&px.p, &px.q);
    let mut a = 3 * (q[0] - p[0]);
    if use_outer_taps {
        a += clamp_s8(p[1] - q[1]);
    }
    a = clamp_s8(a);

    let f1 = (a + 4).min(127) >> 3;
    let f2 = (a + 3).min(127) >> 3;
    data[pos - step] = clamp_u8(p[0] + f2);
    data[pos] = clamp_u8(q[0] - f1);

    if !use_outer_taps {
        let a = (f1 + 1) >> 1;
        data[pos - 2 * step] = clamp_u8(p[1] + a);
        data[pos + step] = clamp_u8(q[1] - a);
    }
}

/// 宏块边: 高差异时只调整 p0/q0, 否则修改两侧各 3 个像素
fn mb_edge(data: &mut [u8], pos: usize, step: usize, limits: &EdgeLimits) {
    let px = EdgePixels::load(data, pos, step);
    if !px.normal_limit(limits.mbedge, limits.interior) {
        return;
    }
    if px.high_variance(limits.hev) {
        common_adjust(data, pos, step, &px, true);
        return;
    }

    let (p, q) = (&px.p, &px.q);
    let w = clamp_s8(clamp_s8(p[1] - q[1]) + 3 * (q[0] - p[0]));
    let a0 = (27 * w + 63) >> 7;
    let a1 = (18 * w + 63) >> 7;
    let a2 = (9 * w + 63) >> 7;
    data[pos - 3 * step] = clamp_u8(p[2] + a2);
    data[pos - 2 * step] = clamp_u8(p[1] + a1);
    data[pos - step] = clamp_u8(p[0] + a0);
    data[pos] = clamp_u8(q[0] - a0);
    data[pos + step] = clamp_u8(q[1] - a1);
    data[pos + 2 * step] = clamp_u8(q[2] - a2);
}

/// 内部子块边
fn sub_edge(data: &mut [u8], pos: usize, step: usize, limits: &EdgeLimits) {
    let px = EdgePixels::load(data, pos, step);
    if px.normal_limit(limits.subedge, limits.interior) {
        let hev = px.high_variance(limits.hev);
        common_adjust(data, pos, step, &px, hev);
    }
}

/// 简单滤波: 沿边 16 个位置, `pitch` 为沿边方向的间距
fn simple_edge(data: &mut [u8], pos: usize, step: usize, pitch: usize, limit: i32) {
    for i in 0..16 {
        let at = pos + i * pitch;
        let px = EdgePixels::load(data, at, step);
        if px.simple_limit(limit) {
            common_adjust(data, at, step, &px, true);
        }
    }
}
