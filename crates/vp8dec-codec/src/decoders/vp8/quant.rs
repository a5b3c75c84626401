//! 反量化系数推导.
//!
//! 每个分段按量化索引查表得到 6 个乘数 (亮度 DC/AC, Y2 DC/AC, 色度 DC/AC).

use super::header::{QuantIndices, Segmentation};
use super::tables::{AC_QUANT, DC_QUANT};

/// 单个分段的反量化乘数, 下标 0 为 DC, 1 为 AC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct Dequant {
    pub(super) y: [i32; 2],
    pub(super) y2: [i32; 2],
    pub(super) uv: [i32; 2],
}

#[inline]
fn dc_q(index: i32) -> i32 {
    DC_QUANT[index.clamp(0, 127) as usize]
}

#[inline]
fn ac_q(index: i32) -> i32 {
    AC_QUANT[index.clamp(0, 127) as usize]
}

impl Dequant {
    /// 由基准量化索引和帧级增量推导乘数
    pub(super) fn from_index(base: i32, q: &QuantIndices) -> Self {
        let y2_ac = (ac_q(base + q.y2_ac_delta) * 155 / 100).max(8);
        let uv_dc = dc_q(base + q.uv_dc_delta).min(132);
        Self {
            y: [dc_q(base + q.y_dc_delta), ac_q(base)],
            y2: [2 * dc_q(base + q.y2_dc_delta), y2_ac],
            uv: [uv_dc, ac_q(base + q.uv_ac_delta)],
        }
    }
}

/// 计算 4 个分段各自的反量化乘数
///
/// 未启用分段时 4 项相同.
pub(super) fn build_segment_dequant(q: &QuantIndices, seg: &Segmentation) -> [Dequant; 4] {
    std::array::from_fn(|segment| {
        let base = if seg.enabled {
            let value = i32::from(seg.quant[segment]);
            if seg.absolute_values {
                value
            } else {
                value + q.y_ac
            }
        } else {
            q.y_ac
        };
        Dequant::from_index(base.clamp(0, 127), q)
    })
}
