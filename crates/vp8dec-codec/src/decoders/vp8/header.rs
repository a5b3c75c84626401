//! VP8 帧头解析.
//!
//! 帧头分两层:
//! - 未压缩的帧标签 (3 字节, 关键帧另有起始码与尺寸共 7 字节).
//! - 第一分区中经布尔熵编码的压缩帧头, 其中包含分段、环路滤波、分区表、量化参数、
//!   参考帧更新标志以及对持久概率表的增量更新.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use vp8dec_core::color::ColorSpace;
use vp8dec_core::{Vp8Error, Vp8Result};

use super::range_coder::RangeDecoder;
use super::references::RefFrame;
use super::tables::{
    COEFF_UPDATE_PROBS, DEFAULT_COEFF_PROBS, DEFAULT_MV_PROBS, DEFAULT_UV_MODE_PROBS,
    DEFAULT_YMODE_PROBS, MV_PROB_COUNT, MV_UPDATE_PROBS, NUM_TOKEN_PROBS, TokenProbs,
};

/// 关键帧起始码
const START_CODE: [u8; 3] = [0x9d, 0x01, 0x2a];

/// 最大系数分区数
pub(super) const MAX_PARTITIONS: usize = 8;

// ============================================================
// 帧标签
// ============================================================

/// 未压缩的帧标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct FrameTag {
    pub(super) keyframe: bool,
    pub(super) profile: u8,
    pub(super) show_frame: bool,
    /// 第一分区 (压缩帧头 + 宏块模式) 字节数
    pub(super) first_part_size: usize,
    /// 关键帧声明的宽度, 帧间帧为 0
    pub(super) width: u16,
    /// 关键帧声明的高度, 帧间帧为 0
    pub(super) height: u16,
    pub(super) horizontal_scale: u8,
    pub(super) vertical_scale: u8,
}

impl FrameTag {
    /// 未压缩部分的长度
    pub(super) fn header_len(&self) -> usize {
        if self.keyframe { 10 } else { 3 }
    }

    /// profile 1..=3 使用双线性插值
    pub(super) fn uses_bilinear(&self) -> bool {
        self.profile != 0
    }

    /// profile 3 的色度运动矢量取整像素
    pub(super) fn full_pixel_chroma(&self) -> bool {
        self.profile == 3
    }
}

/// 解析帧标签
pub(super) fn parse_frame_tag(data: &[u8]) -> Vp8Result<FrameTag> {
    if data.len() < 3 {
        return Err(Vp8Error::InvalidData(format!(
            "VP8: 帧标签被截断, 仅 {} 字节",
            data.len()
        )));
    }

    let raw = LittleEndian::read_u24(&data[0..3]);
    let keyframe = raw & 1 == 0;
    let profile = ((raw >> 1) & 7) as u8;
    let show_frame = raw & 0x10 != 0;
    let first_part_size = (raw >> 5) as usize;

    if profile > 3 {
        warn!("VP8: 未知 profile {}", profile);
        return Err(Vp8Error::Unsupported(format!("VP8: profile {} 不受支持", profile)));
    }

    let mut tag = FrameTag {
        keyframe,
        profile,
        show_frame,
        first_part_size,
        width: 0,
        height: 0,
        horizontal_scale: 0,
        vertical_scale: 0,
    };

    if keyframe {
        if data.len() < 10 {
            return Err(Vp8Error::InvalidData(format!(
                "VP8: 关键帧头被截断, 仅 {} 字节",
                data.len()
            )));
        }
        if data[3..6] != START_CODE {
            return Err(Vp8Error::InvalidData(format!(
                "VP8: 无效起始码 {:02x} {:02x} {:02x}",
                data[3], data[4], data[5]
            )));
        }
        let w = LittleEndian::read_u16(&data[6..8]);
        let h = LittleEndian::read_u16(&data[8..10]);
        tag.width = w & 0x3fff;
        tag.height = h & 0x3fff;
        tag.horizontal_scale = (w >> 14) as u8;
        tag.vertical_scale = (h >> 14) as u8;
        if tag.width == 0 || tag.height == 0 {
            return Err(Vp8Error::InvalidData(format!(
                "VP8: 无效尺寸 {}x{}",
                tag.width, tag.height
            )));
        }
        if tag.horizontal_scale != 0 || tag.vertical_scale != 0 {
            warn!(
                "VP8: 忽略上采样参数 (水平 {}, 垂直 {})",
                tag.horizontal_scale, tag.vertical_scale
            );
        }
    }

    if first_part_size > data.len() - tag.header_len() {
        return Err(Vp8Error::InvalidData(format!(
            "VP8: 第一分区大小 {} 超出数据长度 {}",
            first_part_size,
            data.len()
        )));
    }

    Ok(tag)
}

// ============================================================
// 持久状态
// ============================================================

/// 跨帧持久的概率上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ProbabilityContext {
    pub(super) token: TokenProbs,
    pub(super) ymode: [u8; 4],
    pub(super) uv_mode: [u8; 3],
    pub(super) mv: [[u8; MV_PROB_COUNT]; 2],
}

impl Default for ProbabilityContext {
    fn default() -> Self {
        Self {
            token: DEFAULT_COEFF_PROBS,
            ymode: DEFAULT_YMODE_PROBS,
            uv_mode: DEFAULT_UV_MODE_PROBS,
            mv: DEFAULT_MV_PROBS,
        }
    }
}

/// 分段参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Segmentation {
    pub(super) enabled: bool,
    pub(super) update_map: bool,
    pub(super) update_data: bool,
    /// 为 true 时分段值为绝对值, 否则为相对帧级参数的增量
    pub(super) absolute_values: bool,
    pub(super) quant: [i8; 4],
    pub(super) filter_level: [i8; 4],
    pub(super) tree_probs: [u8; 3],
}

impl Default for Segmentation {
    fn default() -> Self {
        Self {
            enabled: false,
            update_map: false,
            update_data: false,
            absolute_values: false,
            quant: [0; 4],
            filter_level: [0; 4],
            tree_probs: [255; 3],
        }
    }
}

/// 环路滤波强度的参考帧/模式增量
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct LoopFilterDeltas {
    pub(super) enabled: bool,
    /// 按 [`RefFrame`] 索引
    pub(super) ref_frame: [i8; 4],
    /// [0] 4x4 帧内, [1] ZERO, [2] 其余整块帧间, [3] SPLIT
    pub(super) mode: [i8; 4],
}

/// 解码器持久状态: 概率表、分段、环路滤波增量
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct PersistentState {
    pub(super) probs: ProbabilityContext,
    pub(super) segmentation: Segmentation,
    pub(super) lf_deltas: LoopFilterDeltas,
}

impl PersistentState {
    /// 关键帧复位
    pub(super) fn reset_for_keyframe(&mut self) {
        self.probs = ProbabilityContext::default();
        self.segmentation = Segmentation::default();
        self.lf_deltas = LoopFilterDeltas::default();
    }
}

// ============================================================
// 压缩帧头
// ============================================================

/// 环路滤波类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum FilterType {
    #[default]
    Normal,
    Simple,
}

/// 帧级量化索引与各分量增量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct QuantIndices {
    pub(super) y_ac: i32,
    pub(super) y_dc_delta: i32,
    pub(super) y2_dc_delta: i32,
    pub(super) y2_ac_delta: i32,
    pub(super) uv_dc_delta: i32,
    pub(super) uv_ac_delta: i32,
}

/// 解析后的帧头
#[derive(Debug, Clone)]
pub(super) struct FrameHeader {
    pub(super) tag: FrameTag,
    pub(super) color_space: ColorSpace,
    pub(super) filter_type: FilterType,
    pub(super) filter_level: u8,
    pub(super) sharpness: u8,
    /// 系数分区在帧数据中的字节范围
    pub(super) partitions: Vec<Range<usize>>,
    pub(super) quant: QuantIndices,
    pub(super) refresh_golden: bool,
    pub(super) refresh_altref: bool,
    /// 未刷新时 golden 的复制来源: 1 = previous, 2 = altref
    pub(super) copy_to_golden: u8,
    /// 未刷新时 altref 的复制来源: 1 = previous, 2 = golden
    pub(super) copy_to_altref: u8,
    /// 按 [`RefFrame`] 索引的符号偏置
    pub(super) sign_bias: [bool; 4],
    pub(super) refresh_last: bool,
    pub(super) skip_enabled: bool,
    pub(super) prob_skip: u8,
    pub(super) prob_intra: u8,
    pub(super) prob_last: u8,
    pub(super) prob_golden: u8,
    /// 帧头要求不保留概率更新时保存的快照, 帧结束后恢复
    pub(super) saved_probs: Option<ProbabilityContext>,
}

impl FrameHeader {
    pub(super) fn is_keyframe(&self) -> bool {
        self.tag.keyframe
    }
}

/// 解析压缩帧头
///
/// `state` 应为持久状态的副本: 解析过程中直接修改它, 只有整帧成功后才提交.
/// 返回帧头和继续用于宏块模式解码的第一分区解码器.
pub(super) fn parse_frame_header<'a>(
    data: &'a [u8],
    tag: FrameTag,
    state: &mut PersistentState,
) -> Vp8Result<(FrameHeader, RangeDecoder<'a>)> {
    let first_start = tag.header_len();
    let first_end = first_start + tag.first_part_size;
    let mut rd = RangeDecoder::new(&data[first_start..first_end]);

    let mut color_space = ColorSpace::Bt470bg;
    let mut clamping_required = true;
    if tag.keyframe {
        state.reset_for_keyframe();
        color_space = ColorSpace::from_vp8_bit(rd.read_flag());
        clamping_required = !rd.read_flag();
        if color_space == ColorSpace::Reserved {
            warn!("VP8: 码流声明了保留色彩空间");
        }
    }

    parse_segmentation(&mut rd, &mut state.segmentation);

    let filter_type = if rd.read_flag() {
        FilterType::Simple
    } else {
        FilterType::Normal
    };
    let filter_level = rd.read_literal(6) as u8;
    let sharpness = rd.read_literal(3) as u8;

    state.lf_deltas.enabled = rd.read_flag();
    if state.lf_deltas.enabled && rd.read_flag() {
        for delta in state.lf_deltas.ref_frame.iter_mut() {
            if rd.read_flag() {
                *delta = rd.read_signed_literal(6) as i8;
            }
        }
        for delta in state.lf_deltas.mode.iter_mut() {
            if rd.read_flag() {
                *delta = rd.read_signed_literal(6) as i8;
            }
        }
    }

    let partitions = parse_partitions(&mut rd, data, first_end)?;

    let quant = QuantIndices {
        y_ac: rd.read_literal(7) as i32,
        y_dc_delta: rd.read_optional_signed(4),
        y2_dc_delta: rd.read_optional_signed(4),
        y2_ac_delta: rd.read_optional_signed(4),
        uv_dc_delta: rd.read_optional_signed(4),
        uv_ac_delta: rd.read_optional_signed(4),
    };

    let mut refresh_golden = true;
    let mut refresh_altref = true;
    let mut copy_to_golden = 0;
    let mut copy_to_altref = 0;
    let mut sign_bias = [false; 4];
    if !tag.keyframe {
        refresh_golden = rd.read_flag();
        refresh_altref = rd.read_flag();
        if !refresh_golden {
            copy_to_golden = rd.read_literal(2) as u8;
        }
        if !refresh_altref {
            copy_to_altref = rd.read_literal(2) as u8;
        }
        if copy_to_golden == 3 || copy_to_altref == 3 {
            warn!(
                "VP8: 未定义的参考帧复制码 (golden {}, altref {})",
                copy_to_golden, copy_to_altref
            );
        }
        sign_bias[RefFrame::Golden as usize] = rd.read_flag();
        sign_bias[RefFrame::AltRef as usize] = rd.read_flag();
    }

    let refresh_entropy = rd.read_flag();
    let saved_probs = if refresh_entropy {
        None
    } else {
        Some(state.probs.clone())
    };

    let refresh_last = tag.keyframe || rd.read_flag();

    update_token_probs(&mut rd, &mut state.probs.token);

    let skip_enabled = rd.read_flag();
    let prob_skip = if skip_enabled {
        rd.read_literal(8) as u8
    } else {
        0
    };

    let mut prob_intra = 0;
    let mut prob_last = 0;
    let mut prob_golden = 0;
    if !tag.keyframe {
        prob_intra = rd.read_literal(8) as u8;
        prob_last = rd.read_literal(8) as u8;
        prob_golden = rd.read_literal(8) as u8;

        if rd.read_flag() {
            for p in state.probs.ymode.iter_mut() {
                *p = rd.read_literal(8) as u8;
            }
        }
        if rd.read_flag() {
            for p in state.probs.uv_mode.iter_mut() {
                *p = rd.read_literal(8) as u8;
            }
        }
        update_mv_probs(&mut rd, &mut state.probs.mv);
    }

    debug!(
        "VP8: {} 帧, profile {}, 分区 {}, yac {}, 滤波 {:?}/{}/{}, 分段 {}, 钳位 {}, 保留概率 {}",
        if tag.keyframe { "关键" } else { "帧间" },
        tag.profile,
        partitions.len(),
        quant.y_ac,
        filter_type,
        filter_level,
        sharpness,
        state.segmentation.enabled,
        clamping_required,
        refresh_entropy,
    );

    let header = FrameHeader {
        tag,
        color_space,
        filter_type,
        filter_level,
        sharpness,
        partitions,
        quant,
        refresh_golden,
        refresh_altref,
        copy_to_golden,
        copy_to_altref,
        sign_bias,
        refresh_last,
        skip_enabled,
        prob_skip,
        prob_intra,
        prob_last,
        prob_golden,
        saved_probs,
    };
    Ok((header, rd))
}

/// 分段参数
fn parse_segmentation(rd: &mut RangeDecoder<'_>, seg: &mut Segmentation) {
    seg.enabled = rd.read_flag();
    if !seg.enabled {
        seg.update_map = false;
        seg.update_data = false;
        return;
    }

    seg.update_map = rd.read_flag();
    seg.update_data = rd.read_flag();
    if seg.update_data {
        seg.absolute_values = rd.read_flag();
        for q in seg.quant.iter_mut() {
            *q = rd.read_optional_signed(7) as i8;
        }
        for lf in seg.filter_level.iter_mut() {
            *lf = rd.read_optional_signed(6) as i8;
        }
    }
    if seg.update_map {
        for p in seg.tree_probs.iter_mut() {
            *p = rd.read_optional_prob(255);
        }
    }
}

/// 系数分区表: 分区数 (2 位对数) 以及除最后一个分区外的 3 字节小端大小
fn parse_partitions(
    rd: &mut RangeDecoder<'_>,
    data: &[u8],
    start: usize,
) -> Vp8Result<Vec<Range<usize>>> {
    let count = 1usize << rd.read_literal(2);
    debug_assert!(count <= MAX_PARTITIONS);
    let table_len = 3 * (count - 1);
    if start + table_len > data.len() {
        return Err(Vp8Error::InvalidData(format!(
            "VP8: 分区表被截断, 需要 {} 字节",
            table_len
        )));
    }

    let mut partitions = Vec::with_capacity(MAX_PARTITIONS);
    let mut offset = start + table_len;
    for i in 0..count - 1 {
        let size = LittleEndian::read_u24(&data[start + 3 * i..start + 3 * i + 3]) as usize;
        if offset + size > data.len() {
            return Err(Vp8Error::InvalidData(format!(
                "VP8: 分区 {} 大小 {} 超出数据范围",
                i, size
            )));
        }
        partitions.push(offset..offset + size);
        offset += size;
    }
    partitions.push(offset..data.len());
    Ok(partitions)
}

/// 系数概率增量更新, 每个节点由各自的更新概率门控
fn update_token_probs(rd: &mut RangeDecoder<'_>, token: &mut TokenProbs) {
    for (plane, plane_probs) in token.iter_mut().enumerate() {
        for (band, band_probs) in plane_probs.iter_mut().enumerate() {
            for (ctx, ctx_probs) in band_probs.iter_mut().enumerate() {
                for node in 0..NUM_TOKEN_PROBS {
                    if rd.read_bool(COEFF_UPDATE_PROBS[plane][band][ctx][node]) {
                        ctx_probs[node] = rd.read_literal(8) as u8;
                    }
                }
            }
        }
    }
}

/// 运动矢量概率更新: 7 位值 v 映射为 `v << 1`, 0 映射为 1
fn update_mv_probs(rd: &mut RangeDecoder<'_>, mv: &mut [[u8; MV_PROB_COUNT]; 2]) {
    for (component, probs) in mv.iter_mut().enumerate() {
        for (i, p) in probs.iter_mut().enumerate() {
            if rd.read_bool(MV_UPDATE_PROBS[component][i]) {
                let v = (rd.read_literal(7) as u8) << 1;
                *p = if v == 0 { 1 } else { v };
            }
        }
    }
}
