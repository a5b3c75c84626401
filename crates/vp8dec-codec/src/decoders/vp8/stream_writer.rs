//! 合成 VP8 码流写入器 (测试与基准测试用).
//!
//! 不做任何码率决策: 调用方逐宏块给出预测模式与量化后的系数,
//! 写入器按解码器的上下文规则生成合法码流. 宏块邻居、运动矢量候选、
//! 非零系数上下文与持久概率均按解码器的方式跟踪, 因此多帧序列可以连续写出.

use super::header::ProbabilityContext;
use super::modes::{
    BMode, IntraMode, MacroblockGrid, MacroblockInfo, MbMode, MotionVector, Partitioning,
    clamp_mv, find_near_mvs, submv_context,
};
use super::references::RefFrame;
use super::tables::{
    BMODE_TREE, COEFF_BANDS, COEFF_UPDATE_PROBS, DCT_CAT_BASE, DCT_CAT_PROBS, INTER_BMODE_PROBS,
    KEYFRAME_BMODE_PROBS, KEYFRAME_UV_MODE_PROBS, KEYFRAME_YMODE_PROBS, KEYFRAME_YMODE_TREE,
    MBSPLIT_PROBS, MODE_CONTEXTS, MV_PROB_COUNT, MV_UPDATE_PROBS, NUM_TOKEN_PROBS,
    SEGMENT_ID_TREE, SUBMV_PROBS, TokenProbs, UV_MODE_TREE, YMODE_TREE, ZIGZAG,
};

// ============================================================
// 布尔熵编码器
// ============================================================

/// 布尔熵编码器, 与解码器的 range decoder 互逆
pub struct BoolEncoder {
    output: Vec<u8>,
    range: u32,
    bottom: u32,
    bit_count: i32,
}

impl Default for BoolEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BoolEncoder {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            range: 255,
            bottom: 0,
            bit_count: 24,
        }
    }

    /// 按概率 `prob` (bit 为 0 的概率 * 256) 编码 1 位
    pub fn put_bool(&mut self, bit: bool, prob: u8) {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        if bit {
            self.bottom = self.bottom.wrapping_add(split);
            self.range -= split;
        } else {
            self.range = split;
        }

        while self.range < 128 {
            self.range <<= 1;
            if self.bottom & (1 << 31) != 0 {
                self.propagate_carry();
            }
            self.bottom <<= 1;
            self.bit_count -= 1;
            if self.bit_count == 0 {
                self.output.push((self.bottom >> 24) as u8);
                self.bottom &= (1 << 24) - 1;
                self.bit_count = 8;
            }
        }
    }

    /// 等概率编码 1 位
    pub fn put_flag(&mut self, bit: bool) {
        self.put_bool(bit, 128);
    }

    /// n 位无符号数, 高位在前
    pub fn put_literal(&mut self, value: u32, bits: u32) {
        for i in (0..bits).rev() {
            self.put_flag((value >> i) & 1 != 0);
        }
    }

    /// n 位幅值后跟符号位
    pub fn put_signed_literal(&mut self, value: i32, bits: u32) {
        self.put_literal(value.unsigned_abs(), bits);
        self.put_flag(value < 0);
    }

    /// 可选有符号字段: 0 只写一个 0 标志位
    pub fn put_optional_signed(&mut self, value: i32, bits: u32) {
        self.put_flag(value != 0);
        if value != 0 {
            self.put_signed_literal(value, bits);
        }
    }

    /// 按二叉树编码符号 `leaf`, 树中不存在该符号时不写任何位
    pub fn put_tree(&mut self, tree: &[i8], probs: &[u8], leaf: usize) {
        let mut path = Vec::new();
        if tree_path(tree, 0, leaf, &mut path) {
            for (node, bit) in path {
                self.put_bool(bit, probs[node >> 1]);
            }
        }
    }

    fn propagate_carry(&mut self) {
        for byte in self.output.iter_mut().rev() {
            if *byte == 255 {
                *byte = 0;
            } else {
                *byte += 1;
                return;
            }
        }
    }

    /// 结束编码, 输出剩余位
    pub fn finish(mut self) -> Vec<u8> {
        let c = self.bit_count;
        let mut v = self.bottom;
        if v & (1 << (32 - c)) != 0 {
            self.propagate_carry();
        }
        v <<= c & 7;
        for _ in 0..(c >> 3) {
            v <<= 8;
        }
        for _ in 0..4 {
            self.output.push((v >> 24) as u8);
            v <<= 8;
        }
        self.output
    }
}

fn tree_path(tree: &[i8], node: usize, leaf: usize, path: &mut Vec<(usize, bool)>) -> bool {
    for bit in [false, true] {
        let next = tree[node + usize::from(bit)];
        path.push((node, bit));
        let found = if next <= 0 {
            usize::from(next.unsigned_abs()) == leaf
        } else {
            tree_path(tree, next as usize, leaf, path)
        };
        if found {
            return true;
        }
        path.pop();
    }
    false
}

// ============================================================
// 帧描述
// ============================================================

/// 16x16 亮度与色度帧内模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntraPred {
    #[default]
    Dc,
    V,
    H,
    Tm,
}

/// 4x4 子块帧内模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubblockPred {
    #[default]
    Dc,
    Tm,
    Ve,
    He,
    Ld,
    Rd,
    Vr,
    Vl,
    Hd,
    Hu,
}

/// 亮度预测方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LumaPred {
    /// 整块 16x16 预测
    Whole(IntraPred),
    /// 16 个 4x4 子块, 光栅顺序
    Subblocks([SubblockPred; 16]),
}

/// 帧间宏块的参考帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reference {
    #[default]
    Last,
    Golden,
    AltRef,
}

/// SPLIT 分割方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitLayout {
    Top16x8,
    Left8x16,
    Quarters,
    Each4x4,
}

/// 运动矢量模式, 矢量单位为 1/4 亮度像素, 顺序 (x, y)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Motion {
    #[default]
    Zero,
    Nearest,
    Near,
    /// 目标矢量 (写入相对于最佳候选的差值)
    New(i16, i16),
    /// 各分区的目标矢量, 按分区号顺序, 缺省为零矢量
    Split(SplitLayout, Vec<(i16, i16)>),
}

/// 宏块预测方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prediction {
    Intra { luma: LumaPred, chroma: IntraPred },
    Inter { reference: Reference, motion: Motion },
}

/// 一个宏块的量化系数 (块内光栅顺序, 尚未乘量化步长)
///
/// 带 Y2 的宏块忽略亮度块的 DC 位置.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residual {
    pub y2: [i16; 16],
    /// 0..16 亮度, 16..20 U, 20..24 V
    pub blocks: [[i16; 16]; 24],
}

impl Default for Residual {
    fn default() -> Self {
        Self {
            y2: [0; 16],
            blocks: [[0; 16]; 24],
        }
    }
}

impl Residual {
    /// 只有 Y2 直流分量的残差
    pub fn y2_dc(value: i16) -> Self {
        let mut residual = Self::default();
        residual.y2[0] = value;
        residual
    }
}

/// 宏块描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroblockSpec {
    pub prediction: Prediction,
    /// 启用分段且更新分段图时写入的段号
    pub segment: u8,
    /// None 表示无残差
    pub residual: Option<Residual>,
}

impl MacroblockSpec {
    /// 帧内 16x16 预测, 无残差
    pub fn intra(luma: IntraPred, chroma: IntraPred) -> Self {
        Self {
            prediction: Prediction::Intra {
                luma: LumaPred::Whole(luma),
                chroma,
            },
            segment: 0,
            residual: None,
        }
    }

    /// 帧间预测, 无残差
    pub fn inter(reference: Reference, motion: Motion) -> Self {
        Self {
            prediction: Prediction::Inter { reference, motion },
            segment: 0,
            residual: None,
        }
    }

    pub fn with_residual(mut self, residual: Residual) -> Self {
        self.residual = Some(residual);
        self
    }

    pub fn with_segment(mut self, segment: u8) -> Self {
        self.segment = segment;
        self
    }
}

/// 分段参数
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SegmentationSpec {
    pub update_map: bool,
    /// None 表示不更新分段数据
    pub data: Option<SegmentData>,
    pub tree_probs: [u8; 3],
}

/// 分段数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentData {
    pub absolute: bool,
    pub quant: [i8; 4],
    pub filter_level: [i8; 4],
}

/// 环路滤波增量 (按参考帧与模式)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterDeltaSpec {
    /// None 表示启用增量但不更新取值
    pub update: Option<([i8; 4], [i8; 4])>,
}

/// 一帧的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSpec {
    pub keyframe: bool,
    /// 关键帧尺寸
    pub width: u16,
    pub height: u16,
    pub horizontal_scale: u8,
    pub vertical_scale: u8,
    pub profile: u8,
    pub show_frame: bool,
    /// 关键帧色彩空间位 (1 为保留值)
    pub color_space_bit: bool,
    pub segmentation: Option<SegmentationSpec>,
    pub simple_filter: bool,
    pub filter_level: u8,
    pub sharpness: u8,
    pub filter_deltas: Option<FilterDeltaSpec>,
    /// 系数分区数的对数 (0..=3)
    pub log2_partitions: u8,
    pub q_index: u8,
    /// y_dc, y2_dc, y2_ac, uv_dc, uv_ac 增量
    pub q_deltas: [i8; 5],
    pub refresh_golden: bool,
    pub refresh_altref: bool,
    /// 未刷新时 golden 的复制来源: 1 = last, 2 = altref
    pub copy_to_golden: u8,
    /// 未刷新时 altref 的复制来源: 1 = last, 2 = golden
    pub copy_to_altref: u8,
    pub sign_bias_golden: bool,
    pub sign_bias_altref: bool,
    pub refresh_entropy: bool,
    pub refresh_last: bool,
    /// (平面类型, 频带, 上下文, 节点, 新概率)
    pub token_updates: Vec<(usize, usize, usize, usize, u8)>,
    /// None 时不写跳过标志
    pub skip_prob: Option<u8>,
    pub prob_intra: u8,
    pub prob_last: u8,
    pub prob_golden: u8,
    pub ymode_probs: Option<[u8; 4]>,
    pub uv_mode_probs: Option<[u8; 3]>,
    /// (分量 0 = 垂直 / 1 = 水平, 下标, 7 位值)
    pub mv_updates: Vec<(usize, usize, u8)>,
    /// 按光栅顺序; 不足的宏块使用默认描述
    pub macroblocks: Vec<MacroblockSpec>,
}

impl FrameSpec {
    /// 关键帧, 默认全部宏块为 DC 预测且无残差
    pub fn keyframe(width: u16, height: u16) -> Self {
        Self {
            keyframe: true,
            width,
            height,
            ..Self::inter()
        }
    }

    /// 帧间帧, 默认全部宏块为 last 参考零运动且无残差
    pub fn inter() -> Self {
        Self {
            keyframe: false,
            width: 0,
            height: 0,
            horizontal_scale: 0,
            vertical_scale: 0,
            profile: 0,
            show_frame: true,
            color_space_bit: false,
            segmentation: None,
            simple_filter: false,
            filter_level: 0,
            sharpness: 0,
            filter_deltas: None,
            log2_partitions: 0,
            q_index: 0,
            q_deltas: [0; 5],
            refresh_golden: false,
            refresh_altref: false,
            copy_to_golden: 0,
            copy_to_altref: 0,
            sign_bias_golden: false,
            sign_bias_altref: false,
            refresh_entropy: true,
            refresh_last: true,
            token_updates: Vec::new(),
            skip_prob: Some(128),
            prob_intra: 128,
            prob_last: 128,
            prob_golden: 128,
            ymode_probs: None,
            uv_mode_probs: None,
            mv_updates: Vec::new(),
            macroblocks: Vec::new(),
        }
    }

    fn default_macroblock(&self) -> MacroblockSpec {
        if self.keyframe {
            MacroblockSpec::intra(IntraPred::Dc, IntraPred::Dc)
        } else {
            MacroblockSpec::inter(Reference::Last, Motion::Zero)
        }
    }
}

// ============================================================
// 写入器
// ============================================================

/// 多帧码流写入器, 跟踪与解码器一致的跨帧状态
#[derive(Default)]
pub struct StreamWriter {
    probs: ProbabilityContext,
    grid: Option<MacroblockGrid>,
}

/// 一帧内的宏块级上下文
struct FrameContext {
    bmode_top: Vec<[BMode; 4]>,
    bmode_left: [BMode; 4],
    nnz_top: Vec<[u8; 9]>,
    nnz_left: [u8; 9],
}

impl StreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前宏块尺寸 (宽, 高), 首个关键帧之前为 None
    pub fn mb_size(&self) -> Option<(usize, usize)> {
        self.grid.as_ref().map(|g| (g.mb_width(), g.mb_height()))
    }

    /// 写出一帧
    ///
    /// 帧间帧必须在关键帧之后写出; 否则按 1x1 宏块处理.
    pub fn write_frame(&mut self, spec: &FrameSpec) -> Vec<u8> {
        if spec.keyframe {
            self.probs = ProbabilityContext::default();
            let mb_w = usize::from(spec.width).div_ceil(16).max(1);
            let mb_h = usize::from(spec.height).div_ceil(16).max(1);
            if self.mb_size() != Some((mb_w, mb_h)) {
                self.grid = MacroblockGrid::try_new(mb_w, mb_h).ok();
            }
        }
        let saved = self.probs.clone();
        let (mb_w, mb_h) = self.mb_size().unwrap_or((1, 1));

        let mut enc = BoolEncoder::new();
        self.write_header(&mut enc, spec);

        let partition_count = 1usize << spec.log2_partitions.min(3);
        let mut partitions: Vec<BoolEncoder> =
            (0..partition_count).map(|_| BoolEncoder::new()).collect();
        let mut ctx = FrameContext {
            bmode_top: vec![[BMode::Dc; 4]; mb_w],
            bmode_left: [BMode::Dc; 4],
            nnz_top: vec![[0; 9]; mb_w],
            nnz_left: [0; 9],
        };
        let update_map = spec
            .segmentation
            .as_ref()
            .filter(|s| s.update_map)
            .map(|s| s.tree_probs);

        for mb_y in 0..mb_h {
            ctx.bmode_left = [BMode::Dc; 4];
            ctx.nnz_left = [0; 9];
            let part = &mut partitions[mb_y & (partition_count - 1)];
            for mb_x in 0..mb_w {
                let mb_spec = spec
                    .macroblocks
                    .get(mb_y * mb_w + mb_x)
                    .cloned()
                    .unwrap_or_else(|| spec.default_macroblock());

                if let Some(tree_probs) = update_map {
                    enc.put_tree(&SEGMENT_ID_TREE, &tree_probs, usize::from(mb_spec.segment & 3));
                }
                let skip = mb_spec.residual.is_none();
                if let Some(prob) = spec.skip_prob {
                    enc.put_bool(skip, prob);
                }

                let info = self.write_modes(&mut enc, spec, &mut ctx, &mb_spec, mb_x, mb_y);
                let has_y2 = info.has_y2();
                match (&mb_spec.residual, spec.skip_prob) {
                    (None, Some(_)) => {
                        let top = &mut ctx.nnz_top[mb_x];
                        let left = &mut ctx.nnz_left;
                        let y2 = (top[8], left[8]);
                        *top = [0; 9];
                        *left = [0; 9];
                        if !has_y2 {
                            top[8] = y2.0;
                            left[8] = y2.1;
                        }
                    }
                    (residual, _) => {
                        let empty = Residual::default();
                        let residual = residual.as_ref().unwrap_or(&empty);
                        self.write_residual(part, &mut ctx, mb_x, has_y2, residual);
                    }
                }
            }
        }

        if !spec.refresh_entropy {
            self.probs = saved;
        }

        let first = enc.finish();
        let partitions: Vec<Vec<u8>> = partitions.into_iter().map(BoolEncoder::finish).collect();
        assemble(spec, &first, &partitions)
    }

    fn write_header(&mut self, enc: &mut BoolEncoder, spec: &FrameSpec) {
        if spec.keyframe {
            enc.put_flag(spec.color_space_bit);
            enc.put_flag(false);
        }

        enc.put_flag(spec.segmentation.is_some());
        if let Some(seg) = &spec.segmentation {
            enc.put_flag(seg.update_map);
            enc.put_flag(seg.data.is_some());
            if let Some(data) = &seg.data {
                enc.put_flag(data.absolute);
                for &q in &data.quant {
                    enc.put_optional_signed(i32::from(q), 7);
                }
                for &lf in &data.filter_level {
                    enc.put_optional_signed(i32::from(lf), 6);
                }
            }
            if seg.update_map {
                for &p in &seg.tree_probs {
                    enc.put_flag(p != 255);
                    if p != 255 {
                        enc.put_literal(u32::from(p), 8);
                    }
                }
            }
        }

        enc.put_flag(spec.simple_filter);
        enc.put_literal(u32::from(spec.filter_level), 6);
        enc.put_literal(u32::from(spec.sharpness), 3);

        enc.put_flag(spec.filter_deltas.is_some());
        if let Some(deltas) = &spec.filter_deltas {
            enc.put_flag(deltas.update.is_some());
            if let Some((ref_deltas, mode_deltas)) = deltas.update {
                for value in ref_deltas.into_iter().chain(mode_deltas) {
                    enc.put_flag(true);
                    enc.put_signed_literal(i32::from(value), 6);
                }
            }
        }

        enc.put_literal(u32::from(spec.log2_partitions.min(3)), 2);

        enc.put_literal(u32::from(spec.q_index & 0x7f), 7);
        for &delta in &spec.q_deltas {
            enc.put_optional_signed(i32::from(delta), 4);
        }

        if !spec.keyframe {
            enc.put_flag(spec.refresh_golden);
            enc.put_flag(spec.refresh_altref);
            if !spec.refresh_golden {
                enc.put_literal(u32::from(spec.copy_to_golden), 2);
            }
            if !spec.refresh_altref {
                enc.put_literal(u32::from(spec.copy_to_altref), 2);
            }
            enc.put_flag(spec.sign_bias_golden);
            enc.put_flag(spec.sign_bias_altref);
        }

        enc.put_flag(spec.refresh_entropy);
        if !spec.keyframe {
            enc.put_flag(spec.refresh_last);
        }

        write_token_updates(enc, &mut self.probs.token, &spec.token_updates);

        enc.put_flag(spec.skip_prob.is_some());
        if let Some(prob) = spec.skip_prob {
            enc.put_literal(u32::from(prob), 8);
        }

        if !spec.keyframe {
            enc.put_literal(u32::from(spec.prob_intra), 8);
            enc.put_literal(u32::from(spec.prob_last), 8);
            enc.put_literal(u32::from(spec.prob_golden), 8);

            enc.put_flag(spec.ymode_probs.is_some());
            if let Some(probs) = spec.ymode_probs {
                for p in probs {
                    enc.put_literal(u32::from(p), 8);
                }
                self.probs.ymode = probs;
            }
            enc.put_flag(spec.uv_mode_probs.is_some());
            if let Some(probs) = spec.uv_mode_probs {
                for p in probs {
                    enc.put_literal(u32::from(p), 8);
                }
                self.probs.uv_mode = probs;
            }

            for component in 0..2 {
                for i in 0..MV_PROB_COUNT {
                    let update = spec
                        .mv_updates
                        .iter()
                        .find(|&&(c, index, _)| c == component && index == i);
                    enc.put_bool(update.is_some(), MV_UPDATE_PROBS[component][i]);
                    if let Some(&(_, _, value)) = update {
                        let value = value & 0x7f;
                        enc.put_literal(u32::from(value), 7);
                        self.probs.mv[component][i] = if value == 0 { 1 } else { value << 1 };
                    }
                }
            }
        }
    }

    /// 写出宏块模式并在宏块表中记录解码器将得到的结果
    fn write_modes(
        &mut self,
        enc: &mut BoolEncoder,
        spec: &FrameSpec,
        ctx: &mut FrameContext,
        mb_spec: &MacroblockSpec,
        mb_x: usize,
        mb_y: usize,
    ) -> MacroblockInfo {
        let mut info = MacroblockInfo {
            segment: mb_spec.segment & 3,
            skip: mb_spec.residual.is_none(),
            ..MacroblockInfo::default()
        };
        let Some(grid) = self.grid.as_mut() else {
            return info;
        };
        if spec.segmentation.as_ref().is_none_or(|s| !s.update_map) {
            info.segment = grid.get(mb_x, mb_y).segment;
        }

        match &mb_spec.prediction {
            Prediction::Intra { luma, chroma } => {
                if !spec.keyframe {
                    enc.put_bool(false, spec.prob_intra);
                }
                let top = &mut ctx.bmode_top[mb_x];
                let left = &mut ctx.bmode_left;
                match luma {
                    LumaPred::Whole(mode) => {
                        let mode = intra_mode(*mode);
                        if spec.keyframe {
                            enc.put_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, mode as usize);
                        } else {
                            enc.put_tree(&YMODE_TREE, &self.probs.ymode, mode as usize);
                        }
                        info.mode = MbMode::Intra16(mode);
                        let implied = mode.implied_bmode();
                        info.bmodes = [implied; 16];
                        *top = [implied; 4];
                        *left = [implied; 4];
                    }
                    LumaPred::Subblocks(modes) => {
                        if spec.keyframe {
                            enc.put_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, 4);
                        } else {
                            enc.put_tree(&YMODE_TREE, &self.probs.ymode, 4);
                        }
                        info.mode = MbMode::Intra4x4;
                        for (i, &pred) in modes.iter().enumerate() {
                            let bmode = subblock_mode(pred);
                            let (x, y) = (i % 4, i / 4);
                            if spec.keyframe {
                                let probs = &KEYFRAME_BMODE_PROBS[top[x] as usize][left[y] as usize];
                                enc.put_tree(&BMODE_TREE, probs, bmode as usize);
                            } else {
                                enc.put_tree(&BMODE_TREE, &INTER_BMODE_PROBS, bmode as usize);
                            }
                            info.bmodes[i] = bmode;
                            top[x] = bmode;
                            left[y] = bmode;
                        }
                    }
                }
                let chroma = intra_mode(*chroma);
                if spec.keyframe {
                    enc.put_tree(&UV_MODE_TREE, &KEYFRAME_UV_MODE_PROBS, chroma as usize);
                } else {
                    enc.put_tree(&UV_MODE_TREE, &self.probs.uv_mode, chroma as usize);
                }
                info.chroma_mode = chroma;
            }
            Prediction::Inter { reference, motion } => {
                enc.put_bool(true, spec.prob_intra);
                info.ref_frame = match reference {
                    Reference::Last => RefFrame::Previous,
                    Reference::Golden => RefFrame::Golden,
                    Reference::AltRef => RefFrame::AltRef,
                };
                enc.put_bool(*reference != Reference::Last, spec.prob_last);
                if *reference != Reference::Last {
                    enc.put_bool(*reference == Reference::AltRef, spec.prob_golden);
                }

                let mut sign_bias = [false; 4];
                sign_bias[RefFrame::Golden as usize] = spec.sign_bias_golden;
                sign_bias[RefFrame::AltRef as usize] = spec.sign_bias_altref;
                let near = find_near_mvs(grid, mb_x, mb_y, info.ref_frame, &sign_bias);
                let (mb_w, mb_h) = (grid.mb_width(), grid.mb_height());
                let clamp = |mv: MotionVector| clamp_mv(mv, mb_x, mb_y, mb_w, mb_h);
                let depth = match motion {
                    Motion::Zero => 0,
                    Motion::Nearest => 1,
                    Motion::Near => 2,
                    Motion::New(..) => 3,
                    Motion::Split(..) => 4,
                };
                for level in 0..4 {
                    if level > depth {
                        break;
                    }
                    enc.put_bool(level < depth, MODE_CONTEXTS[near.counts[level]][level]);
                }

                let mv_probs = self.probs.mv;
                match motion {
                    Motion::Zero => info.mode = MbMode::Zero,
                    Motion::Nearest => {
                        info.mode = MbMode::Nearest;
                        info.mv = clamp(near.nearest);
                    }
                    Motion::Near => {
                        info.mode = MbMode::Near;
                        info.mv = clamp(near.near);
                    }
                    Motion::New(x, y) => {
                        info.mode = MbMode::New;
                        let best = clamp(near.best);
                        let target = MotionVector::new(*x, *y);
                        put_mv(enc, target, best, &mv_probs);
                        info.mv = target;
                    }
                    Motion::Split(layout, mvs) => {
                        info.mode = MbMode::Split;
                        let best = clamp(near.best);
                        write_split(enc, grid, &mut info, mb_x, mb_y, *layout, mvs, best, &mv_probs);
                        info.mv = info.bmv[info.partitioning.count() - 1];
                    }
                }
                if info.mode != MbMode::Split {
                    info.partitioning = Partitioning::None;
                    info.bmv[0] = info.mv;
                }
            }
        }

        grid.set(mb_x, mb_y, info);
        info
    }

    /// 写出一个宏块的系数 token, 维护非零上下文
    fn write_residual(
        &self,
        enc: &mut BoolEncoder,
        ctx: &mut FrameContext,
        mb_x: usize,
        has_y2: bool,
        residual: &Residual,
    ) {
        let probs = &self.probs.token;
        let top = &mut ctx.nnz_top[mb_x];
        let left = &mut ctx.nnz_left;

        let (luma_plane, start) = if has_y2 {
            let nz = write_block(enc, &probs[1], usize::from(top[8] + left[8]), 0, &residual.y2);
            top[8] = u8::from(nz);
            left[8] = u8::from(nz);
            (0, 1)
        } else {
            (3, 0)
        };

        for y in 0..4 {
            for x in 0..4 {
                let block = &residual.blocks[y * 4 + x];
                let nz = write_block(enc, &probs[luma_plane], usize::from(top[x] + left[y]), start, block);
                top[x] = u8::from(nz);
                left[y] = u8::from(nz);
            }
        }

        for plane in 0..2 {
            let base = 4 + plane * 2;
            for y in 0..2 {
                for x in 0..2 {
                    let block = &residual.blocks[16 + plane * 4 + y * 2 + x];
                    let ctx_index = usize::from(top[base + x] + left[base + y]);
                    let nz = write_block(enc, &probs[2], ctx_index, 0, block);
                    top[base + x] = u8::from(nz);
                    left[base + y] = u8::from(nz);
                }
            }
        }
    }
}

fn intra_mode(pred: IntraPred) -> IntraMode {
    match pred {
        IntraPred::Dc => IntraMode::Dc,
        IntraPred::V => IntraMode::V,
        IntraPred::H => IntraMode::H,
        IntraPred::Tm => IntraMode::Tm,
    }
}

fn subblock_mode(pred: SubblockPred) -> BMode {
    match pred {
        SubblockPred::Dc => BMode::Dc,
        SubblockPred::Tm => BMode::Tm,
        SubblockPred::Ve => BMode::Ve,
        SubblockPred::He => BMode::He,
        SubblockPred::Ld => BMode::Ld,
        SubblockPred::Rd => BMode::Rd,
        SubblockPred::Vr => BMode::Vr,
        SubblockPred::Vl => BMode::Vl,
        SubblockPred::Hd => BMode::Hd,
        SubblockPred::Hu => BMode::Hu,
    }
}

fn write_token_updates(
    enc: &mut BoolEncoder,
    token: &mut TokenProbs,
    updates: &[(usize, usize, usize, usize, u8)],
) {
    for (plane, plane_probs) in token.iter_mut().enumerate() {
        for (band, band_probs) in plane_probs.iter_mut().enumerate() {
            for (ctx, ctx_probs) in band_probs.iter_mut().enumerate() {
                for node in 0..NUM_TOKEN_PROBS {
                    let update = updates
                        .iter()
                        .find(|u| (u.0, u.1, u.2, u.3) == (plane, band, ctx, node));
                    enc.put_bool(update.is_some(), COEFF_UPDATE_PROBS[plane][band][ctx][node]);
                    if let Some(&(.., prob)) = update {
                        enc.put_literal(u32::from(prob), 8);
                        ctx_probs[node] = prob;
                    }
                }
            }
        }
    }
}

/// 写入 `target - best`, 先垂直后水平
fn put_mv(
    enc: &mut BoolEncoder,
    target: MotionVector,
    best: MotionVector,
    probs: &[[u8; MV_PROB_COUNT]; 2],
) {
    put_mv_component(enc, target.y.wrapping_sub(best.y), &probs[0]);
    put_mv_component(enc, target.x.wrapping_sub(best.x), &probs[1]);
}

pub(super) fn put_mv_component(enc: &mut BoolEncoder, value: i16, p: &[u8; MV_PROB_COUNT]) {
    let x = value.unsigned_abs().min(1023);
    if x >= 8 {
        enc.put_bool(true, p[0]);
        for i in 0..3 {
            enc.put_bool((x >> i) & 1 != 0, p[9 + i]);
        }
        for i in (4..=9).rev() {
            enc.put_bool((x >> i) & 1 != 0, p[9 + i]);
        }
        if x & !0xf != 0 {
            enc.put_bool((x >> 3) & 1 != 0, p[12]);
        }
    } else {
        enc.put_bool(false, p[0]);
        let b2 = (x >> 2) & 1 != 0;
        let b1 = (x >> 1) & 1 != 0;
        enc.put_bool(b2, p[2]);
        let base = if b2 { 6 } else { 3 };
        enc.put_bool(b1, p[base]);
        enc.put_bool(x & 1 != 0, p[base + 1 + usize::from(b1)]);
    }
    if x != 0 {
        enc.put_bool(value < 0, p[1]);
    }
}

#[allow(clippy::too_many_arguments)]
fn write_split(
    enc: &mut BoolEncoder,
    grid: &MacroblockGrid,
    info: &mut MacroblockInfo,
    mb_x: usize,
    mb_y: usize,
    layout: SplitLayout,
    mvs: &[(i16, i16)],
    best: MotionVector,
    probs: &[[u8; MV_PROB_COUNT]; 2],
) {
    let partitioning = match layout {
        SplitLayout::Each4x4 => {
            enc.put_bool(false, MBSPLIT_PROBS[0]);
            Partitioning::Each4x4
        }
        SplitLayout::Quarters => {
            enc.put_bool(true, MBSPLIT_PROBS[0]);
            enc.put_bool(false, MBSPLIT_PROBS[1]);
            Partitioning::Quarters
        }
        SplitLayout::Top16x8 => {
            enc.put_bool(true, MBSPLIT_PROBS[0]);
            enc.put_bool(true, MBSPLIT_PROBS[1]);
            enc.put_bool(false, MBSPLIT_PROBS[2]);
            Partitioning::Top16x8
        }
        SplitLayout::Left8x16 => {
            enc.put_bool(true, MBSPLIT_PROBS[0]);
            enc.put_bool(true, MBSPLIT_PROBS[1]);
            enc.put_bool(true, MBSPLIT_PROBS[2]);
            Partitioning::Left8x16
        }
    };
    info.partitioning = partitioning;

    let [top_mb, left_mb, _] = grid.neighbors(mb_x, mb_y);
    let cur_map = partitioning.block_map();
    let left_map = left_mb.partitioning.block_map();
    let top_map = top_mb.partitioning.block_map();

    for (part, &k) in partitioning.first_blocks().iter().enumerate() {
        let left = if k & 3 == 0 {
            left_mb.bmv[left_map[k + 3]]
        } else {
            info.bmv[cur_map[k - 1]]
        };
        let above = if k <= 3 {
            top_mb.bmv[top_map[k + 12]]
        } else {
            info.bmv[cur_map[k - 4]]
        };
        let target = mvs
            .get(part)
            .map(|&(x, y)| MotionVector::new(x, y))
            .unwrap_or(MotionVector::ZERO);

        let p = &SUBMV_PROBS[submv_context(left, above)];
        if target == left {
            enc.put_bool(false, p[0]);
        } else {
            enc.put_bool(true, p[0]);
            if target == above {
                enc.put_bool(false, p[1]);
            } else {
                enc.put_bool(true, p[1]);
                if target.is_zero() {
                    enc.put_bool(false, p[2]);
                } else {
                    enc.put_bool(true, p[2]);
                    put_mv(enc, target, best, probs);
                }
            }
        }
        info.bmv[part] = target;
    }
}

/// 写出一个块的 token, 返回是否含非零系数
pub(super) fn write_block(
    enc: &mut BoolEncoder,
    probs: &[[[u8; 11]; 3]; 8],
    ctx: usize,
    start: usize,
    block: &[i16; 16],
) -> bool {
    let levels: [i16; 16] = std::array::from_fn(|i| block[ZIGZAG[i]]);
    let last = (start..16).rev().find(|&i| levels[i] != 0).map_or(0, |i| i + 1);

    let mut i = start;
    let mut p = &probs[COEFF_BANDS[i]][ctx];
    if last == 0 {
        enc.put_bool(false, p[0]);
        return false;
    }
    enc.put_bool(true, p[0]);

    loop {
        let value = levels[i];
        if value == 0 {
            enc.put_bool(false, p[1]);
            i += 1;
            p = &probs[COEFF_BANDS[i]][0];
            continue;
        }
        enc.put_bool(true, p[1]);

        let magnitude = i32::from(value.unsigned_abs()).min(DCT_CAT_BASE[5] + 2047);
        let next_ctx = if magnitude == 1 { 1 } else { 2 };
        put_magnitude(enc, p, magnitude);
        enc.put_flag(value < 0);

        i += 1;
        if i == 16 {
            return true;
        }
        p = &probs[COEFF_BANDS[i]][next_ctx];
        if i == last {
            enc.put_bool(false, p[0]);
            return true;
        }
        enc.put_bool(true, p[0]);
    }
}

fn put_magnitude(enc: &mut BoolEncoder, p: &[u8; 11], magnitude: i32) {
    if magnitude == 1 {
        enc.put_bool(false, p[2]);
        return;
    }
    enc.put_bool(true, p[2]);
    if magnitude <= 4 {
        enc.put_bool(false, p[3]);
        if magnitude == 2 {
            enc.put_bool(false, p[4]);
        } else {
            enc.put_bool(true, p[4]);
            enc.put_bool(magnitude == 4, p[5]);
        }
        return;
    }

    enc.put_bool(true, p[3]);
    let cat = DCT_CAT_BASE.iter().rposition(|&base| base <= magnitude).unwrap_or(0);
    if cat < 2 {
        enc.put_bool(false, p[6]);
        enc.put_bool(cat == 1, p[7]);
    } else {
        enc.put_bool(true, p[6]);
        let a = (cat - 2) >> 1;
        let b = (cat - 2) & 1;
        enc.put_bool(a != 0, p[8]);
        enc.put_bool(b != 0, p[9 + a]);
    }
    let extra = magnitude - DCT_CAT_BASE[cat];
    let probs = DCT_CAT_PROBS[cat];
    for (k, &prob) in probs.iter().enumerate() {
        let shift = probs.len() - 1 - k;
        enc.put_bool((extra >> shift) & 1 != 0, prob);
    }
}

/// 拼接帧标签、第一分区与系数分区
fn assemble(spec: &FrameSpec, first: &[u8], partitions: &[Vec<u8>]) -> Vec<u8> {
    let size = first.len() as u32;
    let tag = u32::from(!spec.keyframe)
        | (u32::from(spec.profile & 7) << 1)
        | (u32::from(spec.show_frame) << 4)
        | (size << 5);
    let mut out = Vec::new();
    out.extend_from_slice(&tag.to_le_bytes()[..3]);
    if spec.keyframe {
        out.extend_from_slice(&[0x9d, 0x01, 0x2a]);
        let w = (spec.width & 0x3fff) | (u16::from(spec.horizontal_scale & 3) << 14);
        let h = (spec.height & 0x3fff) | (u16::from(spec.vertical_scale & 3) << 14);
        out.extend_from_slice(&w.to_le_bytes());
        out.extend_from_slice(&h.to_le_bytes());
    }
    out.extend_from_slice(first);
    for part in &partitions[..partitions.len() - 1] {
        out.extend_from_slice(&(part.len() as u32).to_le_bytes()[..3]);
    }
    for part in partitions {
        out.extend_from_slice(part);
    }
    out
}
