//! 宏块模式与运动矢量解码.
//!
//! 每个宏块依次解码: 段号、跳过标志、帧内模式或 (参考帧, 运动矢量模式, 运动矢量).
//! 运动矢量候选来自上、左、左上三个邻居, 邻居表四周带一圈哨兵宏块
//! (帧内、零运动、无分割), 帧边界处无需特判.

use vp8dec_core::{Vp8Error, Vp8Result};

use super::header::{FrameHeader, ProbabilityContext, Segmentation};
use super::range_coder::RangeDecoder;
use super::references::RefFrame;
use super::tables::{
    BMODE_TREE, INTER_BMODE_PROBS, KEYFRAME_BMODE_PROBS, KEYFRAME_UV_MODE_PROBS,
    KEYFRAME_YMODE_PROBS, KEYFRAME_YMODE_TREE, MBSPLIT_PROBS, MODE_CONTEXTS, MV_PROB_COUNT,
    SEGMENT_ID_TREE, SUBMV_PROBS, UV_MODE_TREE, YMODE_TREE,
};

// ============================================================
// 基础类型
// ============================================================

/// 运动矢量, 单位为 1/4 亮度像素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct MotionVector {
    pub(super) x: i16,
    pub(super) y: i16,
}

impl MotionVector {
    pub(super) const ZERO: Self = Self { x: 0, y: 0 };

    pub(super) const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    pub(super) fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }

    fn negate(self) -> Self {
        Self {
            x: self.x.wrapping_neg(),
            y: self.y.wrapping_neg(),
        }
    }
}

/// 16x16 亮度与 8x8 色度的帧内模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum IntraMode {
    #[default]
    Dc,
    V,
    H,
    Tm,
}

impl IntraMode {
    fn from_leaf(leaf: usize) -> Self {
        match leaf {
            1 => Self::V,
            2 => Self::H,
            3 => Self::Tm,
            _ => Self::Dc,
        }
    }

    /// 非 4x4 宏块隐含的子块模式 (供后续宏块的上下文使用)
    pub(super) fn implied_bmode(self) -> BMode {
        match self {
            Self::Dc => BMode::Dc,
            Self::V => BMode::Ve,
            Self::H => BMode::He,
            Self::Tm => BMode::Tm,
        }
    }
}

/// 4x4 子块帧内模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum BMode {
    #[default]
    Dc = 0,
    Tm = 1,
    Ve = 2,
    He = 3,
    Ld = 4,
    Rd = 5,
    Vr = 6,
    Vl = 7,
    Hd = 8,
    Hu = 9,
}

impl BMode {
    pub(super) fn from_leaf(leaf: usize) -> Self {
        match leaf {
            1 => Self::Tm,
            2 => Self::Ve,
            3 => Self::He,
            4 => Self::Ld,
            5 => Self::Rd,
            6 => Self::Vr,
            7 => Self::Vl,
            8 => Self::Hd,
            9 => Self::Hu,
            _ => Self::Dc,
        }
    }
}

/// 宏块预测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MbMode {
    Intra16(IntraMode),
    Intra4x4,
    Zero,
    Nearest,
    Near,
    New,
    Split,
}

impl Default for MbMode {
    fn default() -> Self {
        Self::Intra16(IntraMode::Dc)
    }
}

/// SPLIT 模式的分割方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum Partitioning {
    /// 上下两个 16x8
    Top16x8,
    /// 左右两个 8x16
    Left8x16,
    /// 4 个 8x8
    Quarters,
    /// 16 个 4x4
    Each4x4,
    /// 不分割
    #[default]
    None,
}

impl Partitioning {
    /// 每个 4x4 子块所属的分区号
    pub(super) fn block_map(self) -> &'static [usize; 16] {
        const MAPS: [[usize; 16]; 5] = [
            [0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1],
            [0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1],
            [0, 0, 1, 1, 0, 0, 1, 1, 2, 2, 3, 3, 2, 2, 3, 3],
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
            [0; 16],
        ];
        &MAPS[self as usize]
    }

    /// 各分区左上角子块的下标
    pub(super) fn first_blocks(self) -> &'static [usize] {
        const EACH: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        match self {
            Self::Top16x8 => &[0, 8],
            Self::Left8x16 => &[0, 2],
            Self::Quarters => &[0, 2, 8, 10],
            Self::Each4x4 => &EACH,
            Self::None => &[0],
        }
    }

    /// 分区数
    pub(super) fn count(self) -> usize {
        self.first_blocks().len()
    }
}

/// 单个宏块的解码结果
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct MacroblockInfo {
    pub(super) mode: MbMode,
    pub(super) chroma_mode: IntraMode,
    pub(super) bmodes: [BMode; 16],
    pub(super) ref_frame: RefFrame,
    pub(super) segment: u8,
    /// 无残差系数 (码流标记, 或解码后全零)
    pub(super) skip: bool,
    pub(super) mv: MotionVector,
    pub(super) partitioning: Partitioning,
    /// 按分区号索引的运动矢量
    pub(super) bmv: [MotionVector; 16],
}

impl MacroblockInfo {
    /// 是否带有独立的 Y2 (亮度 DC) 块
    pub(super) fn has_y2(&self) -> bool {
        !matches!(self.mode, MbMode::Intra4x4 | MbMode::Split)
    }

    pub(super) fn is_inter(&self) -> bool {
        self.ref_frame != RefFrame::Current
    }

    /// 第 `block` 个 4x4 子块使用的运动矢量
    pub(super) fn block_mv(&self, block: usize) -> MotionVector {
        self.bmv[self.partitioning.block_map()[block]]
    }
}

// ============================================================
// 宏块表
// ============================================================

/// 带哨兵边框的宏块表
///
/// 存储为 (mb_height + 1) 行 x (mb_width + 1) 列, 第 0 行与第 0 列是哨兵.
/// 段号跨帧保留 (未更新分段图时沿用).
pub(super) struct MacroblockGrid {
    mb_width: usize,
    mb_height: usize,
    cells: Vec<MacroblockInfo>,
}

impl MacroblockGrid {
    pub(super) fn try_new(mb_width: usize, mb_height: usize) -> Vp8Result<Self> {
        let len = (mb_width + 1) * (mb_height + 1);
        let mut cells = Vec::new();
        cells.try_reserve_exact(len).map_err(|e| {
            Vp8Error::OutOfMemory(format!("VP8: 分配宏块表 ({} 项) 失败: {}", len, e))
        })?;
        cells.resize(len, MacroblockInfo::default());
        Ok(Self {
            mb_width,
            mb_height,
            cells,
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(super) fn mb_width(&self) -> usize {
        self.mb_width
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(super) fn mb_height(&self) -> usize {
        self.mb_height
    }

    /// 带边框坐标 (bx, by) 的下标, (1, 1) 对应帧内第一个宏块
    #[inline]
    fn index(&self, bx: usize, by: usize) -> usize {
        by * (self.mb_width + 1) + bx
    }

    /// 帧内宏块 (mb_x, mb_y)
    pub(super) fn get(&self, mb_x: usize, mb_y: usize) -> &MacroblockInfo {
        &self.cells[self.index(mb_x + 1, mb_y + 1)]
    }

    pub(super) fn get_mut(&mut self, mb_x: usize, mb_y: usize) -> &mut MacroblockInfo {
        let index = self.index(mb_x + 1, mb_y + 1);
        &mut self.cells[index]
    }

    pub(super) fn set(&mut self, mb_x: usize, mb_y: usize, info: MacroblockInfo) {
        let index = self.index(mb_x + 1, mb_y + 1);
        self.cells[index] = info;
    }

    /// 上、左、左上邻居 (可能是哨兵)
    pub(super) fn neighbors(&self, mb_x: usize, mb_y: usize) -> [&MacroblockInfo; 3] {
        let (bx, by) = (mb_x + 1, mb_y + 1);
        [
            &self.cells[self.index(bx, by - 1)],
            &self.cells[self.index(bx - 1, by)],
            &self.cells[self.index(bx - 1, by - 1)],
        ]
    }
}

/// 关键帧 4x4 模式上下文: 上方宏块底行与左侧宏块右列的子块模式
pub(super) struct BModeContext {
    top: Vec<[BMode; 4]>,
    left: [BMode; 4],
}

impl BModeContext {
    pub(super) fn try_new(mb_width: usize) -> Vp8Result<Self> {
        let mut top = Vec::new();
        top.try_reserve_exact(mb_width).map_err(|e| {
            Vp8Error::OutOfMemory(format!("VP8: 分配子块模式上下文失败: {}", e))
        })?;
        top.resize(mb_width, [BMode::Dc; 4]);
        Ok(Self {
            top,
            left: [BMode::Dc; 4],
        })
    }

    /// 帧开始: 帧外上方按 B_DC 处理
    pub(super) fn reset_frame(&mut self) {
        self.top.fill([BMode::Dc; 4]);
        self.left = [BMode::Dc; 4];
    }

    /// 行开始: 帧外左侧按 B_DC 处理
    pub(super) fn reset_row(&mut self) {
        self.left = [BMode::Dc; 4];
    }
}

// ============================================================
// 模式解码
// ============================================================

/// 每帧不变的模式解码参数
pub(super) struct ModeDecoder<'h> {
    header: &'h FrameHeader,
    probs: &'h ProbabilityContext,
    segmentation: &'h Segmentation,
}

impl<'h> ModeDecoder<'h> {
    pub(super) fn new(
        header: &'h FrameHeader,
        probs: &'h ProbabilityContext,
        segmentation: &'h Segmentation,
    ) -> Self {
        Self {
            header,
            probs,
            segmentation,
        }
    }

    /// 解码宏块 (mb_x, mb_y) 的模式信息并写入宏块表
    pub(super) fn decode(
        &self,
        rd: &mut RangeDecoder<'_>,
        grid: &mut MacroblockGrid,
        bctx: &mut BModeContext,
        mb_x: usize,
        mb_y: usize,
    ) -> MacroblockInfo {
        let mut mb = MacroblockInfo {
            segment: grid.get(mb_x, mb_y).segment,
            ..MacroblockInfo::default()
        };
        if self.segmentation.update_map {
            mb.segment = rd.read_tree(&SEGMENT_ID_TREE, &self.segmentation.tree_probs) as u8;
        }
        mb.skip = self.header.skip_enabled && rd.read_bool(self.header.prob_skip);

        if self.header.is_keyframe() {
            self.read_keyframe_modes(rd, &mut mb, bctx, mb_x);
        } else if rd.read_bool(self.header.prob_intra) {
            self.read_inter_modes(rd, &mut mb, grid, mb_x, mb_y);
        } else {
            self.read_intra_modes(rd, &mut mb);
        }

        grid.set(mb_x, mb_y, mb);
        mb
    }

    /// 关键帧: 固定概率, 4x4 模式按上/左邻居子块模式选择概率
    fn read_keyframe_modes(
        &self,
        rd: &mut RangeDecoder<'_>,
        mb: &mut MacroblockInfo,
        bctx: &mut BModeContext,
        mb_x: usize,
    ) {
        let leaf = rd.read_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS);
        let top = &mut bctx.top[mb_x];
        let left = &mut bctx.left;
        if leaf == 4 {
            mb.mode = MbMode::Intra4x4;
            for y in 0..4 {
                for x in 0..4 {
                    let probs = &KEYFRAME_BMODE_PROBS[top[x] as usize][left[y] as usize];
                    let bmode = BMode::from_leaf(rd.read_tree(&BMODE_TREE, probs));
                    mb.bmodes[y * 4 + x] = bmode;
                    top[x] = bmode;
                    left[y] = bmode;
                }
            }
        } else {
            let mode = IntraMode::from_leaf(leaf);
            mb.mode = MbMode::Intra16(mode);
            let implied = mode.implied_bmode();
            mb.bmodes = [implied; 16];
            *top = [implied; 4];
            *left = [implied; 4];
        }
        mb.chroma_mode =
            IntraMode::from_leaf(rd.read_tree(&UV_MODE_TREE, &KEYFRAME_UV_MODE_PROBS));
        mb.ref_frame = RefFrame::Current;
    }

    /// 帧间帧中的帧内宏块: 使用持久概率, 4x4 模式使用固定概率
    fn read_intra_modes(&self, rd: &mut RangeDecoder<'_>, mb: &mut MacroblockInfo) {
        let leaf = rd.read_tree(&YMODE_TREE, &self.probs.ymode);
        if leaf == 4 {
            mb.mode = MbMode::Intra4x4;
            for bmode in mb.bmodes.iter_mut() {
                *bmode = BMode::from_leaf(rd.read_tree(&BMODE_TREE, &INTER_BMODE_PROBS));
            }
        } else {
            mb.mode = MbMode::Intra16(IntraMode::from_leaf(leaf));
        }
        mb.chroma_mode = IntraMode::from_leaf(rd.read_tree(&UV_MODE_TREE, &self.probs.uv_mode));
        mb.ref_frame = RefFrame::Current;
        mb.partitioning = Partitioning::None;
        mb.mv = MotionVector::ZERO;
        mb.bmv = [MotionVector::ZERO; 16];
    }

    /// 帧间宏块: 参考帧选择、运动矢量模式与运动矢量
    fn read_inter_modes(
        &self,
        rd: &mut RangeDecoder<'_>,
        mb: &mut MacroblockInfo,
        grid: &MacroblockGrid,
        mb_x: usize,
        mb_y: usize,
    ) {
        mb.ref_frame = if !rd.read_bool(self.header.prob_last) {
            RefFrame::Previous
        } else if !rd.read_bool(self.header.prob_golden) {
            RefFrame::Golden
        } else {
            RefFrame::AltRef
        };

        let near = find_near_mvs(grid, mb_x, mb_y, mb.ref_frame, &self.header.sign_bias);
        let clamp = |mv: MotionVector| clamp_mv(mv, mb_x, mb_y, grid.mb_width, grid.mb_height);

        if !rd.read_bool(MODE_CONTEXTS[near.counts[0]][0]) {
            mb.mode = MbMode::Zero;
            mb.mv = MotionVector::ZERO;
        } else if !rd.read_bool(MODE_CONTEXTS[near.counts[1]][1]) {
            mb.mode = MbMode::Nearest;
            mb.mv = clamp(near.nearest);
        } else if !rd.read_bool(MODE_CONTEXTS[near.counts[2]][2]) {
            mb.mode = MbMode::Near;
            mb.mv = clamp(near.near);
        } else if !rd.read_bool(MODE_CONTEXTS[near.counts[3]][3]) {
            mb.mode = MbMode::New;
            let best = clamp(near.best);
            let dy = read_mv_component(rd, &self.probs.mv[0]);
            let dx = read_mv_component(rd, &self.probs.mv[1]);
            mb.mv = MotionVector::new(best.x.wrapping_add(dx), best.y.wrapping_add(dy));
        } else {
            mb.mode = MbMode::Split;
            let best = clamp(near.best);
            self.read_split_mvs(rd, mb, grid, mb_x, mb_y, best);
            mb.mv = mb.bmv[mb.partitioning.count() - 1];
        }

        if mb.mode != MbMode::Split {
            mb.partitioning = Partitioning::None;
            mb.bmv[0] = mb.mv;
        }
    }

    /// SPLIT 模式: 分割方式与各分区运动矢量
    fn read_split_mvs(
        &self,
        rd: &mut RangeDecoder<'_>,
        mb: &mut MacroblockInfo,
        grid: &MacroblockGrid,
        mb_x: usize,
        mb_y: usize,
        best: MotionVector,
    ) {
        let partitioning = if !rd.read_bool(MBSPLIT_PROBS[0]) {
            Partitioning::Each4x4
        } else if !rd.read_bool(MBSPLIT_PROBS[1]) {
            Partitioning::Quarters
        } else if !rd.read_bool(MBSPLIT_PROBS[2]) {
            Partitioning::Top16x8
        } else {
            Partitioning::Left8x16
        };
        mb.partitioning = partitioning;

        let [top_mb, left_mb, _] = grid.neighbors(mb_x, mb_y);

        for (part, &k) in partitioning.first_blocks().iter().enumerate() {
            let left = if k & 3 == 0 {
                left_mb.block_mv(k + 3)
            } else {
                mb.block_mv(k - 1)
            };
            let above = if k <= 3 {
                top_mb.block_mv(k + 12)
            } else {
                mb.block_mv(k - 4)
            };

            let probs = &SUBMV_PROBS[submv_context(left, above)];
            mb.bmv[part] = if !rd.read_bool(probs[0]) {
                left
            } else if !rd.read_bool(probs[1]) {
                above
            } else if !rd.read_bool(probs[2]) {
                MotionVector::ZERO
            } else {
                let dy = read_mv_component(rd, &self.probs.mv[0]);
                let dx = read_mv_component(rd, &self.probs.mv[1]);
                MotionVector::new(best.x.wrapping_add(dx), best.y.wrapping_add(dy))
            };
        }
    }
}

/// 子块运动矢量概率的上下文
pub(super) fn submv_context(left: MotionVector, above: MotionVector) -> usize {
    if left == above {
        if left.is_zero() { 4 } else { 3 }
    } else if above.is_zero() {
        2
    } else if left.is_zero() {
        1
    } else {
        0
    }
}

/// 邻居运动矢量统计结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct NearMvs {
    pub(super) best: MotionVector,
    pub(super) nearest: MotionVector,
    pub(super) near: MotionVector,
    /// [零矢量权重, nearest 权重, near 权重, 邻居 SPLIT 计数]
    pub(super) counts: [usize; 4],
}

/// 统计上 (权重 2)、左 (权重 2)、左上 (权重 1) 邻居的运动矢量
///
/// 相同矢量合并权重, 参考帧符号偏置不同时取反.
pub(super) fn find_near_mvs(
    grid: &MacroblockGrid,
    mb_x: usize,
    mb_y: usize,
    ref_frame: RefFrame,
    sign_bias: &[bool; 4],
) -> NearMvs {
    let neighbors = grid.neighbors(mb_x, mb_y);
    let mut mvs = [MotionVector::ZERO; 4];
    let mut counts = [0usize; 4];
    let mut idx = 0;
    let cur_bias = sign_bias[ref_frame as usize];

    for (n, edge) in neighbors.iter().enumerate() {
        if !edge.is_inter() {
            continue;
        }
        let weight = if n == 2 { 1 } else { 2 };
        let mut mv = edge.mv;
        if mv.is_zero() {
            counts[0] += weight;
            continue;
        }
        if sign_bias[edge.ref_frame as usize] != cur_bias {
            mv = mv.negate();
        }
        if n == 0 || mv != mvs[idx] {
            idx += 1;
            mvs[idx] = mv;
        }
        counts[idx] += weight;
    }

    // 三个不同矢量时, 若首尾相同则合并到 nearest
    if counts[3] != 0 && mvs[1] == mvs[3] {
        counts[1] += 1;
    }

    let [top, left, top_left] = neighbors;
    counts[3] = (usize::from(left.mode == MbMode::Split) + usize::from(top.mode == MbMode::Split))
        * 2
        + usize::from(top_left.mode == MbMode::Split);

    if counts[2] > counts[1] {
        counts.swap(1, 2);
        mvs.swap(1, 2);
    }

    let best = if counts[1] >= counts[0] {
        mvs[1]
    } else {
        MotionVector::ZERO
    };

    NearMvs {
        best,
        nearest: mvs[1],
        near: mvs[2],
        counts,
    }
}

/// 将运动矢量钳位到帧外 16 像素以内
pub(super) fn clamp_mv(
    mv: MotionVector,
    mb_x: usize,
    mb_y: usize,
    mb_width: usize,
    mb_height: usize,
) -> MotionVector {
    const MARGIN: i32 = 16 << 2;
    let (mb_x, mb_y) = (mb_x as i32, mb_y as i32);
    let (mb_w, mb_h) = (mb_width as i32, mb_height as i32);
    let x = i32::from(mv.x).clamp(-(mb_x * 64 + MARGIN), (mb_w - 1 - mb_x) * 64 + MARGIN);
    let y = i32::from(mv.y).clamp(-(mb_y * 64 + MARGIN), (mb_h - 1 - mb_y) * 64 + MARGIN);
    MotionVector::new(x as i16, y as i16)
}

/// 读取一个运动矢量分量
///
/// 短值 (0..=7) 用 3 层树编码; 长值逐位编码, 第 3 位在值不超过 15 时隐含为 1.
pub(super) fn read_mv_component(rd: &mut RangeDecoder<'_>, p: &[u8; MV_PROB_COUNT]) -> i16 {
    let mut x: i16 = 0;
    if rd.read_bool(p[0]) {
        for i in 0..3 {
            x += i16::from(rd.read_bool(p[9 + i])) << i;
        }
        for i in (4..=9).rev() {
            x += i16::from(rd.read_bool(p[9 + i])) << i;
        }
        if x & !0xf == 0 || rd.read_bool(p[12]) {
            x += 8;
        }
    } else {
        let b2 = rd.read_bool(p[2]);
        let base = if b2 { 6 } else { 3 };
        let b1 = rd.read_bool(p[base]);
        let b0 = rd.read_bool(p[base + 1 + usize::from(b1)]);
        x = (i16::from(b2) << 2) | (i16::from(b1) << 1) | i16::from(b0);
    }

    if x != 0 && rd.read_bool(p[1]) { -x } else { x }
}
