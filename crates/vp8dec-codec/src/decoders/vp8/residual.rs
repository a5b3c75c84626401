//! 残差系数 token 解码.
//!
//! 每个宏块最多 25 个 4x4 块: 可选的 Y2, 16 个亮度, 4 个 U, 4 个 V.
//! 每块首个 token 的概率由上方与左侧对应块 "是否有非零系数" 选择.

use vp8dec_core::{Vp8Error, Vp8Result};

use super::modes::MacroblockInfo;
use super::quant::Dequant;
use super::range_coder::RangeDecoder;
use super::tables::{COEFF_BANDS, DCT_CAT_BASE, DCT_CAT_PROBS, TokenProbs, ZIGZAG};

/// 平面类型 (token 概率表第一维)
const PLANE_Y_AFTER_Y2: usize = 0;
const PLANE_Y2: usize = 1;
const PLANE_CHROMA: usize = 2;
const PLANE_Y_WITH_DC: usize = 3;

/// 非零上下文中 Y2 的下标; 0..4 亮度, 4..6 U, 6..8 V
const Y2_CTX: usize = 8;

/// 一个宏块的反量化系数 (块内光栅顺序)
#[derive(Clone)]
pub(super) struct MacroblockCoeffs {
    /// 0..16 亮度, 16..20 U, 20..24 V
    pub(super) blocks: [[i16; 16]; 24],
}

impl Default for MacroblockCoeffs {
    fn default() -> Self {
        Self {
            blocks: [[0; 16]; 24],
        }
    }
}

impl MacroblockCoeffs {
    fn clear(&mut self) {
        for block in self.blocks.iter_mut() {
            *block = [0; 16];
        }
    }
}

/// 非零系数上下文: 每列宏块的底边与当前行左侧宏块的右边
pub(super) struct CoeffContext {
    top: Vec<[u8; 9]>,
    left: [u8; 9],
}

impl CoeffContext {
    pub(super) fn try_new(mb_width: usize) -> Vp8Result<Self> {
        let mut top = Vec::new();
        top.try_reserve_exact(mb_width).map_err(|e| {
            Vp8Error::OutOfMemory(format!("VP8: 分配系数上下文失败: {}", e))
        })?;
        top.resize(mb_width, [0; 9]);
        Ok(Self { top, left: [0; 9] })
    }

    pub(super) fn reset_frame(&mut self) {
        self.top.fill([0; 9]);
        self.left = [0; 9];
    }

    pub(super) fn reset_row(&mut self) {
        self.left = [0; 9];
    }
}

/// 解码一个宏块的全部残差
///
/// 跳过宏块只清空上下文 (Y2 上下文仅在该宏块本应携带 Y2 时清空).
/// 未跳过但解码出零个系数的宏块改标记为跳过, 之后不做反变换与内部边滤波.
pub(super) fn decode_macroblock_coeffs(
    rd: &mut RangeDecoder<'_>,
    probs: &TokenProbs,
    dequant: &Dequant,
    mb: &mut MacroblockInfo,
    ctx: &mut CoeffContext,
    mb_x: usize,
    coeffs: &mut MacroblockCoeffs,
) {
    coeffs.clear();
    let top = &mut ctx.top[mb_x];
    let left = &mut ctx.left;

    if mb.skip {
        let y2 = (top[Y2_CTX], left[Y2_CTX]);
        *top = [0; 9];
        *left = [0; 9];
        if !mb.has_y2() {
            top[Y2_CTX] = y2.0;
            left[Y2_CTX] = y2.1;
        }
        return;
    }

    let mut nnz_total = 0;
    let (luma_plane, luma_start) = if mb.has_y2() {
        let mut y2 = [0i16; 16];
        let ctx_index = usize::from(top[Y2_CTX] + left[Y2_CTX]);
        let nnz = decode_block(rd, &probs[PLANE_Y2], ctx_index, 0, dequant.y2, &mut y2);
        let flag = u8::from(nnz > 0);
        top[Y2_CTX] = flag;
        left[Y2_CTX] = flag;
        if nnz > 0 {
            nnz_total += nnz;
            let dc = inverse_wht(&y2);
            for (block, &value) in coeffs.blocks.iter_mut().zip(dc.iter()) {
                block[0] = value;
            }
        }
        (PLANE_Y_AFTER_Y2, 1)
    } else {
        (PLANE_Y_WITH_DC, 0)
    };

    for y in 0..4 {
        for x in 0..4 {
            let ctx_index = usize::from(top[x] + left[y]);
            let block = &mut coeffs.blocks[y * 4 + x];
            let nnz = decode_block(
                rd,
                &probs[luma_plane],
                ctx_index,
                luma_start,
                dequant.y,
                block,
            );
            let flag = u8::from(nnz > 0);
            top[x] = flag;
            left[y] = flag;
            nnz_total += nnz;
        }
    }

    // U 块在上下文 4..6, V 块在 6..8
    for plane in 0..2 {
        let base = 4 + plane * 2;
        for y in 0..2 {
            for x in 0..2 {
                let ctx_index = usize::from(top[base + x] + left[base + y]);
                let block = &mut coeffs.blocks[16 + plane * 4 + y * 2 + x];
                let nnz = decode_block(rd, &probs[PLANE_CHROMA], ctx_index, 0, dequant.uv, block);
                let flag = u8::from(nnz > 0);
                top[base + x] = flag;
                left[base + y] = flag;
                nnz_total += nnz;
            }
        }
    }

    if nnz_total == 0 {
        mb.skip = true;
    }
}

/// 解码单个 4x4 块, 返回最后一个已解码位置之后的下标 (0 表示空块)
///
/// `start` 为 1 时跳过 DC (由 Y2 提供). 紧跟在零值 token 之后不会出现 EOB,
/// 因此这时跳过 EOB 判定. 16 个位置全部用完后即使没有 EOB 也结束.
fn decode_block(
    rd: &mut RangeDecoder<'_>,
    probs: &[[[u8; 11]; 3]; 8],
    ctx: usize,
    start: usize,
    qmul: [i32; 2],
    block: &mut [i16; 16],
) -> usize {
    let mut i = start;
    let mut p = &probs[COEFF_BANDS[i]][ctx];
    if !rd.read_bool(p[0]) {
        return 0;
    }

    loop {
        // 零值: 不检查 EOB, 直接读下一个 token
        if !rd.read_bool(p[1]) {
            i += 1;
            if i == 16 {
                return 16;
            }
            p = &probs[COEFF_BANDS[i]][0];
            continue;
        }

        let (magnitude, next_ctx) = if !rd.read_bool(p[2]) {
            (1, 1)
        } else {
            (read_large_token(rd, p), 2)
        };
        let value = if rd.read_flag() { -magnitude } else { magnitude };
        let q = if i > 0 { qmul[1] } else { qmul[0] };
        block[ZIGZAG[i]] = (value * q) as i16;

        i += 1;
        if i == 16 {
            return 16;
        }
        p = &probs[COEFF_BANDS[i]][next_ctx];
        if !rd.read_bool(p[0]) {
            return i;
        }
    }
}

/// 幅值 >= 2 的 token: 2, 3, 4 直接编码, 更大的值为 DCT_CAT1..6 加附加比特
fn read_large_token(rd: &mut RangeDecoder<'_>, p: &[u8; 11]) -> i32 {
    if !rd.read_bool(p[3]) {
        if !rd.read_bool(p[4]) {
            return 2;
        }
        return 3 + i32::from(rd.read_bool(p[5]));
    }

    let cat = if !rd.read_bool(p[6]) {
        usize::from(rd.read_bool(p[7]))
    } else {
        let a = usize::from(rd.read_bool(p[8]));
        let b = usize::from(rd.read_bool(p[9 + a]));
        2 + (a << 1) + b
    };

    let extra = DCT_CAT_PROBS[cat]
        .iter()
        .fold(0, |acc, &prob| (acc << 1) | i32::from(rd.read_bool(prob)));
    DCT_CAT_BASE[cat] + extra
}

/// Y2 块的逆 Walsh-Hadamard 变换, 输出 16 个亮度块的 DC (块光栅顺序)
pub(super) fn inverse_wht(input: &[i16; 16]) -> [i16; 16] {
    let mut tmp = [0i16; 16];
    for i in 0..4 {
        let ip = |k: usize| i32::from(input[i + 4 * k]);
        let a1 = ip(0) + ip(3);
        let b1 = ip(1) + ip(2);
        let c1 = ip(1) - ip(2);
        let d1 = ip(0) - ip(3);
        tmp[i] = (a1 + b1) as i16;
        tmp[i + 4] = (c1 + d1) as i16;
        tmp[i + 8] = (a1 - b1) as i16;
        tmp[i + 12] = (d1 - c1) as i16;
    }

    let mut out = [0i16; 16];
    for i in 0..4 {
        let ip = |k: usize| i32::from(tmp[4 * i + k]);
        let a1 = ip(0) + ip(3);
        let b1 = ip(1) + ip(2);
        let c1 = ip(1) - ip(2);
        let d1 = ip(0) - ip(3);
        out[4 * i] = ((a1 + b1 + 3) >> 3) as i16;
        out[4 * i + 1] = ((c1 + d1 + 3) >> 3) as i16;
        out[4 * i + 2] = ((a1 - b1 + 3) >> 3) as i16;
        out[4 * i + 3] = ((d1 - c1 + 3) >> 3) as i16;
    }
    out
}
