//! 帧内预测.
//!
//! 预测在一块小工作区中进行: 第 0 行为上方像素 (含左上角与右上方 4 个像素),
//! 第 0 列为左侧像素. 帧外的上方按 127, 左侧按 129 填充;
//! 16x16 与色度 DC 预测例外, 按邻居可用性求平均.
//! 4x4 子块依次预测并叠加残差, 后续子块直接读取已重建的像素.

use super::frame_buffer::Plane;
use super::idct::add_residual;
use super::modes::{BMode, IntraMode, MacroblockInfo, MbMode};
use super::residual::MacroblockCoeffs;

/// 亮度工作区: 1 + 16 + 4 列, 1 + 16 行
const LUMA_WS_STRIDE: usize = 21;
const LUMA_WS_LEN: usize = LUMA_WS_STRIDE * 17;
/// 色度工作区: 1 + 8 列, 1 + 8 行
const CHROMA_WS_STRIDE: usize = 9;
const CHROMA_WS_LEN: usize = CHROMA_WS_STRIDE * 9;

/// 帧外上方像素
const ABOVE_EDGE: u8 = 127;
/// 帧外左侧像素
const LEFT_EDGE: u8 = 129;

/// 宏块在帧中的位置与上一行宏块底边 (未滤波)
pub(super) struct IntraEdges<'a> {
    pub(super) mb_x: usize,
    pub(super) mb_y: usize,
    pub(super) mb_width: usize,
    /// 上一宏块行的最后一行像素, 宽度为平面对齐宽度
    pub(super) above: &'a [u8],
}

impl IntraEdges<'_> {
    /// 按块尺寸 `size` 填充工作区第 0 行与第 0 列
    ///
    /// `right` 为右上方像素数 (亮度 4, 色度 0).
    fn load(&self, plane: &Plane, size: usize, right: usize, ws: &mut [u8], stride: usize) {
        let x0 = self.mb_x * size;
        let y0 = self.mb_y * size;

        if self.mb_y == 0 {
            ws[..=size + right].fill(ABOVE_EDGE);
        } else {
            ws[0] = if self.mb_x == 0 {
                LEFT_EDGE
            } else {
                self.above[x0 - 1]
            };
            ws[1..=size].copy_from_slice(&self.above[x0..x0 + size]);
            if right > 0 {
                if self.mb_x + 1 == self.mb_width {
                    // 最右侧宏块: 重复上方最后一个像素
                    let last = self.above[x0 + size - 1];
                    ws[size + 1..=size + right].fill(last);
                } else {
                    ws[size + 1..=size + right]
                        .copy_from_slice(&self.above[x0 + size..x0 + size + right]);
                }
            }
        }

        let data = plane.data();
        for y in 0..size {
            ws[(y + 1) * stride] = if self.mb_x == 0 {
                LEFT_EDGE
            } else {
                data[plane.offset(x0 as isize - 1, (y0 + y) as isize)]
            };
        }
    }
}

/// 将工作区内容写回平面
fn store(plane: &mut Plane, ws: &[u8], stride: usize, size: usize, x0: usize, y0: usize) {
    let plane_stride = plane.stride();
    let origin = plane.offset(x0 as isize, y0 as isize);
    let data = plane.data_mut();
    for y in 0..size {
        let src = (y + 1) * stride + 1;
        let dst = origin + y * plane_stride;
        data[dst..dst + size].copy_from_slice(&ws[src..src + size]);
    }
}

// ============================================================
// 宏块重建
// ============================================================

/// 重建帧内宏块的亮度
pub(super) fn reconstruct_luma(
    plane: &mut Plane,
    edges: &IntraEdges<'_>,
    mb: &MacroblockInfo,
    coeffs: &MacroblockCoeffs,
) {
    let mut ws = [0u8; LUMA_WS_LEN];
    edges.load(plane, 16, 4, &mut ws, LUMA_WS_STRIDE);
    let s = LUMA_WS_STRIDE;

    match mb.mode {
        MbMode::Intra4x4 => {
            // 右列子块的右上方沿用整个宏块的右上方像素
            for row in [4, 8, 12] {
                ws.copy_within(17..21, row * s + 17);
            }
            for (block, &bmode) in mb.bmodes.iter().enumerate() {
                let pos = (1 + (block / 4) * 4) * s + 1 + (block % 4) * 4;
                predict_4x4(&mut ws, pos, s, bmode);
                add_residual(&coeffs.blocks[block], &mut ws, pos, s);
            }
        }
        MbMode::Intra16(mode) => {
            predict_block(&mut ws, s, 16, mode, edges.mb_x > 0, edges.mb_y > 0);
            for block in 0..16 {
                let pos = (1 + (block / 4) * 4) * s + 1 + (block % 4) * 4;
                add_residual(&coeffs.blocks[block], &mut ws, pos, s);
            }
        }
        _ => {}
    }

    store(plane, &ws, s, 16, edges.mb_x * 16, edges.mb_y * 16);
}

/// 重建帧内宏块的一个色度平面 (`index` 0 = U, 1 = V)
pub(super) fn reconstruct_chroma(
    plane: &mut Plane,
    edges: &IntraEdges<'_>,
    mode: IntraMode,
    coeffs: &MacroblockCoeffs,
    index: usize,
) {
    let mut ws = [0u8; CHROMA_WS_LEN];
    edges.load(plane, 8, 0, &mut ws, CHROMA_WS_STRIDE);
    let s = CHROMA_WS_STRIDE;

    predict_block(&mut ws, s, 8, mode, edges.mb_x > 0, edges.mb_y > 0);
    for block in 0..4 {
        let pos = (1 + (block / 2) * 4) * s + 1 + (block % 2) * 4;
        add_residual(&coeffs.blocks[16 + index * 4 + block], &mut ws, pos, s);
    }

    store(plane, &ws, s, 8, edges.mb_x * 8, edges.mb_y * 8);
}

// ============================================================
// 16x16 / 8x8 预测
// ============================================================

/// 整块预测, 结果写入工作区 (1, 1) 起的 `size` x `size` 区域
fn predict_block(
    ws: &mut [u8],
    stride: usize,
    size: usize,
    mode: IntraMode,
    has_left: bool,
    has_above: bool,
) {
    let top_left = i32::from(ws[0]);
    let mut above_buf = [0u8; 16];
    let mut left_buf = [0u8; 16];
    above_buf[..size].copy_from_slice(&ws[1..=size]);
    for (y, l) in left_buf[..size].iter_mut().enumerate() {
        *l = ws[(y + 1) * stride];
    }
    let (above, left) = (&above_buf[..size], &left_buf[..size]);

    match mode {
        IntraMode::Dc => {
            // 单侧 size 个像素, 两侧 2 * size 个像素
            let shift = size.trailing_zeros();
            let sum = |v: &[u8]| v.iter().map(|&p| u32::from(p)).sum::<u32>();
            let dc = match (has_above, has_left) {
                (true, true) => {
                    let total = sum(above) + sum(left);
                    ((total + (1 << shift)) >> (shift + 1)) as u8
                }
                (true, false) => ((sum(above) + (1 << (shift - 1))) >> shift) as u8,
                (false, true) => ((sum(left) + (1 << (shift - 1))) >> shift) as u8,
                (false, false) => 128,
            };
            for y in 0..size {
                ws[(y + 1) * stride + 1..(y + 1) * stride + 1 + size].fill(dc);
            }
        }
        IntraMode::V => {
            for y in 0..size {
                ws[(y + 1) * stride + 1..(y + 1) * stride + 1 + size].copy_from_slice(above);
            }
        }
        IntraMode::H => {
            for (y, &l) in left.iter().enumerate() {
                ws[(y + 1) * stride + 1..(y + 1) * stride + 1 + size].fill(l);
            }
        }
        IntraMode::Tm => {
            for (y, &l) in left.iter().enumerate() {
                let row = (y + 1) * stride + 1;
                for (x, &a) in above.iter().enumerate() {
                    ws[row + x] = (i32::from(l) + i32::from(a) - top_left).clamp(0, 255) as u8;
                }
            }
        }
    }
}

// ============================================================
// 4x4 子块预测
// ============================================================

#[inline]
fn avg2(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b) + 1) >> 1) as u8
}

#[inline]
fn avg3(a: u8, b: u8, c: u8) -> u8 {
    ((u16::from(a) + 2 * u16::from(b) + u16::from(c) + 2) >> 2) as u8
}

/// 预测工作区 `pos` 处的 4x4 子块
pub(super) fn predict_4x4(ws: &mut [u8], pos: usize, stride: usize, mode: BMode) {
    let tl = ws[pos - stride - 1];
    let a: [u8; 8] = std::array::from_fn(|i| ws[pos - stride + i]);
    let l: [u8; 4] = std::array::from_fn(|i| ws[pos + i * stride - 1]);
    // 左下 -> 左上角 -> 右上的边缘序列
    let e = [l[3], l[2], l[1], l[0], tl, a[0], a[1], a[2], a[3]];

    let pred: [[u8; 4]; 4] = match mode {
        BMode::Dc => {
            let sum: u32 = a[..4].iter().chain(l.iter()).map(|&p| u32::from(p)).sum();
            [[((sum + 4) >> 3) as u8; 4]; 4]
        }
        BMode::Tm => std::array::from_fn(|r| {
            std::array::from_fn(|c| {
                (i32::from(l[r]) + i32::from(a[c]) - i32::from(tl)).clamp(0, 255) as u8
            })
        }),
        BMode::Ve => {
            let row = [
                avg3(tl, a[0], a[1]),
                avg3(a[0], a[1], a[2]),
                avg3(a[1], a[2], a[3]),
                avg3(a[2], a[3], a[4]),
            ];
            [row; 4]
        }
        BMode::He => {
            let col = [
                avg3(tl, l[0], l[1]),
                avg3(l[0], l[1], l[2]),
                avg3(l[1], l[2], l[3]),
                avg3(l[2], l[3], l[3]),
            ];
            std::array::from_fn(|r| [col[r]; 4])
        }
        BMode::Ld => std::array::from_fn(|r| {
            std::array::from_fn(|c| {
                let k = r + c;
                avg3(a[k], a[k + 1], a[(k + 2).min(7)])
            })
        }),
        BMode::Rd => std::array::from_fn(|r| {
            std::array::from_fn(|c| {
                let k = 3 - r + c;
                avg3(e[k], e[k + 1], e[k + 2])
            })
        }),
        BMode::Vr => [
            [
                avg2(e[4], e[5]),
                avg2(e[5], e[6]),
                avg2(e[6], e[7]),
                avg2(e[7], e[8]),
            ],
            [
                avg3(e[3], e[4], e[5]),
                avg3(e[4], e[5], e[6]),
                avg3(e[5], e[6], e[7]),
                avg3(e[6], e[7], e[8]),
            ],
            [
                avg3(e[2], e[3], e[4]),
                avg2(e[4], e[5]),
                avg2(e[5], e[6]),
                avg2(e[6], e[7]),
            ],
            [
                avg3(e[1], e[2], e[3]),
                avg3(e[3], e[4], e[5]),
                avg3(e[4], e[5], e[6]),
                avg3(e[5], e[6], e[7]),
            ],
        ],
        BMode::Vl => [
            [
                avg2(a[0], a[1]),
                avg2(a[1], a[2]),
                avg2(a[2], a[3]),
                avg2(a[3], a[4]),
            ],
            [
                avg3(a[0], a[1], a[2]),
                avg3(a[1], a[2], a[3]),
                avg3(a[2], a[3], a[4]),
                avg3(a[3], a[4], a[5]),
            ],
            [
                avg2(a[1], a[2]),
                avg2(a[2], a[3]),
                avg2(a[3], a[4]),
                avg3(a[4], a[5], a[6]),
            ],
            [
                avg3(a[1], a[2], a[3]),
                avg3(a[2], a[3], a[4]),
                avg3(a[3], a[4], a[5]),
                avg3(a[5], a[6], a[7]),
            ],
        ],
        BMode::Hd => [
            [
                avg2(e[3], e[4]),
                avg3(e[3], e[4], e[5]),
                avg3(e[4], e[5], e[6]),
                avg3(e[5], e[6], e[7]),
            ],
            [
                avg2(e[2], e[3]),
                avg3(e[2], e[3], e[4]),
                avg2(e[3], e[4]),
                avg3(e[3], e[4], e[5]),
            ],
            [
                avg2(e[1], e[2]),
                avg3(e[1], e[2], e[3]),
                avg2(e[2], e[3]),
                avg3(e[2], e[3], e[4]),
            ],
            [
                avg2(e[0], e[1]),
                avg3(e[0], e[1], e[2]),
                avg2(e[1], e[2]),
                avg3(e[1], e[2], e[3]),
            ],
        ],
        BMode::Hu => [
            [
                avg2(l[0], l[1]),
                avg3(l[0], l[1], l[2]),
                avg2(l[1], l[2]),
                avg3(l[1], l[2], l[3]),
            ],
            [
                avg2(l[1], l[2]),
                avg3(l[1], l[2], l[3]),
                avg2(l[2], l[3]),
                avg3(l[2], l[3], l[3]),
            ],
            [avg2(l[2], l[3]), avg3(l[2], l[3], l[3]), l[3], l[3]],
            [l[3]; 4],
        ],
    };

    for (r, row) in pred.iter().enumerate() {
        let start = pos + r * stride;
        ws[start..start + 4].copy_from_slice(row);
    }
}
