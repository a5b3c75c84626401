//! 帧间预测 (运动补偿).
//!
//! 亮度运动矢量精度 1/4 像素, 色度 1/8 像素. 插值先水平后垂直,
//! 每一遍都舍入并钳位到 8 位. 参考窗口完全落在平面边框内时直接读取,
//! 否则按坐标钳位读取, 两者结果一致.

use super::frame_buffer::{FrameBuffer, Plane};
use super::modes::{MacroblockInfo, MotionVector, Partitioning};
use super::tables::SIXTAP_FILTERS;

/// 插值滤波器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum McFilter {
    /// 6 抽头 (profile 0)
    SixTap,
    /// 双线性 (profile 1..=3)
    Bilinear,
}

/// 参考窗口: 块四周各留 2/3 像素的抽头余量
const WIN_STRIDE: usize = 21;
const WIN_MARGIN: usize = 2;
const WIN_EXTRA: usize = 5;
const TMP_STRIDE: usize = 16;

/// 帧间宏块的预测参数
#[derive(Debug, Clone, Copy)]
pub(super) struct InterParams {
    pub(super) filter: McFilter,
    /// 色度运动矢量取整到整像素 (profile 3)
    pub(super) full_pixel_chroma: bool,
}

/// 对一个帧间宏块做运动补偿, 预测值写入 `dst`
pub(super) fn predict_macroblock(
    dst: &mut FrameBuffer,
    reference: &FrameBuffer,
    mb: &MacroblockInfo,
    mb_x: usize,
    mb_y: usize,
    params: InterParams,
) {
    let x0 = mb_x * 16;
    let y0 = mb_y * 16;

    if mb.partitioning == Partitioning::Each4x4 {
        for block in 0..16 {
            let (bx, by) = ((block % 4) * 4, (block / 4) * 4);
            predict_luma(dst, reference, x0 + bx, y0 + by, 4, 4, mb.block_mv(block), params);
        }
        for y in 0..2 {
            for x in 0..2 {
                let mv = average_chroma_mv(mb, x, y, params.full_pixel_chroma);
                let (cx, cy) = (x0 / 2 + x * 4, y0 / 2 + y * 4);
                predict_chroma(dst, reference, cx, cy, 4, 4, mv, params.filter);
            }
        }
        return;
    }

    for &(bx, by, w, h, part) in partition_rects(mb.partitioning) {
        let mv = mb.bmv[part];
        predict_luma(dst, reference, x0 + bx, y0 + by, w, h, mv, params);

        let uv_mv = if params.full_pixel_chroma {
            MotionVector::new(mv.x & !7, mv.y & !7)
        } else {
            mv
        };
        let (cx, cy) = ((x0 + bx) / 2, (y0 + by) / 2);
        predict_chroma(dst, reference, cx, cy, w / 2, h / 2, uv_mv, params.filter);
    }
}

/// 非 4x4 分割的各分区矩形: (x, y, 宽, 高, 分区号)
fn partition_rects(partitioning: Partitioning) -> &'static [(usize, usize, usize, usize, usize)] {
    match partitioning {
        Partitioning::Top16x8 => &[(0, 0, 16, 8, 0), (0, 8, 16, 8, 1)],
        Partitioning::Left8x16 => &[(0, 0, 8, 16, 0), (8, 0, 8, 16, 1)],
        Partitioning::Quarters => &[
            (0, 0, 8, 8, 0),
            (8, 0, 8, 8, 1),
            (0, 8, 8, 8, 2),
            (8, 8, 8, 8, 3),
        ],
        Partitioning::None | Partitioning::Each4x4 => &[(0, 0, 16, 16, 0)],
    }
}

/// 4x4 分割时色度 4x4 块的运动矢量: 对应 4 个亮度子块之和的平均 (向零舍入的 /4)
pub(super) fn average_chroma_mv(
    mb: &MacroblockInfo,
    x: usize,
    y: usize,
    full_pixel: bool,
) -> MotionVector {
    let blocks = [
        2 * y * 4 + 2 * x,
        2 * y * 4 + 2 * x + 1,
        (2 * y + 1) * 4 + 2 * x,
        (2 * y + 1) * 4 + 2 * x + 1,
    ];
    let average = |component: fn(&MotionVector) -> i16| {
        let sum: i32 = blocks.iter().map(|&b| i32::from(component(&mb.block_mv(b)))).sum();
        let sign = if sum < 0 { -1 } else { 0 };
        let mut v = (sum + 2 + sign) >> 2;
        if full_pixel {
            v &= !7;
        }
        v as i16
    };
    MotionVector::new(average(|mv: &MotionVector| mv.x), average(|mv: &MotionVector| mv.y))
}

#[allow(clippy::too_many_arguments)]
fn predict_luma(
    dst: &mut FrameBuffer,
    reference: &FrameBuffer,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    mv: MotionVector,
    params: InterParams,
) {
    let (mvx, mvy) = (i32::from(mv.x), i32::from(mv.y));
    let src_x = x as isize + (mvx >> 2) as isize;
    let src_y = y as isize + (mvy >> 2) as isize;
    let fx = ((mvx * 2) & 7) as usize;
    let fy = ((mvy * 2) & 7) as usize;
    predict_block(
        dst.plane_mut(0),
        reference.plane(0),
        (x, y, w, h),
        (src_x, src_y),
        (fx, fy),
        params.filter,
    );
}

#[allow(clippy::too_many_arguments)]
fn predict_chroma(
    dst: &mut FrameBuffer,
    reference: &FrameBuffer,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    mv: MotionVector,
    filter: McFilter,
) {
    let (mvx, mvy) = (i32::from(mv.x), i32::from(mv.y));
    let src_x = x as isize + (mvx >> 3) as isize;
    let src_y = y as isize + (mvy >> 3) as isize;
    let frac = ((mvx & 7) as usize, (mvy & 7) as usize);
    for plane in 1..3 {
        predict_block(
            dst.plane_mut(plane),
            reference.plane(plane),
            (x, y, w, h),
            (src_x, src_y),
            frac,
            filter,
        );
    }
}

/// 预测一个矩形块
///
/// `rect` 为目标位置与尺寸, `src` 为参考中的整像素位置, `frac` 为 1/8 像素相位.
fn predict_block(
    dst: &mut Plane,
    reference: &Plane,
    rect: (usize, usize, usize, usize),
    src: (isize, isize),
    frac: (usize, usize),
    filter: McFilter,
) {
    let (x, y, w, h) = rect;
    let mut win = [0u8; WIN_STRIDE * WIN_STRIDE];
    fetch_window(reference, src.0, src.1, w, h, &mut win);

    let mut out = [0u8; 16 * 16];
    match filter {
        McFilter::SixTap => sixtap(&win, w, h, frac, &mut out),
        McFilter::Bilinear => bilinear(&win, w, h, frac, &mut out),
    }

    let stride = dst.stride();
    let origin = dst.offset(x as isize, y as isize);
    let data = dst.data_mut();
    for r in 0..h {
        let start = origin + r * stride;
        data[start..start + w].copy_from_slice(&out[r * 16..r * 16 + w]);
    }
}

/// 读取以 (x - 2, y - 2) 为左上角、(w + 5) x (h + 5) 的参考窗口
fn fetch_window(src: &Plane, x: isize, y: isize, w: usize, h: usize, win: &mut [u8]) {
    let wx = x - WIN_MARGIN as isize;
    let wy = y - WIN_MARGIN as isize;
    let (ww, wh) = (w + WIN_EXTRA, h + WIN_EXTRA);

    if src.contains_window(wx, wy, ww, wh) {
        let data = src.data();
        for r in 0..wh {
            let start = src.offset(wx, wy + r as isize);
            win[r * WIN_STRIDE..r * WIN_STRIDE + ww].copy_from_slice(&data[start..start + ww]);
        }
    } else {
        for r in 0..wh {
            for c in 0..ww {
                win[r * WIN_STRIDE + c] = src.pixel_clamped(wx + c as isize, wy + r as isize);
            }
        }
    }
}

#[inline]
fn filter_taps(taps: &[i32; 6], pixels: impl Iterator<Item = u8>) -> u8 {
    let sum: i32 = taps
        .iter()
        .zip(pixels)
        .map(|(&t, p)| t * i32::from(p))
        .sum();
    ((sum + 64) >> 7).clamp(0, 255) as u8
}

/// 6 抽头插值: 水平一遍覆盖 h + 5 行, 再垂直一遍
fn sixtap(win: &[u8], w: usize, h: usize, frac: (usize, usize), out: &mut [u8]) {
    let hf = &SIXTAP_FILTERS[frac.0];
    let vf = &SIXTAP_FILTERS[frac.1];

    let mut tmp = [0u8; (16 + WIN_EXTRA) * TMP_STRIDE];
    for r in 0..h + WIN_EXTRA {
        for c in 0..w {
            let base = r * WIN_STRIDE + c;
            tmp[r * TMP_STRIDE + c] = filter_taps(hf, win[base..base + 6].iter().copied());
        }
    }
    for r in 0..h {
        for c in 0..w {
            let column = (0..6).map(|t| tmp[(r + t) * TMP_STRIDE + c]);
            out[r * 16 + c] = filter_taps(vf, column);
        }
    }
}

/// 双线性插值: 水平一遍覆盖 h + 1 行, 再垂直一遍
fn bilinear(win: &[u8], w: usize, h: usize, frac: (usize, usize), out: &mut [u8]) {
    let (a, b) = (8 - frac.0 as u32, frac.0 as u32);
    let (c, d) = (8 - frac.1 as u32, frac.1 as u32);

    let mut tmp = [0u8; 17 * TMP_STRIDE];
    for r in 0..=h {
        let row = (r + WIN_MARGIN) * WIN_STRIDE + WIN_MARGIN;
        for x in 0..w {
            let p0 = u32::from(win[row + x]);
            let p1 = u32::from(win[row + x + 1]);
            tmp[r * TMP_STRIDE + x] = ((a * p0 + b * p1 + 4) >> 3) as u8;
        }
    }
    for r in 0..h {
        for x in 0..w {
            let p0 = u32::from(tmp[r * TMP_STRIDE + x]);
            let p1 = u32::from(tmp[(r + 1) * TMP_STRIDE + x]);
            out[r * 16 + x] = ((c * p0 + d * p1 + 4) >> 3) as u8;
        }
    }
}
