//! 带边框的帧缓冲与分配器.
//!
//! 平面按宏块对齐 (16 的倍数) 分配, 四周留有复制边缘像素的边框,
//! 运动补偿窗口落在边框内时可直接读取, 超出时退化为坐标钳位读取.

use log::debug;
use vp8dec_core::{Vp8Error, Vp8Result};

/// 亮度平面边框宽度 (像素)
pub const LUMA_BORDER: usize = 32;
/// 色度平面边框宽度 (像素)
pub const CHROMA_BORDER: usize = 16;

/// 帧尺寸布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLayout {
    /// 显示宽度
    pub width: u32,
    /// 显示高度
    pub height: u32,
    /// 水平宏块数
    pub mb_width: usize,
    /// 垂直宏块数
    pub mb_height: usize,
}

impl FrameLayout {
    /// 由显示尺寸计算布局
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mb_width: (width as usize).div_ceil(16),
            mb_height: (height as usize).div_ceil(16),
        }
    }

    /// 平面对齐后的宽度与高度
    pub fn plane_size(&self, plane: usize) -> (usize, usize) {
        if plane == 0 {
            (self.mb_width * 16, self.mb_height * 16)
        } else {
            (self.mb_width * 8, self.mb_height * 8)
        }
    }

    /// 平面边框宽度
    pub fn plane_border(&self, plane: usize) -> usize {
        if plane == 0 { LUMA_BORDER } else { CHROMA_BORDER }
    }
}

/// 单个像素平面
#[derive(Debug, Clone)]
pub struct Plane {
    data: Vec<u8>,
    stride: usize,
    width: usize,
    height: usize,
    border: usize,
}

impl Plane {
    fn try_new(width: usize, height: usize, border: usize) -> Vp8Result<Self> {
        let stride = width + 2 * border;
        let rows = height + 2 * border;
        let len = stride
            .checked_mul(rows)
            .ok_or_else(|| Vp8Error::OutOfMemory(format!("VP8: 平面尺寸溢出 {}x{}", width, height)))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            Vp8Error::OutOfMemory(format!("VP8: 分配 {} 字节平面失败: {}", len, e))
        })?;
        data.resize(len, 0);
        Ok(Self {
            data,
            stride,
            width,
            height,
            border,
        })
    }

    /// 对齐后的宽度
    pub fn width(&self) -> usize {
        self.width
    }

    /// 对齐后的高度
    pub fn height(&self) -> usize {
        self.height
    }

    /// 行跨度 (含边框)
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// 边框宽度
    pub fn border(&self) -> usize {
        self.border
    }

    /// 平面 (0, 0) 在存储中的偏移
    #[inline]
    pub(crate) fn origin(&self) -> usize {
        self.border * self.stride + self.border
    }

    /// (x, y) 在存储中的偏移, 坐标可以落在边框内
    #[inline]
    pub(crate) fn offset(&self, x: isize, y: isize) -> usize {
        let b = self.border as isize;
        ((y + b) * self.stride as isize + x + b) as usize
    }

    /// 对齐区域内第 y 行
    pub fn row(&self, y: usize) -> &[u8] {
        let start = self.origin() + y * self.stride;
        &self.data[start..start + self.width]
    }

    /// 读取 (x, y) 处的像素, 坐标钳位到对齐区域
    #[inline]
    pub fn pixel_clamped(&self, x: isize, y: isize) -> u8 {
        let x = x.clamp(0, self.width as isize - 1);
        let y = y.clamp(0, self.height as isize - 1);
        self.data[self.offset(x, y)]
    }

    /// 完整存储 (含边框)
    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 窗口 [x, x + w) x [y, y + h) 是否完全落在边框范围内
    #[inline]
    pub(crate) fn contains_window(&self, x: isize, y: isize, w: usize, h: usize) -> bool {
        let b = self.border as isize;
        x >= -b
            && y >= -b
            && x + w as isize <= self.width as isize + b
            && y + h as isize <= self.height as isize + b
    }

    /// 用边缘像素填充边框
    pub(crate) fn extend_borders(&mut self) {
        let (stride, width, height, border) = (self.stride, self.width, self.height, self.border);
        let origin = self.origin();
        for y in 0..height {
            let row = origin + y * stride;
            let left = self.data[row];
            let right = self.data[row + width - 1];
            self.data[row - border..row].fill(left);
            self.data[row + width..row + width + border].fill(right);
        }
        let first = origin - border;
        let last = first + (height - 1) * stride;
        for i in 1..=border {
            self.data.copy_within(first..first + stride, first - i * stride);
            self.data.copy_within(last..last + stride, last + i * stride);
        }
    }
}

/// 一帧 YUV 4:2:0 缓冲
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    layout: FrameLayout,
    planes: [Plane; 3],
}

impl FrameBuffer {
    /// 按布局分配, 分配失败返回 `OutOfMemory`
    pub fn try_new(layout: &FrameLayout) -> Vp8Result<Self> {
        let make = |plane: usize| {
            let (w, h) = layout.plane_size(plane);
            Plane::try_new(w, h, layout.plane_border(plane))
        };
        Ok(Self {
            layout: *layout,
            planes: [make(0)?, make(1)?, make(2)?],
        })
    }

    /// 帧布局
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// 获取平面 (0 = Y, 1 = U, 2 = V)
    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    pub(crate) fn plane_mut(&mut self, index: usize) -> &mut Plane {
        &mut self.planes[index]
    }

    pub(crate) fn planes_mut(&mut self) -> &mut [Plane; 3] {
        &mut self.planes
    }

    /// 解码完成后填充所有平面的边框
    pub(crate) fn extend_borders(&mut self) {
        for plane in self.planes.iter_mut() {
            plane.extend_borders();
        }
    }
}

// ============================================================
// 分配器
// ============================================================

/// 帧缓冲分配回调
///
/// 首帧或尺寸变化时解码器请求新缓冲; 不再被任何参考角色引用的缓冲通过
/// `release` 归还. 分配失败时解码器不修改任何持久状态.
pub trait FrameAllocator: Send {
    /// 按布局分配一帧
    fn allocate(&mut self, layout: &FrameLayout) -> Vp8Result<FrameBuffer>;

    /// 归还不再使用的帧
    fn release(&mut self, buffer: FrameBuffer) {
        drop(buffer);
    }
}

/// 默认分配器: 复用同尺寸的已归还缓冲
#[derive(Debug, Default)]
pub struct PooledFrameAllocator {
    pool: Vec<FrameBuffer>,
}

/// 池中最多保留的缓冲数
const MAX_POOLED: usize = 4;

impl PooledFrameAllocator {
    /// 创建空缓冲池
    pub fn new() -> Self {
        Self::default()
    }

    /// 池中空闲缓冲数
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }
}

impl FrameAllocator for PooledFrameAllocator {
    fn allocate(&mut self, layout: &FrameLayout) -> Vp8Result<FrameBuffer> {
        if let Some(index) = self.pool.iter().position(|b| b.layout() == layout) {
            return Ok(self.pool.swap_remove(index));
        }
        debug!(
            "VP8: 分配帧缓冲 {}x{} ({}x{} 宏块)",
            layout.width, layout.height, layout.mb_width, layout.mb_height
        );
        FrameBuffer::try_new(layout)
    }

    fn release(&mut self, buffer: FrameBuffer) {
        self.pool.retain(|b| b.layout() == buffer.layout());
        if self.pool.len() < MAX_POOLED {
            self.pool.push(buffer);
        }
    }
}
