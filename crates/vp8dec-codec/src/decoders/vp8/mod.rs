//! VP8 视频解码器.
//!
//! 纯 Rust 实现, 支持 profile 0..=3, 输出 8 位 YUV 4:2:0.
//!
//! 每帧的解码流程:
//! 1. 解析帧标签与压缩帧头 (作用于持久状态的副本)
//! 2. 按丢弃策略决定是否跳过整帧
//! 3. 逐宏块行: 模式解码 -> 残差解码 -> 帧内/帧间重建, 行结束后做环路滤波
//! 4. 填充边框, 提交持久状态, 轮转参考帧角色
//!
//! 任一步失败时持久状态 (概率表、分段、滤波增量、参考帧) 保持不变.

mod config;
mod frame_buffer;
mod header;
mod idct;
mod inter;
mod intra;
mod loop_filter;
mod modes;
mod quant;
mod range_coder;
mod references;
mod residual;
mod tables;

#[cfg(any(test, feature = "test-util"))]
pub mod stream_writer;


pub use config::{Discard, ENV_SKIP_FRAME, ENV_SKIP_LOOP_FILTER, Vp8DecoderConfig};
pub use frame_buffer::{
    CHROMA_BORDER, FrameAllocator, FrameBuffer, FrameLayout, LUMA_BORDER, Plane,
    PooledFrameAllocator,
};
pub use references::ReferenceRoles;

use std::collections::VecDeque;

use log::{debug, trace, warn};
use vp8dec_core::color::ColorRange;
use vp8dec_core::{PixelFormat, Vp8Error, Vp8Result};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{Frame, PictureType, VideoFrame};
use crate::packet::Packet;

use header::{FrameHeader, PersistentState, ProbabilityContext, parse_frame_header, parse_frame_tag};
use inter::{InterParams, McFilter};
use intra::IntraEdges;
use loop_filter::{FilterParams, FilterStrength};
use modes::{BModeContext, MacroblockGrid, ModeDecoder};
use quant::build_segment_dequant;
use range_coder::RangeDecoder;
use references::{ReferenceManager, ReferenceUpdate};
use residual::{CoeffContext, MacroblockCoeffs};

// ============================================================
// 宏块级工作表
// ============================================================

/// 随帧尺寸分配的宏块级工作表, 尺寸变化时整体重建
struct FrameTables {
    layout: FrameLayout,
    grid: MacroblockGrid,
    bmodes: BModeContext,
    coeff_ctx: CoeffContext,
    /// 上一宏块行未滤波的底行像素 (Y/U/V)
    above: [Vec<u8>; 3],
    /// 当前宏块行各宏块的滤波强度
    strengths: Vec<FilterStrength>,
}

impl FrameTables {
    fn try_new(layout: &FrameLayout) -> Vp8Result<Self> {
        let mb_width = layout.mb_width;
        let mut strengths = Vec::new();
        strengths
            .try_reserve_exact(mb_width)
            .map_err(|e| Vp8Error::OutOfMemory(format!("VP8: 分配滤波强度表失败: {}", e)))?;
        strengths.resize(mb_width, FilterStrength::default());
        Ok(Self {
            layout: *layout,
            grid: MacroblockGrid::try_new(mb_width, layout.mb_height)?,
            bmodes: BModeContext::try_new(mb_width)?,
            coeff_ctx: CoeffContext::try_new(mb_width)?,
            above: [
                filled_row(layout.plane_size(0).0)?,
                filled_row(layout.plane_size(1).0)?,
                filled_row(layout.plane_size(2).0)?,
            ],
            strengths,
        })
    }

    /// 解码一帧的全部宏块并写入 `frame`
    #[allow(clippy::too_many_arguments)]
    fn decode_macroblocks(
        &mut self,
        frame: &mut FrameBuffer,
        refs: &ReferenceManager,
        header: &FrameHeader,
        state: &PersistentState,
        mut rd: RangeDecoder<'_>,
        data: &[u8],
        deblock: bool,
    ) -> Vp8Result<()> {
        let mb_width = self.layout.mb_width;
        let mb_height = self.layout.mb_height;

        let dequant = build_segment_dequant(&header.quant, &state.segmentation);
        let modes = ModeDecoder::new(header, &state.probs, &state.segmentation);
        let mut partitions: Vec<RangeDecoder<'_>> = header
            .partitions
            .iter()
            .map(|range| RangeDecoder::new(&data[range.clone()]))
            .collect();
        let partition_mask = partitions.len() - 1;

        let filter_params = FilterParams {
            filter_type: header.filter_type,
            level: header.filter_level,
            sharpness: header.sharpness,
            keyframe: header.is_keyframe(),
        };
        let inter_params = InterParams {
            filter: if header.tag.uses_bilinear() {
                McFilter::Bilinear
            } else {
                McFilter::SixTap
            },
            full_pixel_chroma: header.tag.full_pixel_chroma(),
        };

        self.bmodes.reset_frame();
        self.coeff_ctx.reset_frame();
        let mut coeffs = MacroblockCoeffs::default();

        for mb_y in 0..mb_height {
            let part = &mut partitions[mb_y & partition_mask];
            self.bmodes.reset_row();
            self.coeff_ctx.reset_row();

            for mb_x in 0..mb_width {
                let mut mb = modes.decode(&mut rd, &mut self.grid, &mut self.bmodes, mb_x, mb_y);
                residual::decode_macroblock_coeffs(
                    part,
                    &state.probs.token,
                    &dequant[usize::from(mb.segment)],
                    &mut mb,
                    &mut self.coeff_ctx,
                    mb_x,
                    &mut coeffs,
                );
                self.grid.get_mut(mb_x, mb_y).skip = mb.skip;

                if mb.is_inter() {
                    let reference = refs.require(mb.ref_frame)?;
                    inter::predict_macroblock(frame, reference, &mb, mb_x, mb_y, inter_params);
                    if !mb.skip {
                        add_inter_residual(frame, &coeffs, mb_x, mb_y);
                    }
                } else {
                    let above = &self.above;
                    let edges = move |plane: usize| IntraEdges {
                        mb_x,
                        mb_y,
                        mb_width,
                        above: above[plane].as_slice(),
                    };
                    intra::reconstruct_luma(frame.plane_mut(0), &edges(0), &mb, &coeffs);
                    for (index, plane) in [(0, 1), (1, 2)] {
                        intra::reconstruct_chroma(
                            frame.plane_mut(plane),
                            &edges(plane),
                            mb.chroma_mode,
                            &coeffs,
                            index,
                        );
                    }
                }

                if deblock {
                    self.strengths[mb_x] = loop_filter::macroblock_strength(
                        &filter_params,
                        &state.segmentation,
                        &state.lf_deltas,
                        &mb,
                    );
                }
            }

            // 帧内预测使用未滤波的上方像素, 滤波前保存本行底边
            if mb_y + 1 < mb_height {
                for (index, above) in self.above.iter_mut().enumerate() {
                    let size = if index == 0 { 16 } else { 8 };
                    above.copy_from_slice(frame.plane(index).row((mb_y + 1) * size - 1));
                }
            }

            if deblock {
                for mb_x in 0..mb_width {
                    loop_filter::filter_macroblock(
                        frame,
                        &filter_params,
                        self.strengths[mb_x],
                        mb_x,
                        mb_y,
                    );
                }
            }
        }

        if !rd.is_exhausted() {
            trace!("VP8: 第一分区仍有剩余数据");
        }
        Ok(())
    }
}

/// 按平面宽度分配一行像素缓冲
fn filled_row(len: usize) -> Vp8Result<Vec<u8>> {
    let mut row = Vec::new();
    row.try_reserve_exact(len)
        .map_err(|e| Vp8Error::OutOfMemory(format!("VP8: 分配行缓冲失败: {}", e)))?;
    row.resize(len, 0);
    Ok(row)
}

/// 将帧间宏块的残差叠加到预测值上
fn add_inter_residual(frame: &mut FrameBuffer, coeffs: &MacroblockCoeffs, mb_x: usize, mb_y: usize) {
    let planes = frame.planes_mut();
    for (block, residual) in coeffs.blocks.iter().enumerate() {
        let (index, x, y) = match block {
            0..16 => (0, mb_x * 16 + (block % 4) * 4, mb_y * 16 + (block / 4) * 4),
            _ => {
                let sub = (block - 16) % 4;
                let index = if block < 20 { 1 } else { 2 };
                (index, mb_x * 8 + (sub % 2) * 4, mb_y * 8 + (sub / 2) * 4)
            }
        };
        let plane = &mut planes[index];
        let stride = plane.stride();
        let pos = plane.offset(x as isize, y as isize);
        idct::add_residual(residual, plane.data_mut(), pos, stride);
    }
}

// ============================================================
// 解码器
// ============================================================

/// VP8 解码器
pub struct Vp8Decoder {
    /// 已提交的持久状态
    state: PersistentState,
    /// 参考帧槽位与角色
    refs: ReferenceManager,
    /// 帧缓冲分配器
    allocator: Box<dyn FrameAllocator>,
    /// 宏块级工作表, 首个关键帧之前为 None
    tables: Option<FrameTables>,
    /// 丢帧与滤波策略
    config: Vp8DecoderConfig,
    /// 待取出的输出帧
    output_queue: VecDeque<Frame>,
    /// 是否已打开
    opened: bool,
    /// 是否处于刷新模式
    flushing: bool,
    /// 已解码 (含丢弃) 的帧数
    frame_count: u64,
}

impl Default for Vp8Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Vp8Decoder {
    /// 创建解码器, 使用默认分配器和默认配置
    pub fn new() -> Self {
        Self {
            state: PersistentState::default(),
            refs: ReferenceManager::default(),
            allocator: Box::new(PooledFrameAllocator::new()),
            tables: None,
            config: Vp8DecoderConfig::default(),
            output_queue: VecDeque::new(),
            opened: false,
            flushing: false,
            frame_count: 0,
        }
    }

    /// 创建解码器实例 (工厂函数)
    pub fn create() -> Vp8Result<Box<dyn Decoder>> {
        Ok(Box::new(Self::new()))
    }

    /// 当前配置
    pub fn config(&self) -> Vp8DecoderConfig {
        self.config
    }

    /// 替换配置, 从下一帧开始生效
    pub fn set_config(&mut self, config: Vp8DecoderConfig) {
        self.config = config;
    }

    /// 替换帧缓冲分配器
    ///
    /// 已持有的参考帧归还给旧分配器, 之后必须从关键帧重新开始.
    pub fn set_allocator(&mut self, allocator: Box<dyn FrameAllocator>) {
        self.refs.clear(self.allocator.as_mut());
        self.allocator = allocator;
    }

    /// 各参考角色当前指向的槽位
    pub fn references(&self) -> ReferenceRoles {
        self.refs.roles()
    }

    /// 指定槽位的参考帧缓冲
    pub fn reference_slot(&self, slot: usize) -> Option<&FrameBuffer> {
        self.refs.slot(slot)
    }

    /// 最近一个关键帧建立的帧布局
    pub fn layout(&self) -> Option<FrameLayout> {
        self.tables.as_ref().map(|t| t.layout)
    }

    /// 解码一帧压缩数据
    ///
    /// # 返回
    /// - `Ok(Some(frame))`: 可显示帧, 已按显示尺寸裁剪
    /// - `Ok(None)`: 不可见帧, 或被丢弃策略跳过
    /// - `Err(_)`: 当前帧作废, 持久状态不变
    pub fn decode_frame(&mut self, data: &[u8]) -> Vp8Result<Option<VideoFrame>> {
        let tag = parse_frame_tag(data)?;
        if !tag.keyframe && !self.refs.roles().is_complete() {
            warn!("VP8: 尚未收到关键帧, 丢弃帧间帧");
            return Err(Vp8Error::MissingReference(
                "VP8: 关键帧之前的帧间帧".into(),
            ));
        }

        let mut state = self.state.clone();
        let (header, rd) = parse_frame_header(data, tag, &mut state)?;
        let update = ReferenceUpdate::from_header(&header);
        self.frame_count += 1;

        let threshold = if !update.references_current() {
            Discard::NonRef
        } else if !header.is_keyframe() {
            Discard::NonKey
        } else {
            Discard::All
        };
        if self.config.skip_frame.covers(threshold) {
            debug!(
                "VP8: 第 {} 帧按策略 {} 丢弃 (门槛 {})",
                self.frame_count, self.config.skip_frame, threshold
            );
            self.commit_state(state, header.saved_probs);
            self.refs.commit(None, &update, self.allocator.as_mut());
            return Ok(None);
        }

        let layout = match (&self.tables, header.is_keyframe()) {
            (Some(tables), false) => tables.layout,
            (_, true) => FrameLayout::new(u32::from(tag.width), u32::from(tag.height)),
            (None, false) => {
                return Err(Vp8Error::MissingReference("VP8: 缺少帧布局".into()));
            }
        };
        let new_tables = match &self.tables {
            Some(tables) if tables.layout == layout => None,
            _ => Some(FrameTables::try_new(&layout)?),
        };

        let mut frame = self.allocator.allocate(&layout)?;
        if frame.layout() != &layout {
            let got = *frame.layout();
            self.allocator.release(frame);
            return Err(Vp8Error::InvalidArgument(format!(
                "VP8: 分配器返回 {}x{} 缓冲, 期望 {}x{}",
                got.width, got.height, layout.width, layout.height
            )));
        }

        // 之后只有宏块解码可能失败, 持久状态与参考帧角色在成功后才提交
        if let Some(tables) = new_tables {
            debug!(
                "VP8: 帧尺寸 {}x{} ({}x{} 宏块)",
                layout.width, layout.height, layout.mb_width, layout.mb_height
            );
            self.refs.clear(self.allocator.as_mut());
            self.tables = Some(tables);
        }
        let slot = self.refs.free_slot();
        let deblock =
            header.filter_level != 0 && !self.config.skip_loop_filter.covers(threshold);

        if let Some(tables) = self.tables.as_mut() {
            let decoded =
                tables.decode_macroblocks(&mut frame, &self.refs, &header, &state, rd, data, deblock);
            if let Err(e) = decoded {
                self.allocator.release(frame);
                return Err(e);
            }
        }
        frame.extend_borders();

        trace!(
            "VP8: 第 {} 帧 {} 写入槽位 {}, 滤波 {}",
            self.frame_count,
            if header.is_keyframe() { "关键帧" } else { "帧间帧" },
            slot,
            deblock
        );

        let output = header.tag.show_frame.then(|| output_frame(&frame, &header));
        self.commit_state(state, header.saved_probs);
        self.refs
            .commit(Some((slot, frame)), &update, self.allocator.as_mut());
        Ok(output)
    }

    /// 提交持久状态; 帧头要求不保留概率更新时恢复快照
    fn commit_state(&mut self, mut state: PersistentState, saved: Option<ProbabilityContext>) {
        if let Some(probs) = saved {
            state.probs = probs;
        }
        self.state = state;
    }
}

/// 按显示尺寸裁剪出输出帧
fn output_frame(frame: &FrameBuffer, header: &FrameHeader) -> VideoFrame {
    let layout = frame.layout();
    let format = PixelFormat::Yuv420p;
    let mut out = VideoFrame::new(layout.width, layout.height, format);
    for index in 0..3 {
        let width = format.plane_width(index, layout.width).unwrap_or(0);
        let height = format.plane_height(index, layout.height).unwrap_or(0);
        let plane = frame.plane(index);
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            data.extend_from_slice(&plane.row(y)[..width]);
        }
        out.data[index] = data;
        out.linesize[index] = width;
    }
    out.is_keyframe = header.is_keyframe();
    out.picture_type = if header.is_keyframe() {
        PictureType::I
    } else {
        PictureType::P
    };
    out.color_space = header.color_space;
    out.color_range = ColorRange::Limited;
    out
}

impl Decoder for Vp8Decoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Vp8
    }

    fn name(&self) -> &str {
        "vp8"
    }

    fn open(&mut self, params: &CodecParameters) -> Vp8Result<()> {
        if params.codec_id != CodecId::Vp8 {
            return Err(Vp8Error::InvalidArgument(format!(
                "VP8: 不支持的编解码器 {}",
                params.codec_id
            )));
        }
        if let Some(video) = params.video() {
            if video.width != 0 && video.height != 0 {
                debug!(
                    "VP8: 容器声明尺寸 {}x{}, 以关键帧为准",
                    video.width, video.height
                );
            }
        }
        self.config.apply_env();
        self.output_queue.clear();
        self.flushing = false;
        self.opened = true;
        debug!(
            "VP8: 打开解码器, skip_frame={}, skip_loop_filter={}",
            self.config.skip_frame, self.config.skip_loop_filter
        );
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> Vp8Result<()> {
        if !self.opened {
            return Err(Vp8Error::InvalidArgument("VP8: 解码器未打开".into()));
        }
        if packet.is_empty() {
            self.flushing = true;
            return Ok(());
        }

        if let Some(mut frame) = self.decode_frame(&packet.data)? {
            frame.pts = packet.pts;
            frame.time_base = packet.time_base;
            frame.duration = packet.duration;
            self.output_queue.push_back(Frame::Video(frame));
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Vp8Result<Frame> {
        if let Some(frame) = self.output_queue.pop_front() {
            return Ok(frame);
        }
        if self.flushing {
            Err(Vp8Error::Eof)
        } else {
            Err(Vp8Error::NeedMoreData)
        }
    }

    fn flush(&mut self) {
        debug!("VP8: 刷新解码器, 丢弃 {} 个待输出帧", self.output_queue.len());
        self.output_queue.clear();
        self.flushing = false;
        self.refs.clear(self.allocator.as_mut());
        self.state = PersistentState::default();
    }
}
