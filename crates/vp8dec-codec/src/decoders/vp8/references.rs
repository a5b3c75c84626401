//! 参考帧生命周期管理.
//!
//! 4 个物理缓冲槽位, 3 个逻辑角色 (previous/golden/altref). 同一缓冲可以同时
//! 承担多个角色; 当前帧总是取第一个未被任何角色引用的槽位.
//! 角色更新完成后, 不再被引用的缓冲归还给分配器.

use log::trace;
use vp8dec_core::{Vp8Error, Vp8Result};

use super::frame_buffer::{FrameAllocator, FrameBuffer};
use super::header::FrameHeader;

/// 槽位数量
pub(super) const NUM_SLOTS: usize = 4;

/// 宏块使用的参考帧, 数值即环路滤波增量表下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(super) enum RefFrame {
    /// 帧内预测 (当前帧)
    #[default]
    Current = 0,
    Previous = 1,
    Golden = 2,
    AltRef = 3,
}

/// 各角色当前指向的槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceRoles {
    /// 上一帧
    pub previous: Option<usize>,
    /// 黄金帧
    pub golden: Option<usize>,
    /// 替代参考帧
    pub altref: Option<usize>,
}

impl ReferenceRoles {
    /// 三个角色是否均已就绪
    pub fn is_complete(&self) -> bool {
        self.previous.is_some() && self.golden.is_some() && self.altref.is_some()
    }

    /// 槽位是否被任何角色引用
    pub fn references(&self, slot: usize) -> bool {
        [self.previous, self.golden, self.altref].contains(&Some(slot))
    }
}

/// 角色更新来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RefSource {
    Current,
    Previous,
    Golden,
    AltRef,
}

/// 一帧解码后的角色更新
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ReferenceUpdate {
    pub(super) golden: Option<RefSource>,
    pub(super) altref: Option<RefSource>,
    pub(super) previous: bool,
}

impl ReferenceUpdate {
    /// 由帧头标志推导
    pub(super) fn from_header(header: &FrameHeader) -> Self {
        if header.is_keyframe() {
            return Self {
                golden: Some(RefSource::Current),
                altref: Some(RefSource::Current),
                previous: true,
            };
        }
        let golden = if header.refresh_golden {
            Some(RefSource::Current)
        } else {
            match header.copy_to_golden {
                1 => Some(RefSource::Previous),
                2 => Some(RefSource::AltRef),
                _ => None,
            }
        };
        let altref = if header.refresh_altref {
            Some(RefSource::Current)
        } else {
            match header.copy_to_altref {
                1 => Some(RefSource::Previous),
                2 => Some(RefSource::Golden),
                _ => None,
            }
        };
        Self {
            golden,
            altref,
            previous: header.refresh_last,
        }
    }

    /// 当前帧是否会成为任何角色的参考
    pub(super) fn references_current(&self) -> bool {
        self.previous
            || self.golden == Some(RefSource::Current)
            || self.altref == Some(RefSource::Current)
    }
}

/// 参考帧管理器
#[derive(Default)]
pub(super) struct ReferenceManager {
    slots: [Option<FrameBuffer>; NUM_SLOTS],
    roles: ReferenceRoles,
}

impl ReferenceManager {
    pub(super) fn roles(&self) -> ReferenceRoles {
        self.roles
    }

    /// 第一个未被任何角色引用的槽位
    pub(super) fn free_slot(&self) -> usize {
        (0..NUM_SLOTS)
            .find(|&slot| !self.roles.references(slot))
            .unwrap_or(NUM_SLOTS - 1)
    }

    /// 指定参考帧的缓冲, 帧内 (`Current`) 返回 None
    pub(super) fn get(&self, reference: RefFrame) -> Option<&FrameBuffer> {
        let slot = match reference {
            RefFrame::Current => None,
            RefFrame::Previous => self.roles.previous,
            RefFrame::Golden => self.roles.golden,
            RefFrame::AltRef => self.roles.altref,
        }?;
        self.slots[slot].as_ref()
    }

    /// 帧间宏块的参考帧, 角色未就绪时视为码流损坏
    pub(super) fn require(&self, reference: RefFrame) -> Vp8Result<&FrameBuffer> {
        self.get(reference).ok_or_else(|| {
            Vp8Error::InvalidData(format!("VP8: 帧间宏块引用了缺失的参考帧 {:?}", reference))
        })
    }

    /// 槽位中的缓冲
    pub(super) fn slot(&self, slot: usize) -> Option<&FrameBuffer> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// 提交一帧的角色更新
    ///
    /// `current` 为当前帧解码后的缓冲及其槽位; 被丢弃的帧传 None,
    /// 此时只执行不涉及当前帧的更新.
    /// golden/altref 的来源按更新前的角色解析, 因此互相复制等价于交换.
    pub(super) fn commit(
        &mut self,
        current: Option<(usize, FrameBuffer)>,
        update: &ReferenceUpdate,
        allocator: &mut dyn FrameAllocator,
    ) {
        let before = self.roles;
        let current_slot = match current {
            Some((slot, buffer)) => {
                if let Some(old) = self.slots[slot].replace(buffer) {
                    allocator.release(old);
                }
                Some(slot)
            }
            None => None,
        };

        let resolve = |source: RefSource| match source {
            RefSource::Current => current_slot,
            RefSource::Previous => before.previous,
            RefSource::Golden => before.golden,
            RefSource::AltRef => before.altref,
        };

        if let Some(source) = update.golden {
            if source != RefSource::Current || current_slot.is_some() {
                self.roles.golden = resolve(source);
            }
        }
        if let Some(source) = update.altref {
            if source != RefSource::Current || current_slot.is_some() {
                self.roles.altref = resolve(source);
            }
        }
        if update.previous && current_slot.is_some() {
            self.roles.previous = current_slot;
        }

        trace!("VP8: 参考角色 {:?} -> {:?}", before, self.roles);
        self.release_unreferenced(allocator);
    }

    /// 归还未被引用的缓冲
    fn release_unreferenced(&mut self, allocator: &mut dyn FrameAllocator) {
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if !self.roles.references(slot) {
                if let Some(buffer) = entry.take() {
                    allocator.release(buffer);
                }
            }
        }
    }

    /// 清空所有角色并归还全部缓冲
    pub(super) fn clear(&mut self, allocator: &mut dyn FrameAllocator) {
        self.roles = ReferenceRoles::default();
        self.release_unreferenced(allocator);
    }
}
