//! VP8 布尔熵解码器 (range decoder).
//!
//! 按给定概率逐位解码. 读过缓冲区末尾时按 0 字节补齐, 从不报错,
//! 码流损坏只能由上层的结构校验 (分区大小等) 发现.

/// 布尔熵解码器
///
/// `value` 始终保持 2 字节窗口, `range` 归一化到 [128, 255].
#[derive(Clone)]
pub(super) struct RangeDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    value: u32,
    range: u32,
    bit_count: u32,
}

impl<'a> RangeDecoder<'a> {
    /// 以缓冲区起始的 2 个字节初始化解码窗口
    pub(super) fn new(data: &'a [u8]) -> Self {
        let mut rd = Self {
            data,
            pos: 0,
            value: 0,
            range: 255,
            bit_count: 0,
        };
        rd.value = (u32::from(rd.next_byte()) << 8) | u32::from(rd.next_byte());
        rd
    }

    #[inline]
    fn next_byte(&mut self) -> u8 {
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => 0,
        }
    }

    /// 是否已经读过缓冲区末尾 (仅用于诊断)
    pub(super) fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// 按概率 `prob` (bit 为 0 的概率 * 256) 解码 1 位
    #[inline]
    pub(super) fn read_bool(&mut self, prob: u8) -> bool {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        let big_split = split << 8;
        let bit = if self.value >= big_split {
            self.range -= split;
            self.value -= big_split;
            true
        } else {
            self.range = split;
            false
        };

        if self.range < 128 {
            // range >= 1, 单次最多左移 7 位, 因此最多补入一个字节
            let shift = self.range.leading_zeros() - 24;
            self.range <<= shift;
            self.value <<= shift;
            self.bit_count += shift;
            if self.bit_count >= 8 {
                self.bit_count -= 8;
                self.value |= u32::from(self.next_byte()) << self.bit_count;
            }
        }
        bit
    }

    /// 等概率解码 1 位
    #[inline]
    pub(super) fn read_flag(&mut self) -> bool {
        self.read_bool(128)
    }

    /// 读取 n 位无符号数 (高位在前)
    pub(super) fn read_literal(&mut self, bits: u32) -> u32 {
        let mut v = 0u32;
        for _ in 0..bits {
            v = (v << 1) | u32::from(self.read_flag());
        }
        v
    }

    /// 读取 n 位幅值后跟 1 个符号位
    ///
    /// 即使幅值为 0 也会消耗符号位.
    pub(super) fn read_signed_literal(&mut self, bits: u32) -> i32 {
        let magnitude = self.read_literal(bits) as i32;
        if self.read_flag() { -magnitude } else { magnitude }
    }

    /// 头部常用的可选有符号字段: 标志位为 0 时取 0
    pub(super) fn read_optional_signed(&mut self, bits: u32) -> i32 {
        if self.read_flag() {
            self.read_signed_literal(bits)
        } else {
            0
        }
    }

    /// 可选的 8 位概率值, 标志位为 0 时返回 `default`
    pub(super) fn read_optional_prob(&mut self, default: u8) -> u8 {
        if self.read_flag() {
            self.read_literal(8) as u8
        } else {
            default
        }
    }

    /// 按二叉树解码符号
    ///
    /// 树以数组表示: 非正数为叶子 (取负得到符号), 正数为下一节点下标.
    /// 节点 `i` 使用概率 `probs[i >> 1]`.
    pub(super) fn read_tree(&mut self, tree: &[i8], probs: &[u8]) -> usize {
        self.read_tree_from(tree, probs, 0)
    }

    /// 从指定节点开始按二叉树解码
    pub(super) fn read_tree_from(&mut self, tree: &[i8], probs: &[u8], start: usize) -> usize {
        let mut node = start;
        loop {
            let bit = usize::from(self.read_bool(probs[node >> 1]));
            let next = tree[node + bit];
            if next <= 0 {
                return usize::from(next.unsigned_abs());
            }
            node = next as usize;
        }
    }
}
