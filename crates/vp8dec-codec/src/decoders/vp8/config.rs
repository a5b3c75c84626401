//! 解码器配置: 丢帧与跳过环路滤波策略.

use std::fmt;
use std::str::FromStr;

use log::warn;
use vp8dec_core::Vp8Error;

/// 丢弃策略, 按丢弃范围从小到大排序
///
/// 一帧的 "门槛" 由帧的性质决定: 不被参考的帧为 `NonRef`, 其余帧间帧为 `NonKey`,
/// 关键帧为 `All`. 策略不小于门槛时该帧被丢弃 (或跳过滤波).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Discard {
    /// 不丢弃
    #[default]
    None,
    /// 丢弃不被任何参考角色引用的帧
    NonRef,
    /// 丢弃所有帧间帧
    NonKey,
    /// 丢弃所有帧
    All,
}

impl Discard {
    /// 该策略是否覆盖门槛为 `threshold` 的帧
    pub fn covers(self, threshold: Discard) -> bool {
        self != Discard::None && self >= threshold
    }
}

impl FromStr for Discard {
    type Err = Vp8Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "nonref" => Ok(Self::NonRef),
            "nonkey" => Ok(Self::NonKey),
            "all" => Ok(Self::All),
            other => Err(Vp8Error::InvalidArgument(format!(
                "VP8: 未知的丢弃策略 \"{}\" (可选 none|nonref|nonkey|all)",
                other
            ))),
        }
    }
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::NonRef => "nonref",
            Self::NonKey => "nonkey",
            Self::All => "all",
        };
        write!(f, "{name}")
    }
}

/// VP8 解码器配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vp8DecoderConfig {
    /// 整帧丢弃策略
    pub skip_frame: Discard,
    /// 跳过环路滤波的策略
    pub skip_loop_filter: Discard,
}

/// 丢帧策略环境变量
pub const ENV_SKIP_FRAME: &str = "VP8DEC_SKIP_FRAME";
/// 跳过环路滤波策略环境变量
pub const ENV_SKIP_LOOP_FILTER: &str = "VP8DEC_SKIP_LOOP_FILTER";

impl Vp8DecoderConfig {
    /// 从环境变量读取配置, 未设置或无法识别的值按默认处理
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// 用环境变量覆盖已设置的字段, 未设置的变量保持原值
    pub fn apply_env(&mut self) {
        if let Some(discard) = discard_from_env(ENV_SKIP_FRAME) {
            self.skip_frame = discard;
        }
        if let Some(discard) = discard_from_env(ENV_SKIP_LOOP_FILTER) {
            self.skip_loop_filter = discard;
        }
    }
}

fn discard_from_env(key: &str) -> Option<Discard> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(discard) => Some(discard),
        Err(e) => {
            warn!("{}={} 无效, 忽略: {}", key, value, e);
            None
        }
    }
}
