//! 游戏分区枚举
//!
//! 商城按游戏划分商品，接口参数使用内部命名空间（如原神为 `hk4e`），
//! 与对外展示的简称不同。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

/// 商城支持的游戏分区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKey {
    /// 崩坏3
    Bh3,
    /// 原神
    Ys,
    /// 崩坏学园2
    Bh2,
    /// 未定事件簿
    Wd,
    /// 米游社
    Bbs,
}

impl GameKey {
    pub const ALL: [GameKey; 5] = [Self::Bh3, Self::Ys, Self::Bh2, Self::Wd, Self::Bbs];

    /// 商城接口使用的命名空间
    pub fn namespace(self) -> &'static str {
        match self {
            Self::Bh3 => "bh3",
            Self::Ys => "hk4e",
            Self::Bh2 => "bh2",
            Self::Wd => "nxx",
            Self::Bbs => "bbs",
        }
    }

    /// 由区服标识（如 `hk4e_cn`）反查分区
    pub fn from_game_biz(game_biz: &str) -> Option<Self> {
        let namespace = game_biz.split('_').next().unwrap_or_default();
        Self::ALL.into_iter().find(|k| k.namespace() == namespace)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bh3 => "bh3",
            Self::Ys => "ys",
            Self::Bh2 => "bh2",
            Self::Wd => "wd",
            Self::Bbs => "bbs",
        }
    }
}

impl fmt::Display for GameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameKey {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                ExchangeError::Shared(myb_shared::error::SharedError::InvalidConfig {
                    field: "game".to_string(),
                    message: format!("不支持的游戏: {s}"),
                })
            })
    }
}
