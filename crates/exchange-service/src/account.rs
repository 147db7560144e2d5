//! 账户视图
//!
//! 账户数据由外部的账户存储维护，兑换核心只读取其中的 Cookie、设备 ID、
//! 收货地址和各游戏绑定的 UID，从不修改或持久化。

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::game::GameKey;

const STOKEN_KEY: &str = "stoken";
const MID_KEY: &str = "mid";
/// v2 类型 stoken 的前缀，此类 stoken 需要配合 mid 使用
const STOKEN_V2_PREFIX: &str = "v2__";

/// 米游社账户
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    /// 账户标识（手机号或昵称，仅用于日志）
    pub name: String,
    /// 登录 Cookie，键为 Cookie 名
    pub cookie: BTreeMap<String, String>,
    /// 该账户专属的设备 ID
    pub device_id: String,
    /// 收货地址 ID
    pub address_id: String,
    /// 各游戏绑定的角色 UID
    #[serde(default)]
    pub game_uids: HashMap<GameKey, String>,
}

impl Account {
    pub fn stoken(&self) -> Option<&str> {
        self.cookie.get(STOKEN_KEY).map(String::as_str)
    }

    pub fn mid(&self) -> Option<&str> {
        self.cookie.get(MID_KEY).map(String::as_str)
    }

    /// stoken 是否为 v2 类型
    pub fn has_v2_stoken(&self) -> bool {
        self.stoken()
            .is_some_and(|s| s.starts_with(STOKEN_V2_PREFIX))
    }

    /// 指定游戏绑定的 UID
    pub fn uid_for(&self, game: GameKey) -> Option<&str> {
        self.game_uids.get(&game).map(String::as_str)
    }

    /// 拼接为 `Cookie` 请求头的值
    pub fn cookie_header(&self) -> String {
        self.cookie
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
