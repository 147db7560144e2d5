//! 游戏角色记录
//!
//! 兑换游戏内物品时需要知道账户在对应游戏里的角色 UID 和所在服务器。
//! 查询本身由外部服务完成，这里只定义接口和匹配规则。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::account::Account;
use crate::error::Result;
use crate::game::GameKey;

/// 米游社支持的游戏
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub id: u32,
    pub name: String,
    /// 区服标识前缀，例如 `hk4e_cn`
    pub game_biz: String,
}

/// 账户在某个游戏中的角色记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub uid: String,
    /// 服务器，例如 `cn_gf01`
    pub region: String,
    pub game_biz: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub level: u32,
}

/// 游戏角色查询服务
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameRecordService: Send + Sync {
    /// 支持的游戏列表
    async fn game_list(&self) -> Result<Vec<GameInfo>>;

    /// 账户绑定的全部游戏角色
    async fn game_records(&self, account: &Account) -> Result<Vec<GameRecord>>;
}

/// 为商品挑选要绑定的角色
///
/// 商品的 `game_biz` 决定游戏分区（无法识别时按原神处理），取账户在该分区登记的 UID，
/// 与角色记录逐一比对。找不到时返回 None。
pub fn match_record<'a>(
    good_game_biz: &str,
    records: &'a [GameRecord],
    account: &Account,
) -> Option<&'a GameRecord> {
    let game = GameKey::from_game_biz(good_game_biz).unwrap_or(GameKey::Ys);

    let Some(uid) = account.uid_for(game) else {
        warn!(game = %game, account = %account.name, "账户未登记该游戏的 UID");
        return None;
    };

    let found = records.iter().find(|r| {
        r.uid == uid && GameKey::from_game_biz(&r.game_biz).is_none_or(|k| k == game)
    });
    debug!(game = %game, uid, matched = found.is_some(), "角色记录匹配完成");
    found
}
