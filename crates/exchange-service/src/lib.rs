//! 米游币商品兑换核心
//!
//! 分页拉取米游社商城的可兑换商品，并为 (账户, 商品) 构造一次性兑换任务：
//! 游戏内物品会先检查凭据、匹配游戏角色，再向商城提交兑换。

pub mod account;
pub mod api;
pub mod catalog;
pub mod error;
pub mod exchange;
pub mod game;
pub mod game_record;
pub mod good;
pub mod headers;

pub use account::Account;
pub use api::{ExchangePayload, MallApi, MallClient};
pub use catalog::CatalogFetcher;
pub use error::{ExchangeError, Result};
pub use exchange::{
    BindingStatus, CompletionStatus, ExchangeContext, ExchangeOutcome, ExchangeTask, TaskOptions,
    TaskState,
};
pub use game::GameKey;
pub use game_record::{GameInfo, GameRecord, GameRecordService};
pub use good::GoodDescriptor;
