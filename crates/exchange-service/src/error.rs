//! 兑换服务专用错误类型
//!
//! 在共享库 SharedError 基础上定义本服务特有的错误变体，
//! 使调用方可以区分"网络失败/返回结构异常/商品数据异常/不满足兑换条件"等不同原因。
//! 注意：服务端明确拒绝兑换（售罄、已达限购等）不是错误，而是正常的兑换结果。

use std::fmt;

use myb_shared::error::SharedError;

/// 请求所处的阶段，用于日志与错误定位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 拉取商品列表
    GoodsList,
    /// 查询商品详情
    GoodsDetail,
    /// 查询支持的游戏列表
    GameList,
    /// 查询账户游戏角色记录
    GameRecord,
    /// 提交兑换
    Exchange,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GoodsList => "获取商品列表",
            Self::GoodsDetail => "获取商品详情",
            Self::GameList => "获取游戏列表",
            Self::GameRecord => "获取游戏角色记录",
            Self::Exchange => "执行兑换",
        };
        f.write_str(s)
    }
}

/// 账户不满足兑换游戏内物品的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    /// Cookie 中没有 stoken
    MissingStoken,
    /// stoken 为 v2 类型但 Cookie 中没有 mid
    V2StokenWithoutMid,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStoken => f.write_str("商品为游戏内物品，由于未配置stoken，放弃兑换"),
            Self::V2StokenWithoutMid => {
                f.write_str("商品为游戏内物品，由于stoken为\"v2\"类型，且未配置mid，放弃兑换")
            }
        }
    }
}

/// 兑换核心错误
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// 服务器返回的 JSON 缺少预期字段
    #[error("{stage}: 服务器没有正确返回 ({detail})")]
    MalformedResponse { stage: Stage, detail: String },

    /// 传输层失败（连接、超时、TLS 等）
    #[error("{stage}: 网络请求失败 ({message})")]
    NetworkFailure { stage: Stage, message: String },

    /// 商品数据缺少必需字段或类型不符
    #[error("米游币商品数据不正确: 字段 {field} {problem}")]
    MalformedRecord { field: &'static str, problem: String },

    /// 分页拉取失败次数耗尽，不返回部分结果
    #[error("商品列表不可用: game={game}, 累计失败 {attempts} 次")]
    CatalogUnavailable { game: String, attempts: u32 },

    /// 账户缺少兑换游戏内物品所需的凭据
    #[error("商品 {good_id} 不满足兑换条件: {reason}")]
    Ineligible {
        good_id: String,
        reason: IneligibleReason,
    },

    /// 对不满足条件的任务调用了 start
    #[error("商品 {good_id} 未初始化完成，放弃兑换")]
    Uninitialized { good_id: String },

    /// 兑换任务只能执行一次
    #[error("商品 {good_id} 的兑换任务已执行过")]
    AlreadyStarted { good_id: String },

    /// 被上层调度器取消
    #[error("{stage}: 任务已取消")]
    Aborted { stage: Stage },

    /// 严格模式下，初始化阶段的信息获取失败
    #[error("商品 {good_id} 初始化不完整: {cause}")]
    Degraded { good_id: String, cause: String },

    /// 请求头无法构造
    #[error("无效的请求头: {name} - {message}")]
    InvalidHeader { name: String, message: String },

    /// 透传共享库错误
    #[error(transparent)]
    Shared(#[from] SharedError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, ExchangeError>;

impl ExchangeError {
    pub fn malformed(stage: Stage, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            stage,
            detail: detail.into(),
        }
    }

    pub fn network(stage: Stage, message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            stage,
            message: message.into(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            Self::NetworkFailure { .. } => "NETWORK_FAILURE",
            Self::MalformedRecord { .. } => "MALFORMED_RECORD",
            Self::CatalogUnavailable { .. } => "CATALOG_UNAVAILABLE",
            Self::Ineligible { .. } => "INELIGIBLE",
            Self::Uninitialized { .. } => "UNINITIALIZED",
            Self::AlreadyStarted { .. } => "ALREADY_STARTED",
            Self::Aborted { .. } => "ABORTED",
            Self::Degraded { .. } => "DEGRADED",
            Self::InvalidHeader { .. } => "INVALID_HEADER",
            Self::Shared(e) => e.code(),
        }
    }

    /// 是否计入分页重试预算
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MalformedResponse { .. } | Self::NetworkFailure { .. } => true,
            _ => false,
        }
    }

    /// 指标标签使用的简短分类
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedResponse { .. } => "malformed",
            Self::NetworkFailure { .. } => "network",
            _ => "other",
        }
    }
}
