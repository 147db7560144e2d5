//! 商品数据
//!
//! [`GoodDescriptor`] 是对一条原始商品记录的只读视图。所有字段在构造时
//! 逐一校验，构造成功即保证每个访问器都可用；任何字段缺失或类型不符都会
//! 以 `MalformedRecord` 返回，并指明是哪一个字段。

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ExchangeError, Result};

/// 服务端返回的原始商品记录
pub type GoodRecord = Map<String, Value>;

/// `type` 字段：只在指定时间开放兑换
pub const TYPE_SCHEDULED: i64 = 1;
/// `type` 字段：游戏内物品，需要绑定游戏角色
pub const TYPE_IN_GAME: i64 = 2;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 限购周期
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleKind {
    Forever,
    Month,
    /// 未识别的周期类型，原样保留
    Other(String),
}

impl CycleKind {
    fn parse(raw: &str) -> Self {
        match raw {
            "forever" => Self::Forever,
            "month" => Self::Month,
            other => Self::Other(other.to_string()),
        }
    }
}

/// 限购信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodLimit {
    /// 已经兑换次数
    pub redeemed: i64,
    /// 最多可兑换次数
    pub max: i64,
    /// 限购周期
    pub cycle: CycleKind,
}

// ---------------------------------------------------------------------------
// 字段读取
// ---------------------------------------------------------------------------

fn field<'a>(record: &'a GoodRecord, name: &'static str) -> Result<&'a Value> {
    record.get(name).ok_or(ExchangeError::MalformedRecord {
        field: name,
        problem: "缺失".to_string(),
    })
}

/// 读取整数字段，兼容服务端以字符串形式下发的数字
pub(crate) fn int_field(record: &GoodRecord, name: &'static str) -> Result<i64> {
    let value = field(record, name)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::MalformedRecord {
        field: name,
        problem: format!("不是整数: {value}"),
    })
}

/// 读取字符串字段，数字会被转换为字符串（商品 ID 有时以数字下发）
fn str_field(record: &GoodRecord, name: &'static str) -> Result<String> {
    let value = field(record, name)?;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ExchangeError::MalformedRecord {
            field: name,
            problem: format!("不是字符串: {value}"),
        }),
    }
}

/// 兑换时间是否未知："type" 不为 1 且 "next_time" 为 0，
/// 表示任何时间均可兑换或兑换已结束，无法区分
fn is_unscheduled(kind: i64, next_time: i64) -> bool {
    kind != TYPE_SCHEDULED && next_time == 0
}

/// 兑换窗口已永久关闭或尚未排期：列表中应直接剔除
pub(crate) fn is_closed(record: &GoodRecord) -> Result<bool> {
    let kind = int_field(record, "type")?;
    let next_time = int_field(record, "next_time")?;
    Ok(kind == TYPE_SCHEDULED && next_time == 0)
}

fn format_timestamp(ts: i64) -> Result<String> {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|t| t.format(TIME_FORMAT).to_string())
        .ok_or_else(|| ExchangeError::MalformedRecord {
            field: "sale_start_time",
            problem: format!("无效的时间戳: {ts}"),
        })
}

// ---------------------------------------------------------------------------
// GoodDescriptor
// ---------------------------------------------------------------------------

/// 米游币商品
#[derive(Debug, Clone)]
pub struct GoodDescriptor {
    good_id: String,
    name: String,
    price: i64,
    kind: i64,
    sale_start_time: i64,
    sale_time: Option<String>,
    stock: Option<i64>,
    limit: GoodLimit,
    icon: String,
    game_biz: String,
    raw: GoodRecord,
}

impl GoodDescriptor {
    /// 校验并构造商品视图
    pub fn from_record(raw: GoodRecord) -> Result<Self> {
        let good_id = str_field(&raw, "goods_id")?;
        let name = str_field(&raw, "goods_name")?;
        let price = int_field(&raw, "price")?;
        let kind = int_field(&raw, "type")?;
        let next_time = int_field(&raw, "next_time")?;
        let next_num = int_field(&raw, "next_num")?;
        let sale_start_time = int_field(&raw, "sale_start_time")?;
        let limit = GoodLimit {
            redeemed: int_field(&raw, "account_exchange_num")?,
            max: int_field(&raw, "account_cycle_limit")?,
            cycle: CycleKind::parse(&str_field(&raw, "account_cycle_type")?),
        };
        let icon = str_field(&raw, "icon")?;
        let game_biz = str_field(&raw, "game_biz")?;

        let (sale_time, stock) = if is_unscheduled(kind, next_time) {
            (None, None)
        } else {
            (Some(format_timestamp(sale_start_time)?), Some(next_num))
        };

        Ok(Self {
            good_id,
            name,
            price,
            kind,
            sale_start_time,
            sale_time,
            stock,
            limit,
            icon,
            game_biz,
            raw,
        })
    }

    /// 从任意 JSON 值构造，非对象直接视为数据不正确
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_record(map),
            other => Err(ExchangeError::MalformedRecord {
                field: "<record>",
                problem: format!("不是对象: {other}"),
            }),
        }
    }

    /// 商品名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 商品 ID
    pub fn good_id(&self) -> &str {
        &self.good_id
    }

    /// 商品价格（米游币）
    pub fn price(&self) -> i64 {
        self.price
    }

    /// 兑换开放时间（本地时间），时间未知时为 None
    pub fn sale_time(&self) -> Option<&str> {
        self.sale_time.as_deref()
    }

    /// 原始开放时间戳（秒）
    pub fn sale_start_timestamp(&self) -> i64 {
        self.sale_start_time
    }

    /// 库存，时间未知时为 None
    pub fn stock(&self) -> Option<i64> {
        self.stock
    }

    /// 限购信息
    pub fn limit(&self) -> &GoodLimit {
        &self.limit
    }

    /// 商品图片
    pub fn icon(&self) -> &str {
        &self.icon
    }

    /// 游戏区服（例如 hk4e_cn）
    pub fn game_biz(&self) -> &str {
        &self.game_biz
    }

    pub fn requires_game_binding(&self) -> bool {
        self.kind == TYPE_IN_GAME
    }

    pub fn raw(&self) -> &GoodRecord {
        &self.raw
    }
}
