//! 米游币商城 HTTP 接口
//!
//! 将商品列表、商品详情、兑换三个接口封装为统一的 [`MallApi`] trait，
//! 上层（分页拉取、兑换任务）只依赖该 trait，测试时用 mock 替换。
//!
//! 实现只负责传输：连接/超时等失败转换为 `NetworkFailure`，响应体不是
//! JSON 时转换为 `MalformedResponse`；字段是否齐全由调用方判断。

use std::time::Duration;

use async_trait::async_trait;
use myb_shared::config::{DeviceConfig, MallConfig};
use myb_shared::error::SharedError;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::account::Account;
use crate::error::{ExchangeError, Result, Stage};
use crate::headers::{HeaderOverrides, HeaderTemplate, generate_device_id};

/// 每页商品数量，服务端固定
pub const PAGE_SIZE: u32 = 20;
/// 商城应用 ID
pub const APP_ID: u32 = 1;
/// 积分体系标识：米游币
pub const POINT_SN: &str = "myb";

const GOODS_LIST_PATH: &str = "/mall/v1/web/goods/list";
const GOODS_DETAIL_PATH: &str = "/mall/v1/web/goods/detail";
const EXCHANGE_PATH: &str = "/mall/v1/web/goods/exchange";

// ---------------------------------------------------------------------------
// 请求体
// ---------------------------------------------------------------------------

/// 兑换请求体
///
/// 游戏内物品需要额外携带 `uid`、`region`、`game_biz`，未绑定时这三个字段不序列化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangePayload {
    pub app_id: u32,
    pub point_sn: String,
    pub goods_id: String,
    pub exchange_num: u32,
    pub address_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_biz: Option<String>,
}

impl ExchangePayload {
    pub fn new(goods_id: impl Into<String>, address_id: impl Into<String>) -> Self {
        Self {
            app_id: APP_ID,
            point_sn: POINT_SN.to_string(),
            goods_id: goods_id.into(),
            exchange_num: 1,
            address_id: address_id.into(),
            uid: None,
            region: None,
            game_biz: None,
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.uid.is_some()
    }
}

// ---------------------------------------------------------------------------
// Trait 抽象 — 便于测试时替换为 mock 实现
// ---------------------------------------------------------------------------

/// 商城接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MallApi: Send + Sync {
    /// 获取指定游戏命名空间的一页商品，返回完整响应体
    async fn goods_page(&self, namespace: &str, page: u32) -> Result<Value>;

    /// 获取单个商品详情，返回完整响应体
    async fn goods_detail(&self, good_id: &str) -> Result<Value>;

    /// 以账户身份提交兑换，返回完整响应体
    async fn exchange(&self, payload: &ExchangePayload, account: &Account) -> Result<Value>;
}

/// 从列表响应中取出 `data.list`
pub fn extract_list(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Object(mut root) => match root.remove("data") {
            Some(Value::Object(mut data)) => match data.remove("list") {
                Some(Value::Array(list)) => Ok(list),
                _ => Err(ExchangeError::malformed(Stage::GoodsList, "缺少 data.list")),
            },
            _ => Err(ExchangeError::malformed(Stage::GoodsList, "缺少 data")),
        },
        _ => Err(ExchangeError::malformed(Stage::GoodsList, "响应不是 JSON 对象")),
    }
}

/// 从详情响应中取出 `data`
pub fn extract_data(body: Value) -> Result<serde_json::Map<String, Value>> {
    match body {
        Value::Object(mut root) => match root.remove("data") {
            Some(Value::Object(data)) => Ok(data),
            _ => Err(ExchangeError::malformed(Stage::GoodsDetail, "缺少 data")),
        },
        _ => Err(ExchangeError::malformed(Stage::GoodsDetail, "响应不是 JSON 对象")),
    }
}

// ---------------------------------------------------------------------------
// reqwest 实现
// ---------------------------------------------------------------------------

/// 商城 HTTP 客户端
///
/// 请求头模板在构造时确定；商品列表使用客户端级别的设备 ID（进程内稳定），
/// 兑换使用账户自己的设备 ID，多个账户共用一个客户端时不会互相串号。
pub struct MallClient {
    http: reqwest::Client,
    base_url: String,
    device_id: String,
    list_headers: HeaderTemplate,
    exchange_headers: HeaderTemplate,
}

impl MallClient {
    pub fn new(mall: &MallConfig, device: &DeviceConfig) -> Result<Self> {
        Self::with_timeout(mall, device, mall.request_timeout())
    }

    pub fn with_timeout(
        mall: &MallConfig,
        device: &DeviceConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SharedError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        let device_id = generate_device_id();
        info!(
            base_url = %mall.base_url,
            timeout_ms = timeout.as_millis() as u64,
            device_id = %device_id,
            "商城客户端已初始化"
        );

        Ok(Self {
            http,
            base_url: mall.base_url.trim_end_matches('/').to_string(),
            device_id,
            list_headers: HeaderTemplate::goods_list(device)?,
            exchange_headers: HeaderTemplate::exchange(device)?,
        })
    }

    /// 商品列表请求使用的设备 ID
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn goods_list_url(&self, namespace: &str, page: u32) -> String {
        format!(
            "{}{}?app_id={}&point_sn={}&page_size={}&page={}&game={}",
            self.base_url, GOODS_LIST_PATH, APP_ID, POINT_SN, PAGE_SIZE, page, namespace
        )
    }

    pub fn goods_detail_url(&self, good_id: &str) -> String {
        format!(
            "{}{}?app_id={}&point_sn={}&goods_id={}",
            self.base_url, GOODS_DETAIL_PATH, APP_ID, POINT_SN, good_id
        )
    }

    pub fn exchange_url(&self) -> String {
        format!("{}{}", self.base_url, EXCHANGE_PATH)
    }

    fn list_headers(&self) -> Result<HeaderMap> {
        self.list_headers
            .render(&HeaderOverrides::new().device_id(&self.device_id))
    }

    /// 发送请求并把响应体解析为 JSON
    async fn send_json(&self, request: reqwest::RequestBuilder, stage: Stage) -> Result<Value> {
        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("请求超时: {e}")
            } else {
                e.to_string()
            };
            ExchangeError::network(stage, message)
        })?;

        let status = response.status();
        debug!(%stage, status = status.as_u16(), "收到商城响应");

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::network(stage, format!("读取响应超时: {e}"))
            } else {
                ExchangeError::malformed(stage, format!("HTTP {status}, 响应体无法解析: {e}"))
            }
        })
    }
}

#[async_trait]
impl MallApi for MallClient {
    async fn goods_page(&self, namespace: &str, page: u32) -> Result<Value> {
        let request = self
            .http
            .get(self.goods_list_url(namespace, page))
            .headers(self.list_headers()?);
        self.send_json(request, Stage::GoodsList).await
    }

    async fn goods_detail(&self, good_id: &str) -> Result<Value> {
        let request = self
            .http
            .get(self.goods_detail_url(good_id))
            .headers(self.list_headers()?);
        self.send_json(request, Stage::GoodsDetail).await
    }

    async fn exchange(&self, payload: &ExchangePayload, account: &Account) -> Result<Value> {
        let overrides = HeaderOverrides::new()
            .device_id(&account.device_id)
            .cookie(account.cookie_header());
        let request = self
            .http
            .post(self.exchange_url())
            .headers(self.exchange_headers.render(&overrides)?)
            .json(payload);
        self.send_json(request, Stage::Exchange).await
    }
}
