//! 请求头模板
//!
//! 模板在客户端创建时一次性构建且之后不再修改；每次请求需要变化的头
//! （设备 ID、Cookie）通过 [`HeaderOverrides`] 传入，渲染时复制模板后覆盖，
//! 多个账户并发兑换时互不影响。
//!
//! `Host` 与 `Accept-Encoding` 不写入模板：前者由 reqwest 根据 URL 生成，
//! 后者由 reqwest 按启用的解压特性协商。

use std::collections::BTreeMap;

use myb_shared::config::DeviceConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{ExchangeError, Result};

pub const DEVICE_ID: &str = "x-rpc-device_id";
pub const COOKIE: &str = "cookie";

/// 生成设备 ID（大写 UUID v4）
pub fn generate_device_id() -> String {
    uuid::Uuid::new_v4().to_string().to_uppercase()
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| ExchangeError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ExchangeError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })
}

/// 不可变的请求头模板
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    headers: HeaderMap,
}

impl HeaderTemplate {
    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self> {
        let mut headers = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            headers.insert(header_name(name)?, header_value(name, value)?);
        }
        Ok(Self { headers })
    }

    /// 商品列表请求头（网页端）
    pub fn goods_list(device: &DeviceConfig) -> Result<Self> {
        Self::from_pairs(&[
            ("accept", "application/json, text/plain, */*"),
            ("origin", "https://user.mihoyo.com"),
            ("connection", "keep-alive"),
            ("x-rpc-client_type", "5"),
            ("user-agent", device.user_agent_mobile.as_str()),
            ("referer", "https://user.mihoyo.com/"),
            ("accept-language", "zh-CN,zh-Hans;q=0.9"),
        ])
    }

    /// 兑换请求头（模拟 iOS 客户端）
    pub fn exchange(device: &DeviceConfig) -> Result<Self> {
        Self::from_pairs(&[
            ("accept", "application/json, text/plain, */*"),
            ("accept-language", "zh-CN,zh-Hans;q=0.9"),
            ("connection", "keep-alive"),
            ("content-type", "application/json;charset=utf-8"),
            ("user-agent", device.user_agent_mobile.as_str()),
            ("x-rpc-app_version", device.x_rpc_app_version.as_str()),
            ("x-rpc-channel", "appstore"),
            ("x-rpc-client_type", "1"),
            ("x-rpc-device_model", device.x_rpc_device_model_mobile.as_str()),
            ("x-rpc-device_name", device.x_rpc_device_name_mobile.as_str()),
            ("x-rpc-sys_version", device.x_rpc_sys_version.as_str()),
        ])
    }

    /// 复制模板并应用覆盖项，模板本身不变
    pub fn render(&self, overrides: &HeaderOverrides) -> Result<HeaderMap> {
        let mut headers = self.headers.clone();
        for (name, value) in &overrides.0 {
            headers.insert(header_name(name)?, header_value(name, value)?);
        }
        Ok(headers)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// 单次请求的请求头覆盖项
#[derive(Debug, Clone, Default)]
pub struct HeaderOverrides(BTreeMap<String, String>);

impl HeaderOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn device_id(self, device_id: impl Into<String>) -> Self {
        self.with(DEVICE_ID, device_id)
    }

    pub fn cookie(self, cookie: impl Into<String>) -> Self {
        self.with(COOKIE, cookie)
    }
}
