//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::SharedError;
use crate::observability::ObservabilityConfig;

/// 米游币商城配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MallConfig {
    /// 商城接口根地址
    pub base_url: String,
    /// 获取商品列表时允许的最大失败次数（所有分页共享）
    pub max_retry_times: u32,
    /// 两次重试之间的等待时间
    pub retry_delay_ms: u64,
    /// 单次 HTTP 请求超时
    pub request_timeout_secs: u64,
    /// 日志前缀，仅用于展示
    pub log_head: String,
}

impl Default for MallConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-takumi.mihoyo.com".to_string(),
            max_retry_times: 3,
            retry_delay_ms: 200,
            request_timeout_secs: 5,
            log_head: "mysTool".to_string(),
        }
    }
}

impl MallConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// 模拟的移动端设备信息
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub user_agent_mobile: String,
    pub x_rpc_app_version: String,
    pub x_rpc_device_model_mobile: String,
    pub x_rpc_device_name_mobile: String,
    pub x_rpc_sys_version: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            user_agent_mobile: "Mozilla/5.0 (iPhone; CPU iPhone OS 15_4 like Mac OS X) \
                                AppleWebKit/605.1.15 (KHTML, like Gecko) miHoYoBBS/2.28.1"
                .to_string(),
            x_rpc_app_version: "2.28.1".to_string(),
            x_rpc_device_model_mobile: "iPhone10,2".to_string(),
            x_rpc_device_name_mobile: "iPhone".to_string(),
            x_rpc_sys_version: "15.4".to_string(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub mall: MallConfig,
    pub device: DeviceConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. 环境变量（MYB_ 前缀，如 MYB_MALL__MAX_RETRY_TIMES -> mall.max_retry_times）
    pub fn load(service_name: &str) -> Result<Self, SharedError> {
        let env = std::env::var("MYB_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            // 字段名本身带下划线，所以层级分隔符用双下划线
            .add_source(
                Environment::with_prefix("MYB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 字符串解析配置（不读取环境变量）
    pub fn from_toml_str(s: &str) -> Result<Self, SharedError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(s, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(SharedError::from)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SharedError> {
        if self.mall.max_retry_times == 0 {
            return Err(SharedError::InvalidConfig {
                field: "mall.max_retry_times".to_string(),
                message: "必须大于 0".to_string(),
            });
        }
        if self.mall.request_timeout_secs == 0 {
            return Err(SharedError::InvalidConfig {
                field: "mall.request_timeout_secs".to_string(),
                message: "必须大于 0".to_string(),
            });
        }
        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
