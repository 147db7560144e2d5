//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 未安装 recorder 时所有记录函数都是空操作。

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use super::ObservabilityConfig;

pub const CATALOG_PAGES_TOTAL: &str = "myb_catalog_pages_total";
pub const CATALOG_FAILURES_TOTAL: &str = "myb_catalog_failures_total";
pub const EXCHANGE_ATTEMPTS_TOTAL: &str = "myb_exchange_attempts_total";

/// 安装 Prometheus recorder 并在指定端口暴露 `/metrics`
///
/// 需要在 tokio 运行时中调用。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_common_metrics(&config.service_name);
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(CATALOG_PAGES_TOTAL, "Total number of goods list pages fetched");
    metrics::describe_counter!(
        CATALOG_FAILURES_TOTAL,
        "Total number of failed goods list requests"
    );
    metrics::describe_counter!(
        EXCHANGE_ATTEMPTS_TOTAL,
        "Total number of exchange attempts by outcome"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一页商品列表
#[inline]
pub fn record_catalog_page(game: &str, items: usize) {
    metrics::counter!(CATALOG_PAGES_TOTAL, "game" => game.to_string()).increment(1);
    metrics::histogram!("myb_catalog_page_items", "game" => game.to_string()).record(items as f64);
}

/// 记录一次商品列表请求失败
#[inline]
pub fn record_catalog_failure(game: &str, kind: &str) {
    metrics::counter!(
        CATALOG_FAILURES_TOTAL,
        "game" => game.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// 记录一次兑换结果（ok / rejected / no_result / ineligible / aborted / error）
#[inline]
pub fn record_exchange_attempt(outcome: &str) {
    metrics::counter!(EXCHANGE_ATTEMPTS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}
