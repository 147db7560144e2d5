//! 商品列表拉取
//!
//! 从第 1 页开始顺序请求，每页 20 条，遇到空列表即认为已读完。
//! 网络失败与返回结构异常共享同一个失败预算，失败后重试同一页；
//! 预算耗尽时整体失败，不返回已拉到的部分数据。

use std::sync::Arc;

use myb_shared::config::MallConfig;
use myb_shared::observability::metrics;
use myb_shared::retry::RetryPolicy;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{MallApi, extract_list};
use crate::error::{ExchangeError, Result, Stage};
use crate::game::GameKey;
use crate::good::{GoodDescriptor, is_closed};

/// 商品列表拉取器
pub struct CatalogFetcher {
    api: Arc<dyn MallApi>,
    policy: RetryPolicy,
    log_head: String,
}

impl CatalogFetcher {
    pub fn new(api: Arc<dyn MallApi>, policy: RetryPolicy) -> Self {
        Self {
            api,
            policy,
            log_head: MallConfig::default().log_head,
        }
    }

    /// 按商城配置构造：固定间隔重试，失败上限取 `max_retry_times`
    pub fn from_config(api: Arc<dyn MallApi>, config: &MallConfig) -> Self {
        Self::new(
            api,
            RetryPolicy::fixed(config.max_retry_times, config.retry_delay()),
        )
        .with_log_head(config.log_head.clone())
    }

    /// 日志前缀，作为 span 字段附加在本次拉取的所有日志上
    pub fn with_log_head(mut self, log_head: impl Into<String>) -> Self {
        self.log_head = log_head.into();
        self
    }

    pub fn log_head(&self) -> &str {
        &self.log_head
    }

    /// 获取指定游戏的可兑换商品
    pub async fn fetch(&self, game: GameKey) -> Result<Vec<GoodDescriptor>> {
        self.fetch_with_cancel(game, &CancellationToken::new()).await
    }

    /// 获取指定游戏的可兑换商品，可在两次请求之间被取消
    #[instrument(
        skip(self, cancel),
        fields(log_head = %self.log_head, game = %game.namespace())
    )]
    pub async fn fetch_with_cancel(
        &self,
        game: GameKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<GoodDescriptor>> {
        let raw = self.fetch_all_pages(game.namespace(), cancel).await?;
        let total = raw.len();
        let goods = filter_goods(raw);

        info!(total, available = goods.len(), "米游币商品列表获取完成");
        Ok(goods)
    }

    async fn fetch_all_pages(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let mut budget = self.policy.budget();
        let mut records = Vec::new();
        let mut page: u32 = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(ExchangeError::Aborted {
                    stage: Stage::GoodsList,
                });
            }

            let result = self
                .api
                .goods_page(namespace, page)
                .await
                .and_then(extract_list);

            match result {
                Ok(list) if list.is_empty() => {
                    debug!(page, "已读完所有商品");
                    return Ok(records);
                }
                Ok(list) => {
                    metrics::record_catalog_page(namespace, list.len());
                    debug!(page, count = list.len(), "获取到一页商品");
                    records.extend(list);
                    page += 1;
                }
                Err(e) => {
                    metrics::record_catalog_failure(namespace, e.kind());
                    error!(page, error = %e, failures = budget.failures() + 1, "获取商品列表失败");

                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if !budget.record_failure("goods_list") {
                        return Err(ExchangeError::CatalogUnavailable {
                            game: namespace.to_string(),
                            attempts: budget.failures(),
                        });
                    }

                    let delay = budget.next_delay();
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(ExchangeError::Aborted { stage: Stage::GoodsList });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// 剔除兑换窗口已关闭的记录并包装为商品视图
///
/// 单条记录数据不正确只影响该商品本身，记录日志后跳过。
fn filter_goods(raw: Vec<Value>) -> Vec<GoodDescriptor> {
    raw.into_iter()
        .filter_map(|record| {
            let Value::Object(map) = record else {
                warn!("商品记录不是对象，已跳过");
                return None;
            };
            match is_closed(&map) {
                Ok(true) => return None,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "商品记录缺少兑换时间信息，已跳过");
                    return None;
                }
            }
            match GoodDescriptor::from_record(map) {
                Ok(good) => Some(good),
                Err(e) => {
                    warn!(error = %e, "米游币商品数据 - 初始化对象: dict数据不正确");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockMallApi;
    use crate::good::tests::sample_record;
    use mockall::Sequence;
    use serde_json::json;
    use std::time::Duration;

    fn page_of(records: Vec<Value>) -> Value {
        json!({"retcode": 0, "message": "OK", "data": {"list": records}})
    }

    fn record_with_id(id: &str, kind: i64, next_time: i64) -> Value {
        let mut record = sample_record(kind, next_time);
        record["goods_id"] = json!(id);
        record
    }

    fn fetcher(api: MockMallApi, max_retries: u32) -> CatalogFetcher {
        CatalogFetcher::new(Arc::new(api), RetryPolicy::fixed(max_retries, Duration::ZERO))
    }

    #[tokio::test]
    async fn test_stops_at_first_empty_page() {
        let mut api = MockMallApi::new();
        let mut seq = Sequence::new();
        api.expect_goods_page()
            .withf(|ns, page| ns == "hk4e" && *page == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page_of(vec![record_with_id("a", 1, 100)])));
        api.expect_goods_page()
            .withf(|ns, page| ns == "hk4e" && *page == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page_of(vec![record_with_id("b", 0, 0)])));
        api.expect_goods_page()
            .withf(|ns, page| ns == "hk4e" && *page == 3)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page_of(vec![])));

        let goods = fetcher(api, 3).fetch(GameKey::Ys).await.unwrap();
        let ids: Vec<_> = goods.iter().map(|g| g.good_id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        // mock 在 drop 时校验：第 4 页从未被请求
    }

    #[tokio::test]
    async fn test_closed_goods_filtered() {
        let mut api = MockMallApi::new();
        api.expect_goods_page()
            .withf(|_, page| *page == 1)
            .times(1)
            .returning(|_, _| {
                Ok(page_of(vec![
                    record_with_id("closed", 1, 0),
                    record_with_id("always", 0, 0),
                    record_with_id("scheduled", 1, 1_700_000_000),
                ]))
            });
        api.expect_goods_page()
            .withf(|_, page| *page == 2)
            .times(1)
            .returning(|_, _| Ok(page_of(vec![])));

        let goods = fetcher(api, 3).fetch(GameKey::Ys).await.unwrap();
        let ids: Vec<_> = goods.iter().map(|g| g.good_id()).collect();
        assert_eq!(ids, vec!["always", "scheduled"]);

        let always = &goods[0];
        assert_eq!(always.sale_time(), None);
        assert_eq!(always.stock(), None);
    }

    #[tokio::test]
    async fn test_retries_same_page() {
        let mut api = MockMallApi::new();
        let mut seq = Sequence::new();
        api.expect_goods_page()
            .withf(|_, page| *page == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ExchangeError::network(Stage::GoodsList, "reset")));
        api.expect_goods_page()
            .withf(|_, page| *page == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(json!({"data": null})));
        api.expect_goods_page()
            .withf(|_, page| *page == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page_of(vec![record_with_id("a", 0, 0)])));
        api.expect_goods_page()
            .withf(|_, page| *page == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page_of(vec![])));

        let goods = fetcher(api, 3).fetch(GameKey::Ys).await.unwrap();
        assert_eq!(goods.len(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_no_partial_list() {
        let mut api = MockMallApi::new();
        api.expect_goods_page()
            .withf(|_, page| *page == 1)
            .times(1)
            .returning(|_, _| Ok(page_of(vec![record_with_id("a", 0, 0)])));
        // 第 2 页持续失败，共 3 次后放弃
        api.expect_goods_page()
            .withf(|_, page| *page == 2)
            .times(3)
            .returning(|_, _| Ok(json!({"message": "busy"})));

        let err = fetcher(api, 3).fetch(GameKey::Bh3).await.unwrap_err();
        match err {
            ExchangeError::CatalogUnavailable { game, attempts } => {
                assert_eq!(game, "bh3");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_budget_shared_across_pages() {
        let mut api = MockMallApi::new();
        let mut seq = Sequence::new();
        api.expect_goods_page()
            .withf(|_, page| *page == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ExchangeError::network(Stage::GoodsList, "timeout")));
        api.expect_goods_page()
            .withf(|_, page| *page == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page_of(vec![record_with_id("a", 0, 0)])));
        api.expect_goods_page()
            .withf(|_, page| *page == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ExchangeError::network(Stage::GoodsList, "timeout")));

        // 上限 2：两页各失败一次即耗尽
        let err = fetcher(api, 2).fetch(GameKey::Ys).await.unwrap_err();
        assert_eq!(err.code(), "CATALOG_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_malformed_record_skipped() {
        let mut api = MockMallApi::new();
        api.expect_goods_page()
            .withf(|_, page| *page == 1)
            .times(1)
            .returning(|_, _| {
                Ok(page_of(vec![
                    json!({"type": 0, "next_time": 0, "goods_name": "缺字段"}),
                    json!("not an object"),
                    record_with_id("ok", 0, 0),
                ]))
            });
        api.expect_goods_page()
            .withf(|_, page| *page == 2)
            .times(1)
            .returning(|_, _| Ok(page_of(vec![])));

        let goods = fetcher(api, 3).fetch(GameKey::Ys).await.unwrap();
        assert_eq!(goods.len(), 1);
        assert_eq!(goods[0].good_id(), "ok");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_request() {
        let mut api = MockMallApi::new();
        api.expect_goods_page().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher(api, 3)
            .fetch_with_cancel(GameKey::Ys, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::Aborted {
                stage: Stage::GoodsList
            }
        ));
    }

    #[test]
    fn test_from_config() {
        let config = MallConfig {
            max_retry_times: 7,
            log_head: "米游社工具".to_string(),
            ..Default::default()
        };
        let fetcher = CatalogFetcher::from_config(Arc::new(MockMallApi::new()), &config);
        assert_eq!(fetcher.policy.max_retries, 7);
        assert_eq!(fetcher.log_head(), "米游社工具");

        let fetcher = CatalogFetcher::new(Arc::new(MockMallApi::new()), RetryPolicy::default());
        assert_eq!(fetcher.log_head(), "mysTool");
    }
}
