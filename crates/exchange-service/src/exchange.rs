//! 米游币商品兑换任务
//!
//! 每个 (账户, 商品) 对应一个一次性的 [`ExchangeTask`]：
//!
//! ## 核心流程
//!
//! 1. 构造基础请求体 -> 2. 查询商品详情 -> 3. 游戏内物品检查 stoken / mid
//! 4. 查询游戏列表与角色记录并补全 uid / region / game_biz -> 5. `start()` 提交兑换
//!
//! ## 状态
//!
//! `prepare` 结束后任务处于 `Ready` 或 `Ineligible`；`start()` 只能执行一次，
//! 之后进入 `Completed` 或 `Aborted`。商品详情或角色查询失败时任务仍然可用，
//! 但会被标记为降级（degraded），严格模式下直接返回错误。

use std::sync::Arc;

use myb_shared::config::MallConfig;
use myb_shared::observability::metrics;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::account::Account;
use crate::api::{ExchangePayload, MallApi, extract_data};
use crate::error::{ExchangeError, IneligibleReason, Result, Stage};
use crate::game_record::{GameRecordService, match_record};
use crate::good::{TYPE_IN_GAME, int_field};

/// 兑换接口返回成功时的 message
const MESSAGE_OK: &str = "OK";

/// 兑换结果（服务端明确给出的结果，成功或被拒绝）
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    pub success: bool,
    /// 服务端原始返回
    pub body: Value,
}

/// 提交兑换之后的结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Succeeded,
    Rejected,
    /// 返回体缺少 message
    NoResult,
    /// 网络失败或返回体无法解析
    Failed,
}

/// 任务状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Ineligible(IneligibleReason),
    Completed(CompletionStatus),
    Aborted,
}

/// 游戏角色绑定情况
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingStatus {
    /// 非游戏内物品
    NotRequired,
    /// 已补全 uid / region / game_biz
    Bound { uid: String, region: String },
    /// 没有找到匹配的角色，请求体保持未补全
    Unmatched,
    /// 商品详情或角色查询失败，无法判断
    Unknown,
}

/// 任务构造选项
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// 严格模式：初始化信息不完整时直接返回 `Degraded` 错误
    pub strict: bool,
    /// 上层调度器的取消信号，在每次网络请求之前检查
    pub cancel: CancellationToken,
}

/// 兑换任务共享依赖
#[derive(Clone)]
pub struct ExchangeContext {
    api: Arc<dyn MallApi>,
    games: Arc<dyn GameRecordService>,
    log_head: String,
}

impl ExchangeContext {
    pub fn new(
        api: Arc<dyn MallApi>,
        games: Arc<dyn GameRecordService>,
        log_head: impl Into<String>,
    ) -> Self {
        Self {
            api,
            games,
            log_head: log_head.into(),
        }
    }

    pub fn from_config(
        api: Arc<dyn MallApi>,
        games: Arc<dyn GameRecordService>,
        config: &MallConfig,
    ) -> Self {
        Self::new(api, games, config.log_head.clone())
    }
}

/// 米游币商品兑换任务
pub struct ExchangeTask<'a> {
    good_id: String,
    account: &'a Account,
    payload: ExchangePayload,
    state: TaskState,
    binding: BindingStatus,
    degraded: Option<String>,
    api: Arc<dyn MallApi>,
    cancel: CancellationToken,
}

impl<'a> ExchangeTask<'a> {
    /// 初始化兑换任务
    ///
    /// 不满足兑换条件时仍返回 `Ok`，任务处于 `Ineligible` 状态；
    /// 只有取消、严格模式下的降级或请求头异常才返回 `Err`。
    #[instrument(
        skip(ctx, account, options),
        fields(log_head = %ctx.log_head, account = %account.name)
    )]
    pub async fn prepare(
        ctx: &ExchangeContext,
        account: &'a Account,
        good_id: &str,
        options: TaskOptions,
    ) -> Result<Self> {
        info!("米游币商品兑换 - 初始化兑换任务: 开始获取商品信息");

        let mut task = Self {
            good_id: good_id.to_string(),
            account,
            payload: ExchangePayload::new(good_id, &account.address_id),
            state: TaskState::Ready,
            binding: BindingStatus::Unknown,
            degraded: None,
            api: ctx.api.clone(),
            cancel: options.cancel.clone(),
        };

        task.check_cancelled(Stage::GoodsDetail)?;
        let detail = match ctx.api.goods_detail(good_id).await.and_then(extract_data) {
            Ok(detail) => detail,
            Err(e) => {
                error!(error = %e, "米游币商品兑换 - 初始化兑换任务: 获取商品信息时，服务器没有正确返回");
                return task.degrade(e.to_string(), options.strict);
            }
        };

        let kind = match int_field(&detail, "type") {
            Ok(kind) => kind,
            Err(e) => {
                error!(error = %e, "米游币商品兑换 - 初始化兑换任务: 商品详情缺少 type");
                return task.degrade(e.to_string(), options.strict);
            }
        };

        // 非游戏内物品无需绑定角色
        if kind != TYPE_IN_GAME {
            task.binding = BindingStatus::NotRequired;
            return Ok(task);
        }

        if let Some(reason) = check_credentials(account) {
            error!(%reason, "米游币商品兑换 - 初始化兑换任务: 放弃兑换");
            task.state = TaskState::Ineligible(reason);
            return Ok(task);
        }

        let good_game_biz = detail
            .get("game_biz")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        task.check_cancelled(Stage::GameList)?;
        match ctx.games.game_list().await {
            Ok(games) => debug!(count = games.len(), "已获取游戏列表"),
            Err(e) => {
                error!(error = %e, "米游币商品兑换 - 初始化兑换任务: 获取游戏列表失败");
                return task.degrade(e.to_string(), options.strict);
            }
        }

        task.check_cancelled(Stage::GameRecord)?;
        let records = match ctx.games.game_records(account).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "米游币商品兑换 - 初始化兑换任务: 获取游戏角色记录失败");
                return task.degrade(e.to_string(), options.strict);
            }
        };

        match match_record(&good_game_biz, &records, account) {
            Some(record) => {
                task.payload.uid = Some(record.uid.clone());
                task.payload.region = Some(record.region.clone());
                task.payload.game_biz = Some(good_game_biz);
                task.binding = BindingStatus::Bound {
                    uid: record.uid.clone(),
                    region: record.region.clone(),
                };
                info!(uid = %record.uid, region = %record.region, "已绑定游戏角色");
            }
            None => {
                warn!("未找到匹配的游戏角色，兑换请求不携带角色信息");
                task.binding = BindingStatus::Unmatched;
            }
        }

        Ok(task)
    }

    /// 执行兑换
    ///
    /// 返回 `Ok(Some(outcome))` 表示服务端给出了结果（成功或被拒绝），
    /// `Ok(None)` 表示返回体缺少 message，无法判断。
    #[instrument(skip(self), fields(good_id = %self.good_id, account = %self.account.name))]
    pub async fn start(&mut self) -> Result<Option<ExchangeOutcome>> {
        match &self.state {
            TaskState::Ready => {}
            TaskState::Ineligible(_) => {
                error!("商品未初始化完成，放弃兑换");
                metrics::record_exchange_attempt("ineligible");
                return Err(ExchangeError::Uninitialized {
                    good_id: self.good_id.clone(),
                });
            }
            TaskState::Completed(_) | TaskState::Aborted => {
                warn!(state = ?self.state, "兑换任务已执行过，拒绝重复执行");
                return Err(ExchangeError::AlreadyStarted {
                    good_id: self.good_id.clone(),
                });
            }
        }

        if let Err(e) = self.check_cancelled(Stage::Exchange) {
            self.state = TaskState::Aborted;
            metrics::record_exchange_attempt("aborted");
            return Err(e);
        }

        let body = match self.api.exchange(&self.payload, self.account).await {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "米游币商品兑换 - 执行兑换: 请求失败");
                self.state = TaskState::Completed(CompletionStatus::Failed);
                metrics::record_exchange_attempt("error");
                return Err(e);
            }
        };

        let Some(message) = body.get("message").and_then(Value::as_str) else {
            error!("米游币商品兑换 - 执行兑换: 服务器没有正确返回");
            self.state = TaskState::Completed(CompletionStatus::NoResult);
            metrics::record_exchange_attempt("no_result");
            return Ok(None);
        };

        let success = message == MESSAGE_OK;
        if success {
            info!("米游币商品兑换 - 执行兑换: 兑换成功！可以自行确认。");
            self.state = TaskState::Completed(CompletionStatus::Succeeded);
            metrics::record_exchange_attempt("ok");
        } else {
            info!(server_message = message, "米游币商品兑换 - 执行兑换: 兑换失败，可以自行确认。");
            self.state = TaskState::Completed(CompletionStatus::Rejected);
            metrics::record_exchange_attempt("rejected");
        }

        Ok(Some(ExchangeOutcome { success, body }))
    }

    pub fn good_id(&self) -> &str {
        &self.good_id
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn payload(&self) -> &ExchangePayload {
        &self.payload
    }

    pub fn binding(&self) -> &BindingStatus {
        &self.binding
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    /// 降级原因
    pub fn degraded_cause(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    pub fn is_ineligible(&self) -> bool {
        matches!(self.state, TaskState::Ineligible(_))
    }

    /// 不满足兑换条件时转换为错误，便于调用方用 `?` 传播
    pub fn ensure_eligible(&self) -> Result<()> {
        match &self.state {
            TaskState::Ineligible(reason) => Err(ExchangeError::Ineligible {
                good_id: self.good_id.clone(),
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn check_cancelled(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(%stage, "兑换任务已被取消");
            return Err(ExchangeError::Aborted { stage });
        }
        Ok(())
    }

    fn degrade(mut self, cause: String, strict: bool) -> Result<Self> {
        if strict {
            return Err(ExchangeError::Degraded {
                good_id: self.good_id,
                cause,
            });
        }
        self.binding = BindingStatus::Unknown;
        self.degraded = Some(cause);
        Ok(self)
    }
}

/// 游戏内物品的凭据检查
fn check_credentials(account: &Account) -> Option<IneligibleReason> {
    if account.stoken().is_none() {
        return Some(IneligibleReason::MissingStoken);
    }
    if account.has_v2_stoken() && account.mid().is_none() {
        return Some(IneligibleReason::V2StokenWithoutMid);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockMallApi;
    use crate::game::GameKey;
    use crate::game_record::MockGameRecordService;
    use crate::game_record::tests::{genshin, record};
    use serde_json::json;

    const GOOD_ID: &str = "2023031512345";

    fn account(cookie: &[(&str, &str)]) -> Account {
        let mut account = Account {
            name: "138****0000".to_string(),
            cookie: cookie
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            device_id: "ACCOUNT-DEVICE".to_string(),
            address_id: "addr-1".to_string(),
            ..Default::default()
        };
        account.game_uids.insert(GameKey::Ys, "100".to_string());
        account
    }

    fn detail(kind: i64) -> Value {
        json!({"retcode": 0, "data": {"goods_id": GOOD_ID, "type": kind, "game_biz": "hk4e_cn"}})
    }

    fn context(api: MockMallApi, games: MockGameRecordService) -> ExchangeContext {
        ExchangeContext::new(Arc::new(api), Arc::new(games), "test")
    }

    fn games_unused() -> MockGameRecordService {
        let mut games = MockGameRecordService::new();
        games.expect_game_list().never();
        games.expect_game_records().never();
        games
    }

    fn games_with(records: Vec<crate::game_record::GameRecord>) -> MockGameRecordService {
        let mut games = MockGameRecordService::new();
        games
            .expect_game_list()
            .times(1)
            .returning(|| Ok(vec![genshin()]));
        games
            .expect_game_records()
            .times(1)
            .returning(move |_| Ok(records.clone()));
        games
    }

    #[tokio::test]
    async fn test_normal_good_ready_without_enrichment() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail()
            .withf(|id| id == GOOD_ID)
            .times(1)
            .returning(|_| Ok(detail(0)));

        let ctx = context(api, games_unused());
        let account = account(&[]);
        let task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(task.state(), &TaskState::Ready);
        assert_eq!(task.binding(), &BindingStatus::NotRequired);
        assert!(!task.is_degraded());
        tokio_test::assert_ok!(task.ensure_eligible());
        assert_eq!(task.payload(), &ExchangePayload::new(GOOD_ID, "addr-1"));
    }

    #[tokio::test]
    async fn test_in_game_without_stoken_is_ineligible_and_never_posts() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(2)));
        api.expect_exchange().never();

        let ctx = context(api, games_unused());
        let account = account(&[("ltuid", "1")]);
        let mut task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(
            task.state(),
            &TaskState::Ineligible(IneligibleReason::MissingStoken)
        );
        assert!(task.ensure_eligible().is_err());

        let err = task.start().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Uninitialized { .. }));
    }

    #[tokio::test]
    async fn test_v2_stoken_without_mid_is_ineligible() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(2)));
        api.expect_exchange().never();

        let ctx = context(api, games_unused());
        let account = account(&[("stoken", "v2__abc")]);
        let mut task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(
            task.state(),
            &TaskState::Ineligible(IneligibleReason::V2StokenWithoutMid)
        );
        assert_eq!(task.start().await.unwrap_err().code(), "UNINITIALIZED");
    }

    #[tokio::test]
    async fn test_in_game_enriched_with_matching_record() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(2)));
        api.expect_exchange()
            .withf(|payload, account| {
                payload.uid.as_deref() == Some("100")
                    && payload.region.as_deref() == Some("cn_gf01")
                    && payload.game_biz.as_deref() == Some("hk4e_cn")
                    && account.device_id == "ACCOUNT-DEVICE"
            })
            .times(1)
            .returning(|_, _| Ok(json!({"retcode": 0, "message": "OK", "data": {}})));

        let games = games_with(vec![record("999", "hk4e_cn"), record("100", "hk4e_cn")]);
        let ctx = context(api, games);
        let account = account(&[("stoken", "v2__abc"), ("mid", "m1")]);
        let mut task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(
            task.binding(),
            &BindingStatus::Bound {
                uid: "100".to_string(),
                region: "cn_gf01".to_string(),
            }
        );

        let outcome = task.start().await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.body["message"], "OK");
        assert_eq!(
            task.state(),
            &TaskState::Completed(CompletionStatus::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_in_game_unmatched_record_stays_unenriched() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(2)));

        let ctx = context(api, games_with(vec![record("555", "hk4e_cn")]));
        let account = account(&[("stoken", "plain")]);
        let task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(task.state(), &TaskState::Ready);
        assert_eq!(task.binding(), &BindingStatus::Unmatched);
        assert!(!task.payload().is_enriched());
    }

    #[tokio::test]
    async fn test_empty_game_list_still_binds_matching_uid() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(2)));

        let mut games = MockGameRecordService::new();
        games.expect_game_list().times(1).returning(|| Ok(vec![]));
        games
            .expect_game_records()
            .times(1)
            .returning(|_| Ok(vec![record("100", "hk4e_cn")]));

        let ctx = context(api, games);
        let account = account(&[("stoken", "plain")]);
        let task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert!(matches!(task.binding(), BindingStatus::Bound { uid, .. } if uid == "100"));
        assert_eq!(task.payload().region.as_deref(), Some("cn_gf01"));
        assert_eq!(task.payload().game_biz.as_deref(), Some("hk4e_cn"));
    }

    #[tokio::test]
    async fn test_start_rejected_message() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(0)));
        api.expect_exchange()
            .times(1)
            .returning(|_, _| Ok(json!({"retcode": -2101, "message": "FAIL"})));

        let ctx = context(api, games_unused());
        let account = account(&[]);
        let mut task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        let outcome = task.start().await.unwrap().unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.body["message"], "FAIL");
        assert_eq!(task.state(), &TaskState::Completed(CompletionStatus::Rejected));
    }

    #[tokio::test]
    async fn test_start_without_message_is_no_result() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(0)));
        api.expect_exchange()
            .times(1)
            .returning(|_, _| Ok(json!({"retcode": 0})));

        let ctx = context(api, games_unused());
        let account = account(&[]);
        let mut task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(task.start().await.unwrap(), None);
        assert_eq!(task.state(), &TaskState::Completed(CompletionStatus::NoResult));
    }

    #[tokio::test]
    async fn test_second_start_refused_without_second_post() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(0)));
        api.expect_exchange()
            .times(1)
            .returning(|_, _| Ok(json!({"message": "OK"})));

        let ctx = context(api, games_unused());
        let account = account(&[]);
        let mut task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert!(task.start().await.unwrap().unwrap().success);
        let err = task.start().await.unwrap_err();
        assert!(matches!(err, ExchangeError::AlreadyStarted { .. }));
    }

    #[tokio::test]
    async fn test_detail_failure_degrades_but_stays_ready() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail()
            .times(1)
            .returning(|_| Ok(json!({"retcode": -1, "message": "err"})));

        let ctx = context(api, games_unused());
        let account = account(&[]);
        let task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert_eq!(task.state(), &TaskState::Ready);
        assert!(task.is_degraded());
        assert_eq!(task.binding(), &BindingStatus::Unknown);
        assert!(task.degraded_cause().unwrap().contains("服务器没有正确返回"));
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_degraded() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail()
            .times(1)
            .returning(|_| Err(ExchangeError::network(Stage::GoodsDetail, "reset")));

        let ctx = context(api, games_unused());
        let account = account(&[]);
        let options = TaskOptions {
            strict: true,
            ..Default::default()
        };
        let result = ExchangeTask::prepare(&ctx, &account, GOOD_ID, options).await;

        match result {
            Err(ExchangeError::Degraded { good_id, .. }) => assert_eq!(good_id, GOOD_ID),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("strict mode should reject a degraded task"),
        }
    }

    #[tokio::test]
    async fn test_game_record_failure_degrades() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(2)));

        let mut games = MockGameRecordService::new();
        games
            .expect_game_list()
            .times(1)
            .returning(|| Ok(vec![genshin()]));
        games
            .expect_game_records()
            .times(1)
            .returning(|_| Err(ExchangeError::network(Stage::GameRecord, "timeout")));

        let ctx = context(api, games);
        let account = account(&[("stoken", "plain")]);
        let task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, TaskOptions::default())
            .await
            .unwrap();

        assert!(task.is_degraded());
        assert!(!task.payload().is_enriched());
    }

    #[tokio::test]
    async fn test_cancelled_before_prepare_makes_no_calls() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().never();
        api.expect_exchange().never();

        let ctx = context(api, games_unused());
        let account = account(&[]);
        let options = TaskOptions::default();
        options.cancel.cancel();

        let result = ExchangeTask::prepare(&ctx, &account, GOOD_ID, options).await;
        assert!(matches!(
            result,
            Err(ExchangeError::Aborted {
                stage: Stage::GoodsDetail
            })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_aborted() {
        let mut api = MockMallApi::new();
        api.expect_goods_detail().times(1).returning(|_| Ok(detail(0)));
        api.expect_exchange().never();

        let ctx = context(api, games_unused());
        let account = account(&[]);
        let cancel = CancellationToken::new();
        let options = TaskOptions {
            cancel: cancel.clone(),
            ..Default::default()
        };
        let mut task = ExchangeTask::prepare(&ctx, &account, GOOD_ID, options)
            .await
            .unwrap();

        cancel.cancel();
        let err = task.start().await.unwrap_err();
        assert_eq!(err.code(), "ABORTED");
        assert_eq!(task.state(), &TaskState::Aborted);
        // 已取消的任务同样不能再次执行
        assert_eq!(task.start().await.unwrap_err().code(), "ALREADY_STARTED");
    }

    #[test]
    fn test_check_credentials() {
        assert_eq!(
            check_credentials(&account(&[])),
            Some(IneligibleReason::MissingStoken)
        );
        assert_eq!(
            check_credentials(&account(&[("stoken", "v2__x")])),
            Some(IneligibleReason::V2StokenWithoutMid)
        );
        assert_eq!(
            check_credentials(&account(&[("stoken", "v2__x"), ("mid", "m")])),
            None
        );
        assert_eq!(check_credentials(&account(&[("stoken", "v1")])), None);
    }
}
