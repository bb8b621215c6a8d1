//! CloudFormation操作モジュール
//!
//! 合成したテンプレートをCloudFormationスタックとして提出する。
//! - スタックが存在しなければCreateStack
//! - 存在すればUpdateStack（差分なしは成功扱い）
//!
//! 提出後のプロビジョニング完了は待機しない。エンジンのエラーは
//! リトライせずそのまま返す。

use async_trait::async_trait;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::Capability;
use aws_sdk_cloudformation::Client as CloudFormationClient;
use serde_json::Value;
use tracing::{info, warn};

use super::template_sink::{SinkError, SubmitAction, SubmitResult, TemplateSink};

const STACK_NOT_FOUND_MESSAGE: &str = "does not exist";
const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

/// DescribeStacksのエラーがスタック不在を示すか
fn is_stack_missing(message: Option<&str>) -> bool {
    message.is_some_and(|m| m.contains(STACK_NOT_FOUND_MESSAGE))
}

/// UpdateStackのエラーが差分なしを示すか
fn is_no_updates(message: Option<&str>) -> bool {
    message.is_some_and(|m| m.contains(NO_UPDATES_MESSAGE))
}

/// UpdateStackの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackUpdate {
    /// 更新を開始した（スタックID）
    Updated(String),
    /// 既存スタックと差分がない
    NoChanges,
}

/// CloudFormation操作トレイト（テスト用の抽象化）
#[async_trait]
pub trait CloudFormationOps: Send + Sync {
    /// スタックが存在するかを確認する
    async fn stack_exists(&self, stack_name: &str) -> Result<bool, SinkError>;

    /// スタックを作成し、スタックIDを返す
    async fn create_stack(&self, stack_name: &str, body: String) -> Result<String, SinkError>;

    /// スタックを更新する
    async fn update_stack(&self, stack_name: &str, body: String)
        -> Result<StackUpdate, SinkError>;
}

/// 実際のAWS CloudFormation SDKを使用した実装
pub struct AwsCloudFormationOps {
    client: CloudFormationClient,
}

impl AwsCloudFormationOps {
    /// 新しいAwsCloudFormationOpsを作成
    pub fn new(client: CloudFormationClient) -> Self {
        Self { client }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = CloudFormationClient::new(&config);
        Self::new(client)
    }
}

#[async_trait]
impl CloudFormationOps for AwsCloudFormationOps {
    async fn stack_exists(&self, stack_name: &str) -> Result<bool, SinkError> {
        match self.client.describe_stacks().stack_name(stack_name).send().await {
            Ok(output) => Ok(!output.stacks().is_empty()),
            Err(err) => {
                let message = err.as_service_error().and_then(|e| e.message());
                if is_stack_missing(message) {
                    return Ok(false);
                }
                warn!(stack_name = %stack_name, error = %err, "DescribeStacksエラー");
                Err(SinkError::AwsSdkError(err.to_string()))
            }
        }
    }

    async fn create_stack(&self, stack_name: &str, body: String) -> Result<String, SinkError> {
        let output = self
            .client
            .create_stack()
            .stack_name(stack_name)
            .template_body(body)
            .capabilities(Capability::CapabilityIam)
            .send()
            .await
            .map_err(|err| {
                warn!(stack_name = %stack_name, error = %err, "CreateStackエラー");
                SinkError::AwsSdkError(err.to_string())
            })?;

        Ok(output.stack_id().unwrap_or(stack_name).to_string())
    }

    async fn update_stack(
        &self,
        stack_name: &str,
        body: String,
    ) -> Result<StackUpdate, SinkError> {
        let result = self
            .client
            .update_stack()
            .stack_name(stack_name)
            .template_body(body)
            .capabilities(Capability::CapabilityIam)
            .send()
            .await;

        match result {
            Ok(output) => Ok(StackUpdate::Updated(
                output.stack_id().unwrap_or(stack_name).to_string(),
            )),
            Err(err) if is_no_updates(err.as_service_error().and_then(|e| e.message())) => {
                Ok(StackUpdate::NoChanges)
            }
            Err(err) => {
                warn!(stack_name = %stack_name, error = %err, "UpdateStackエラー");
                Err(SinkError::AwsSdkError(err.to_string()))
            }
        }
    }
}

/// CloudFormationスタックへの提出先
pub struct CloudFormationSink<O>
where
    O: CloudFormationOps,
{
    ops: O,
}

impl<O> CloudFormationSink<O>
where
    O: CloudFormationOps,
{
    pub fn new(ops: O) -> Self {
        Self { ops }
    }
}

#[async_trait]
impl<O> TemplateSink for CloudFormationSink<O>
where
    O: CloudFormationOps,
{
    async fn submit(&self, stack_name: &str, template: &Value) -> Result<SubmitResult, SinkError> {
        let body = serde_json::to_string(template)?;

        info!(
            stack_name = %stack_name,
            bytes = body.len(),
            "CloudFormationへのテンプレート提出開始"
        );

        if !self.ops.stack_exists(stack_name).await? {
            let stack_id = self.ops.create_stack(stack_name, body).await?;
            info!(stack_name = %stack_name, stack_id = %stack_id, "CreateStack成功");
            return Ok(SubmitResult::new(stack_name, SubmitAction::Created, stack_id));
        }

        match self.ops.update_stack(stack_name, body).await? {
            StackUpdate::Updated(stack_id) => {
                info!(stack_name = %stack_name, stack_id = %stack_id, "UpdateStack成功");
                Ok(SubmitResult::new(stack_name, SubmitAction::Updated, stack_id))
            }
            StackUpdate::NoChanges => {
                info!(stack_name = %stack_name, "スタックに差分はありません");
                Ok(SubmitResult::new(stack_name, SubmitAction::Unchanged, stack_name))
            }
        }
    }
}
