/// 合成ハンドラー
///
/// 環境名からスタックを構築・合成し、テンプレートを提出先に渡す。
/// スタックには環境名と担当者のタグを付ける。
/// 構築か合成が失敗した場合は何も提出しない。
use thiserror::Error;
use tracing::{error, info};

use crate::domain::{resolve, ConfigurationError, Environment, EnvironmentContext};
use crate::infrastructure::{SinkError, SubmitResult, TemplateSink};

use super::stack_builder::{build_stack_with_options, StackAssets, StackOptions};
use super::stack_error::StackError;

/// 合成ハンドラーのエラー型
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("環境設定エラー: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("スタック構築エラー: {0}")]
    Stack(#[from] StackError),

    #[error("テンプレート提出エラー: {0}")]
    Sink(#[from] SinkError),
}

/// 合成リクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthRequest {
    /// 対象環境名
    pub environment: String,
    /// スタック名
    pub stack_name: String,
    /// コードアセット
    pub assets: StackAssets,
}

/// スタックを合成して提出するハンドラー
pub struct SynthHandler<S>
where
    S: TemplateSink,
{
    sink: S,
}

impl<S> SynthHandler<S>
where
    S: TemplateSink,
{
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// 合成リクエストを処理
    ///
    /// # 処理フロー
    /// 1. 環境名から環境コンテキストを解決
    /// 2. スタックを構築
    /// 3. テンプレートを合成
    /// 4. 提出先に渡す
    pub async fn handle(&self, request: &SynthRequest) -> Result<SubmitResult, SynthError> {
        let (environment, context) =
            resolve_environment(&request.environment).inspect_err(|err| {
                error!(environment = %request.environment, error = %err, "環境コンテキストの解決に失敗");
            })?;

        info!(
            environment = %environment,
            stack_name = %request.stack_name,
            "スタック構築開始"
        );

        let options = StackOptions::for_environment(environment, request.assets.clone());
        let stack = build_stack_with_options(&context, &options)?;
        let template = stack.synthesize()?;

        let result = self.sink.submit(&request.stack_name, &template).await?;

        info!(
            stack_name = %result.stack_name,
            action = result.action.as_str(),
            location = %result.location,
            "テンプレート提出完了"
        );
        Ok(result)
    }
}

/// 環境名をパースしてコンテキストを解決する
fn resolve_environment(name: &str) -> Result<(Environment, EnvironmentContext), ConfigurationError> {
    let environment: Environment = name.parse()?;
    let context = resolve(environment.name())?;
    Ok((environment, context))
}
