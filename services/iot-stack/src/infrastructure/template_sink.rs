//! テンプレート提出先モジュール
//!
//! 合成したCloudFormationテンプレートの提出先を抽象化する。
//! - ローカルファイルへの書き出し（`FileTemplateSink`）
//! - CloudFormationへのスタック提出（`CloudFormationSink`、`cloudformation_ops`）
//!
//! 提出はテンプレート全体の合成が成功した後に1回だけ行う。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// テンプレート提出のエラー型
#[derive(Debug, Error)]
pub enum SinkError {
    /// ファイル入出力エラー
    #[error("テンプレートの書き込みに失敗: {0}")]
    Io(#[from] std::io::Error),
    /// シリアライズエラー
    #[error("テンプレートのシリアライズに失敗: {0}")]
    Serialize(#[from] serde_json::Error),
    /// AWS SDK エラー（プロビジョニングエンジンのエラーをそのまま伝播）
    #[error("AWS CloudFormation APIエラー: {0}")]
    AwsSdkError(String),
}

/// 提出の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAction {
    /// ファイルに書き出した
    Written,
    /// スタックを新規作成した
    Created,
    /// 既存スタックを更新した
    Updated,
    /// 既存スタックと差分がなかった
    Unchanged,
}

impl SubmitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitAction::Written => "written",
            SubmitAction::Created => "created",
            SubmitAction::Updated => "updated",
            SubmitAction::Unchanged => "unchanged",
        }
    }
}

/// テンプレート提出結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    /// スタック名
    pub stack_name: String,
    /// 提出の種類
    pub action: SubmitAction,
    /// 提出先（ファイルパスまたはスタックID）
    pub location: String,
}

impl SubmitResult {
    pub fn new(
        stack_name: impl Into<String>,
        action: SubmitAction,
        location: impl Into<String>,
    ) -> Self {
        Self {
            stack_name: stack_name.into(),
            action,
            location: location.into(),
        }
    }
}

/// テンプレート提出トレイト（テスト用の抽象化）
#[async_trait]
pub trait TemplateSink: Send + Sync {
    /// 合成済みテンプレートを提出する
    ///
    /// # 引数
    /// * `stack_name` - スタック名
    /// * `template` - 合成済みテンプレート
    ///
    /// # 戻り値
    /// * `Ok(SubmitResult)` - 提出結果
    /// * `Err(SinkError)` - エラー
    async fn submit(&self, stack_name: &str, template: &Value) -> Result<SubmitResult, SinkError>;
}

/// テンプレートをローカルファイルに書き出す実装
///
/// `<output_dir>/<stack_name>.template.json`に整形済みJSONを書き出す。
pub struct FileTemplateSink {
    output_dir: PathBuf,
}

impl FileTemplateSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// スタック名に対応するテンプレートファイルのパス
    pub fn template_path(&self, stack_name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.template.json", stack_name))
    }
}

#[async_trait]
impl TemplateSink for FileTemplateSink {
    async fn submit(&self, stack_name: &str, template: &Value) -> Result<SubmitResult, SinkError> {
        let mut body = serde_json::to_string_pretty(template)?;
        body.push('\n');

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.template_path(stack_name);
        tokio::fs::write(&path, body.as_bytes()).await?;

        info!(
            stack_name = %stack_name,
            path = %path.display(),
            bytes = body.len(),
            "テンプレートを書き出し"
        );

        Ok(SubmitResult::new(
            stack_name,
            SubmitAction::Written,
            path.display().to_string(),
        ))
    }
}
