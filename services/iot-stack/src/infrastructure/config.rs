/// 合成ツール設定
///
/// 対象環境・スタック名・出力先・アセットディレクトリ・提出先を
/// 環境変数から読み込む。未設定の項目はデフォルト値を使用する。
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::domain::compute_spec::{DEFAULT_FUNCTION_CODE_DIR, DEFAULT_LAYER_CODE_DIR};

/// 環境変数名
pub const DEPLOY_ENVIRONMENT_ENV: &str = "DEPLOY_ENVIRONMENT";
pub const STACK_NAME_ENV: &str = "STACK_NAME";
pub const SYNTH_OUTPUT_DIR_ENV: &str = "SYNTH_OUTPUT_DIR";
pub const LAMBDA_CODE_DIR_ENV: &str = "LAMBDA_CODE_DIR";
pub const LAMBDA_LAYER_DIR_ENV: &str = "LAMBDA_LAYER_DIR";
pub const SYNTH_TARGET_ENV: &str = "SYNTH_TARGET";

/// デフォルト値
pub const DEFAULT_DEPLOY_ENVIRONMENT: &str = "dev";
pub const DEFAULT_STACK_NAME: &str = "IotEventsHandlerStack";
pub const DEFAULT_SYNTH_OUTPUT_DIR: &str = "cdk.out";

/// 合成ツール設定のエラー型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SynthConfigError {
    #[error("環境変数の値が不正です: {name}={value}")]
    InvalidValue { name: String, value: String },
}

/// テンプレートの提出先
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynthTarget {
    /// ローカルファイルに書き出す
    #[default]
    File,
    /// CloudFormationにスタックとして提出する
    CloudFormation,
}

impl FromStr for SynthTarget {
    type Err = SynthConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(SynthTarget::File),
            "cloudformation" => Ok(SynthTarget::CloudFormation),
            _ => Err(SynthConfigError::InvalidValue {
                name: SYNTH_TARGET_ENV.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SynthTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthTarget::File => write!(f, "file"),
            SynthTarget::CloudFormation => write!(f, "cloudformation"),
        }
    }
}

/// 合成ツール設定
///
/// 以下の環境変数から読み込む:
/// - DEPLOY_ENVIRONMENT: 対象環境名（デフォルト: dev）
/// - STACK_NAME: スタック名（デフォルト: IotEventsHandlerStack）
/// - SYNTH_OUTPUT_DIR: テンプレート出力先（デフォルト: cdk.out）
/// - LAMBDA_CODE_DIR: 関数コードのディレクトリ（デフォルト: src/lambda）
/// - LAMBDA_LAYER_DIR: レイヤーのディレクトリ（デフォルト: src/lambda_layer）
/// - SYNTH_TARGET: file | cloudformation（デフォルト: file）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthConfig {
    environment: String,
    stack_name: String,
    output_dir: PathBuf,
    function_code_dir: String,
    layer_code_dir: String,
    target: SynthTarget,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_DEPLOY_ENVIRONMENT.to_string(),
            stack_name: DEFAULT_STACK_NAME.to_string(),
            output_dir: PathBuf::from(DEFAULT_SYNTH_OUTPUT_DIR),
            function_code_dir: DEFAULT_FUNCTION_CODE_DIR.to_string(),
            layer_code_dir: DEFAULT_LAYER_CODE_DIR.to_string(),
            target: SynthTarget::File,
        }
    }
}

impl SynthConfig {
    /// 環境変数から設定を読み込む
    ///
    /// # エラー
    /// `SYNTH_TARGET`が未知の値の場合は`SynthConfigError::InvalidValue`
    pub fn from_env() -> Result<Self, SynthConfigError> {
        let target = match non_empty_var(SYNTH_TARGET_ENV) {
            Some(value) => value.parse()?,
            None => SynthTarget::default(),
        };

        Ok(Self {
            environment: var_or(DEPLOY_ENVIRONMENT_ENV, DEFAULT_DEPLOY_ENVIRONMENT),
            stack_name: var_or(STACK_NAME_ENV, DEFAULT_STACK_NAME),
            output_dir: PathBuf::from(var_or(SYNTH_OUTPUT_DIR_ENV, DEFAULT_SYNTH_OUTPUT_DIR)),
            function_code_dir: var_or(LAMBDA_CODE_DIR_ENV, DEFAULT_FUNCTION_CODE_DIR),
            layer_code_dir: var_or(LAMBDA_LAYER_DIR_ENV, DEFAULT_LAYER_CODE_DIR),
            target,
        })
    }

    /// 対象環境名を取得
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// スタック名を取得
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// テンプレート出力先を取得
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// 関数コードのディレクトリを取得
    pub fn function_code_dir(&self) -> &str {
        &self.function_code_dir
    }

    /// レイヤーのディレクトリを取得
    pub fn layer_code_dir(&self) -> &str {
        &self.layer_code_dir
    }

    /// 提出先を取得
    pub fn target(&self) -> SynthTarget {
        self.target
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    non_empty_var(key).unwrap_or_else(|| default.to_string())
}
