// デプロイ環境コンテキスト
//
// 環境名からテーブル名・Lambda関数名・SNSトピックARNなどの
// 固定設定値を解決するドメイン層コンポーネント。
// 環境は閉じた列挙型で表現し、未知の環境名は文字列パース時のみ失敗する。

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// ===========================================
// エラー型
// ===========================================

/// 環境コンテキスト解決のエラー型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// 未知の環境名
    #[error("未知のデプロイ環境です: {0}")]
    UnknownEnvironment(String),

    /// 空のフィールド
    #[error("環境コンテキストのフィールドが空です: {0}")]
    EmptyField(&'static str),
}

// ===========================================
// 共有設定値
// ===========================================

const REFERENCE_TABLE_NAME: &str = "vehicle_device_mapping_table";
const REFERENCE_TABLE_PARTITION_KEY: &str = "device_mac_address";
const VEHICLE_TABLE_NAME: &str = "vehicle_table";
const VEHICLE_TABLE_PARTITION_KEY: &str = "vehicle_mac_address";
const DEVICE_TABLE_NAME: &str = "device_table";
const DEVICE_TABLE_PARTITION_KEY: &str = "device_mac_address";
const LAMBDA_LAYER_NAME: &str = "events-handler-lambda-layer";
const LAMBDA_FUNCTION_NAME: &str = "events-handler-lambda-function";
const LAMBDA_ALIAS_NAME: &str = "events-handler-lambda-alias";
const SNS_TOPIC_ARN: &str = "arn:aws:sns:ap-south-1:189351993567:demo-sns-topic";

// ===========================================
// Environment
// ===========================================

/// デプロイ対象環境
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Dev,
    Test,
}

impl Environment {
    /// 定義済みの全環境
    pub const ALL: [Environment; 2] = [Environment::Dev, Environment::Test];

    /// 環境名（タグやログ出力用）
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
        }
    }

    /// この環境の固定コンテキストを返す
    ///
    /// devとtestは現時点で同一の値を持つ。
    pub fn context(&self) -> EnvironmentContext {
        match self {
            Environment::Dev | Environment::Test => EnvironmentContext {
                reference_table_name: REFERENCE_TABLE_NAME.to_string(),
                reference_table_partition_key: REFERENCE_TABLE_PARTITION_KEY.to_string(),
                vehicle_table_name: VEHICLE_TABLE_NAME.to_string(),
                vehicle_table_partition_key: VEHICLE_TABLE_PARTITION_KEY.to_string(),
                device_table_name: DEVICE_TABLE_NAME.to_string(),
                device_table_partition_key: DEVICE_TABLE_PARTITION_KEY.to_string(),
                lambda_layer_name: LAMBDA_LAYER_NAME.to_string(),
                lambda_function_name: LAMBDA_FUNCTION_NAME.to_string(),
                lambda_alias_name: LAMBDA_ALIAS_NAME.to_string(),
                sns_topic_arn: SNS_TOPIC_ARN.to_string(),
            },
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "dev" => Ok(Environment::Dev),
            "test" | "tst" => Ok(Environment::Test),
            other => Err(ConfigurationError::UnknownEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ===========================================
// EnvironmentContext
// ===========================================

/// 環境ごとの固定設定値
///
/// デプロイ開始時に一度だけ解決され、以後は変更されない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    /// デバイス-車両マッピング（参照）テーブル名
    pub reference_table_name: String,
    /// 参照テーブルのパーティションキー
    pub reference_table_partition_key: String,
    /// 車両テーブル名
    pub vehicle_table_name: String,
    /// 車両テーブルのパーティションキー
    pub vehicle_table_partition_key: String,
    /// デバイステーブル名
    pub device_table_name: String,
    /// デバイステーブルのパーティションキー
    pub device_table_partition_key: String,
    /// Lambdaレイヤー名
    pub lambda_layer_name: String,
    /// Lambda関数名
    pub lambda_function_name: String,
    /// Lambdaエイリアス名
    pub lambda_alias_name: String,
    /// 通知先SNSトピックARN
    pub sns_topic_arn: String,
}

impl EnvironmentContext {
    /// 全フィールドが空でないことを検証
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let fields: [(&'static str, &str); 10] = [
            ("reference_table_name", &self.reference_table_name),
            ("reference_table_partition_key", &self.reference_table_partition_key),
            ("vehicle_table_name", &self.vehicle_table_name),
            ("vehicle_table_partition_key", &self.vehicle_table_partition_key),
            ("device_table_name", &self.device_table_name),
            ("device_table_partition_key", &self.device_table_partition_key),
            ("lambda_layer_name", &self.lambda_layer_name),
            ("lambda_function_name", &self.lambda_function_name),
            ("lambda_alias_name", &self.lambda_alias_name),
            ("sns_topic_arn", &self.sns_topic_arn),
        ];

        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(ConfigurationError::EmptyField(name)),
            None => Ok(()),
        }
    }
}

/// 環境名から環境コンテキストを解決する
///
/// # エラー
/// 未知の環境名の場合は`ConfigurationError::UnknownEnvironment`を返す
pub fn resolve(environment_name: &str) -> Result<EnvironmentContext, ConfigurationError> {
    let environment: Environment = environment_name.parse()?;
    let context = environment.context();
    context.validate()?;
    Ok(context)
}
