/// スタック構築のエラー型
///
/// 構築中のエラーはすべて致命的で、部分的なグラフは提出されない。
use thiserror::Error;

use crate::domain::{AssetError, ConfigurationError, GraphError, LogicalIdError, SpecError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StackError {
    /// 環境コンテキストの解決失敗
    #[error("環境設定エラー: {0}")]
    Configuration(#[from] ConfigurationError),

    /// リソースグラフのエラー（未解決依存・重複・循環）
    #[error("リソースグラフエラー: {0}")]
    Graph(#[from] GraphError),

    /// 論理IDの生成失敗
    #[error("論理IDエラー: {0}")]
    LogicalId(#[from] LogicalIdError),

    /// テーブル・関数定義の検証失敗
    #[error("定義エラー: {0}")]
    Spec(#[from] SpecError),

    /// コードアセットの読み込み失敗
    #[error("アセットエラー: {0}")]
    Asset(#[from] AssetError),

    /// ストリームが無効なテーブルへのストリーム操作
    #[error("ストリームが有効化されていないテーブルです: {0}")]
    StreamNotEnabled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_configuration_error() {
        let error: StackError = ConfigurationError::UnknownEnvironment("prod".to_string()).into();
        assert_eq!(
            error.to_string(),
            "環境設定エラー: 未知のデプロイ環境です: prod"
        );
    }

    #[test]
    fn test_from_graph_error() {
        let error: StackError = GraphError::UnresolvedDependency {
            from: "Fn".to_string(),
            to: "Table".to_string(),
        }
        .into();
        assert!(matches!(
            error,
            StackError::Graph(GraphError::UnresolvedDependency { .. })
        ));
    }

    #[test]
    fn test_from_asset_error() {
        let error: StackError = AssetError::NotFound("src/lambda".to_string()).into();
        assert_eq!(
            error.to_string(),
            "アセットエラー: アセットディレクトリが見つかりません: src/lambda"
        );
    }

    #[test]
    fn test_stream_not_enabled_display() {
        let error = StackError::StreamNotEnabled("vehicle_table".to_string());
        assert_eq!(
            error.to_string(),
            "ストリームが有効化されていないテーブルです: vehicle_table"
        );
    }
}
