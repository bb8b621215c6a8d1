/// CloudFormation論理ID
///
/// 論理IDは英数字（A-Za-z0-9）のみ、最大255文字。
/// パスから組み立てたIDが長すぎる場合は、先頭を残して内容ハッシュの接尾辞を付ける。
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::digest::sha256_hex;

/// 論理IDの最大長
pub const MAX_LOGICAL_ID_LENGTH: usize = 255;

/// 短縮時に付けるハッシュ接尾辞の長さ
pub const HASH_SUFFIX_LENGTH: usize = 8;

/// 論理IDのエラー型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogicalIdError {
    #[error("論理IDが空です")]
    Empty,

    #[error("論理IDに英数字以外の文字が含まれています: {0}")]
    InvalidCharacters(String),

    #[error("論理IDが{MAX_LOGICAL_ID_LENGTH}文字を超えています: {0}")]
    TooLong(String),
}

/// グラフ上のリソースの論理ID（検証済み）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// 文字列をそのまま検証する
    pub fn new(id: impl Into<String>) -> Result<Self, LogicalIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(LogicalIdError::Empty);
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LogicalIdError::InvalidCharacters(id));
        }
        if id.len() > MAX_LOGICAL_ID_LENGTH {
            return Err(LogicalIdError::TooLong(id));
        }
        Ok(Self(id))
    }

    /// パスの各セグメントからIDを組み立てる（英数字以外は除去）
    ///
    /// `["dynamodbRefTable", "vehicle_device_mapping_table", "dynamodbLogicalId"]`は
    /// `dynamodbRefTablevehicledevicemappingtabledynamodbLogicalId`になる。
    /// 255文字を超える場合は先頭247文字に8文字のハッシュを付ける。
    pub fn from_path<S: AsRef<str>>(segments: &[S]) -> Result<Self, LogicalIdError> {
        let joined: String = segments
            .iter()
            .flat_map(|s| s.as_ref().chars())
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if joined.len() <= MAX_LOGICAL_ID_LENGTH {
            return Self::new(joined);
        }

        // 英数字のみなのでバイト位置で切ってよい
        let suffix = sha256_hex([joined.as_bytes()])[..HASH_SUFFIX_LENGTH].to_ascii_uppercase();
        let mut shortened = joined[..MAX_LOGICAL_ID_LENGTH - HASH_SUFFIX_LENGTH].to_string();
        shortened.push_str(&suffix);
        Self::new(shortened)
    }

    /// 子セグメントを連結したIDを返す
    pub fn child(&self, segment: &str) -> Result<Self, LogicalIdError> {
        Self::from_path(&[self.0.as_str(), segment])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
