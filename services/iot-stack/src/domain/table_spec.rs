/// DynamoDBテーブル定義
///
/// テーブル名・パーティションキー・ストリーム設定を保持する。
/// 容量モード・暗号化・テーブルクラスは固定ポリシー（オンデマンド、AWS管理キー、STANDARD）。
use thiserror::Error;

/// テーブルクラス（固定）
pub const TABLE_CLASS: &str = "STANDARD";

/// 課金モード（固定、オンデマンド）
pub const BILLING_MODE: &str = "PAY_PER_REQUEST";

/// パーティションキーの属性型（文字列）
pub const PARTITION_KEY_ATTRIBUTE_TYPE: &str = "S";

/// テーブル・関数定義の検証エラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("フィールドが空です: {0}")]
    EmptyField(&'static str),
}

/// ストリームで取得するアイテムイメージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamViewType {
    /// 変更後のイメージのみ
    NewImage,
    /// 変更前のイメージのみ
    OldImage,
    /// 変更前後の両イメージ
    NewAndOldImages,
    /// キー属性のみ
    KeysOnly,
}

impl StreamViewType {
    /// CloudFormation上の値
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamViewType::NewImage => "NEW_IMAGE",
            StreamViewType::OldImage => "OLD_IMAGE",
            StreamViewType::NewAndOldImages => "NEW_AND_OLD_IMAGES",
            StreamViewType::KeysOnly => "KEYS_ONLY",
        }
    }
}

/// テーブル暗号化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableEncryption {
    /// AWS管理キー（KMS）
    #[default]
    AwsManaged,
}

/// DynamoDBテーブル定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    name: String,
    partition_key: String,
    stream: Option<StreamViewType>,
    encryption: TableEncryption,
}

impl TableSpec {
    /// テーブル定義を作成
    ///
    /// # エラー
    /// テーブル名またはパーティションキーが空の場合
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Result<Self, SpecError> {
        let name = name.into();
        let partition_key = partition_key.into();

        if name.trim().is_empty() {
            return Err(SpecError::EmptyField("table_name"));
        }
        if partition_key.trim().is_empty() {
            return Err(SpecError::EmptyField("partition_key"));
        }

        Ok(Self {
            name,
            partition_key,
            stream: None,
            encryption: TableEncryption::default(),
        })
    }

    /// 変更ストリームを有効化
    pub fn with_stream(mut self, view_type: StreamViewType) -> Self {
        self.stream = Some(view_type);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn stream(&self) -> Option<StreamViewType> {
        self.stream
    }

    pub fn encryption(&self) -> TableEncryption {
        self.encryption
    }
}
