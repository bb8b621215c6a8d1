/// DynamoDBテーブルの宣言
///
/// テーブル定義から`AWS::DynamoDB::Table`リソースをグラフに登録し、
/// 後続の関数・権限・イベントソースの配線に使うハンドルを返す。
/// 実リソースはグラフが提出されるまで作成されない。
use serde_json::{json, Value};
use tracing::info;

use crate::domain::intrinsic::{get_att, ref_to};
use crate::domain::table_spec::{BILLING_MODE, PARTITION_KEY_ATTRIBUTE_TYPE, TABLE_CLASS};
use crate::domain::{
    LogicalId, RemovalPolicy, Resource, ResourceGraph, StreamViewType, TableEncryption, TableSpec,
};

use super::stack_error::StackError;

/// CloudFormationリソースタイプ
pub const TABLE_RESOURCE_TYPE: &str = "AWS::DynamoDB::Table";

/// 宣言済みテーブルへの参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    logical_id: LogicalId,
    table_name: String,
    partition_key: String,
    stream: Option<StreamViewType>,
}

impl TableHandle {
    pub fn logical_id(&self) -> &LogicalId {
        &self.logical_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn stream(&self) -> Option<StreamViewType> {
        self.stream
    }

    /// デプロイ時に解決されるテーブル名（`Ref`）
    pub fn name_ref(&self) -> Value {
        ref_to(&self.logical_id)
    }

    /// テーブルARN
    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    /// ストリームARN
    ///
    /// # エラー
    /// ストリームが有効化されていない場合は`StackError::StreamNotEnabled`
    pub fn stream_arn(&self) -> Result<Value, StackError> {
        match self.stream {
            Some(_) => Ok(get_att(&self.logical_id, "StreamArn")),
            None => Err(StackError::StreamNotEnabled(self.table_name.clone())),
        }
    }
}

/// テーブルを宣言する
///
/// 論理IDは`<construct_id><table_name>dynamodbLogicalId`（英数字以外は除去）。
pub fn declare_table(
    graph: &mut ResourceGraph,
    construct_id: &str,
    spec: &TableSpec,
) -> Result<TableHandle, StackError> {
    let logical_id = LogicalId::from_path(&[construct_id, spec.name(), "dynamodbLogicalId"])?;

    let mut resource = Resource::new(TABLE_RESOURCE_TYPE)
        .property(
            "KeySchema",
            json!([{ "AttributeName": spec.partition_key(), "KeyType": "HASH" }]),
        )
        .property(
            "AttributeDefinitions",
            json!([{
                "AttributeName": spec.partition_key(),
                "AttributeType": PARTITION_KEY_ATTRIBUTE_TYPE,
            }]),
        )
        .property("BillingMode", json!(BILLING_MODE))
        .property("SSESpecification", sse_specification(spec.encryption()))
        .property("TableClass", json!(TABLE_CLASS))
        .property("TableName", json!(spec.name()))
        .removal_policy(RemovalPolicy::Retain);

    if let Some(view_type) = spec.stream() {
        resource = resource.property(
            "StreamSpecification",
            json!({ "StreamViewType": view_type.as_str() }),
        );
    }

    graph.add(logical_id.clone(), resource)?;

    info!(
        logical_id = %logical_id,
        table_name = spec.name(),
        partition_key = spec.partition_key(),
        stream = spec.stream().map(|s| s.as_str()),
        "DynamoDBテーブルを宣言"
    );

    Ok(TableHandle {
        logical_id,
        table_name: spec.name().to_string(),
        partition_key: spec.partition_key().to_string(),
        stream: spec.stream(),
    })
}

fn sse_specification(encryption: TableEncryption) -> Value {
    match encryption {
        TableEncryption::AwsManaged => json!({ "SSEEnabled": true }),
    }
}
