/// テーブル権限の付与とストリームイベントソースの登録
///
/// 付与は関数のデフォルトポリシーへのステートメント追加として表現する。
/// 読み取り権限のみを付与し、書き込みアクションは含めない。
use serde_json::json;
use tracing::info;

use crate::domain::{LogicalId, PolicyStatement, Resource, ResourceGraph};

use super::function_construct::ComputeHandle;
use super::stack_error::StackError;
use super::table_construct::TableHandle;

pub const EVENT_SOURCE_MAPPING_RESOURCE_TYPE: &str = "AWS::Lambda::EventSourceMapping";

/// イベントソースの1回あたりの最大レコード数
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// テーブル読み取りアクション
pub const TABLE_READ_ACTIONS: [&str; 8] = [
    "dynamodb:BatchGetItem",
    "dynamodb:GetRecords",
    "dynamodb:GetShardIterator",
    "dynamodb:Query",
    "dynamodb:GetItem",
    "dynamodb:Scan",
    "dynamodb:ConditionCheckItem",
    "dynamodb:DescribeTable",
];

/// ストリーム読み取りアクション（ストリームARN対象）
pub const STREAM_READ_ACTIONS: [&str; 3] = [
    "dynamodb:DescribeStream",
    "dynamodb:GetRecords",
    "dynamodb:GetShardIterator",
];

/// ストリームの読み取り開始位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartingPosition {
    /// サブスクリプション作成後のイベントのみ（過去分は再処理しない）
    #[default]
    Latest,
    /// 保持されている最古のイベントから
    TrimHorizon,
}

impl StartingPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartingPosition::Latest => "LATEST",
            StartingPosition::TrimHorizon => "TRIM_HORIZON",
        }
    }
}

fn require_both(
    graph: &ResourceGraph,
    table: &TableHandle,
    function: &ComputeHandle,
) -> Result<(), StackError> {
    graph.require(function.policy_id().as_str(), function.function_id())?;
    graph.require(function.policy_id().as_str(), table.logical_id())?;
    Ok(())
}

/// テーブルの読み取り権限を関数に付与する
pub fn grant_read_data(
    graph: &mut ResourceGraph,
    table: &TableHandle,
    function: &ComputeHandle,
) -> Result<(), StackError> {
    require_both(graph, table, function)?;

    graph.add_policy_statement(
        function.policy_id(),
        PolicyStatement::allow(TABLE_READ_ACTIONS, vec![table.arn()]),
    )?;

    info!(
        table_name = table.table_name(),
        function_name = function.function_name(),
        "テーブル読み取り権限を付与"
    );
    Ok(())
}

/// テーブルストリームの読み取り権限を関数に付与する
///
/// # エラー
/// ストリームが無効なテーブルの場合は`StackError::StreamNotEnabled`
pub fn grant_stream_read(
    graph: &mut ResourceGraph,
    table: &TableHandle,
    function: &ComputeHandle,
) -> Result<(), StackError> {
    require_both(graph, table, function)?;
    let stream_arn = table.stream_arn()?;

    graph.add_policy_statement(
        function.policy_id(),
        PolicyStatement::allow(["dynamodb:ListStreams"], vec![json!("*")]),
    )?;
    graph.add_policy_statement(
        function.policy_id(),
        PolicyStatement::allow(STREAM_READ_ACTIONS, vec![stream_arn]),
    )?;

    info!(
        table_name = table.table_name(),
        function_name = function.function_name(),
        "ストリーム読み取り権限を付与"
    );
    Ok(())
}

/// テーブルの変更ストリームを関数のイベントソースとして登録する
///
/// マッピングはポリシーに依存させ、権限が揃ってからポーリングを開始する。
pub fn add_dynamo_event_source(
    graph: &mut ResourceGraph,
    table: &TableHandle,
    function: &ComputeHandle,
    starting_position: StartingPosition,
) -> Result<LogicalId, StackError> {
    require_both(graph, table, function)?;
    let stream_arn = table.stream_arn()?;

    let mapping_id = function
        .function_id()
        .child("DynamoDBEventSource")?
        .child(table.logical_id().as_str())?;

    graph.add(
        mapping_id.clone(),
        Resource::new(EVENT_SOURCE_MAPPING_RESOURCE_TYPE)
            .property("BatchSize", json!(DEFAULT_BATCH_SIZE))
            .property("EventSourceArn", stream_arn)
            .property("FunctionName", function.function_ref())
            .property("StartingPosition", json!(starting_position.as_str()))
            .depends_on(function.policy_id()),
    )?;

    info!(
        logical_id = %mapping_id,
        table_name = table.table_name(),
        function_name = function.function_name(),
        starting_position = starting_position.as_str(),
        "ストリームイベントソースを登録"
    );
    Ok(mapping_id)
}
