/// IoTイベント処理スタックの構築
///
/// 環境コンテキストから3つのDynamoDBテーブルと1つのLambda関数を宣言し、
/// 権限付与とデバイステーブルのストリーム購読を配線する。
///
/// # 処理フロー
/// 1. 参照テーブル（ストリームなし）
/// 2. 車両テーブル（ストリームなし）
/// 3. デバイステーブル（NEW_IMAGEストリーム）
/// 4. Lambda関数（3テーブルの名前とSNSトピックARNを環境変数に設定）
/// 5. 参照・車両テーブルの読み取り権限を付与
/// 6. デバイステーブルのストリーム読み取り権限を付与
/// 7. デバイステーブルのストリームを関数に接続（LATESTから、過去分は再処理しない）
///
/// スタックタグ（環境名と担当者）はタグ付け可能な全リソースに付与される。
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use crate::domain::compute_spec::{DEFAULT_FUNCTION_CODE_DIR, DEFAULT_LAYER_CODE_DIR};
use crate::domain::{
    ComputeSpec, Environment, EnvironmentContext, LogicalId, ResourceGraph, StreamViewType,
    TableSpec,
};

use super::function_construct::{declare_function, ComputeHandle, FunctionTables};
use super::grants::{add_dynamo_event_source, grant_read_data, grant_stream_read, StartingPosition};
use super::stack_error::StackError;
use super::table_construct::{declare_table, TableHandle};

/// テンプレートの説明
pub const STACK_DESCRIPTION: &str =
    "IoT events handler: DynamoDB tables, Lambda function and device stream event source";

pub const REFERENCE_TABLE_CONSTRUCT_ID: &str = "dynamodbRefTable";
pub const VEHICLE_TABLE_CONSTRUCT_ID: &str = "dynamodbVehicleTable";
pub const DEVICE_TABLE_CONSTRUCT_ID: &str = "dynamodbDeviceTable";
pub const FUNCTION_CONSTRUCT_ID: &str = "eventsHandler";

pub const TAG_ENVIRONMENT: &str = "Environment";
pub const TAG_RESOURCE_CONTACT: &str = "ResourceContact";
pub const RESOURCE_CONTACT: &str = "Rajnish Kumar";

/// コードアセットのディレクトリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackAssets {
    pub function_code_dir: String,
    pub layer_code_dir: String,
}

impl Default for StackAssets {
    fn default() -> Self {
        Self {
            function_code_dir: DEFAULT_FUNCTION_CODE_DIR.to_string(),
            layer_code_dir: DEFAULT_LAYER_CODE_DIR.to_string(),
        }
    }
}

/// 構築オプション
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackOptions {
    pub assets: StackAssets,
    /// スタックタグ（空ならタグを出力しない）
    pub tags: BTreeMap<String, String>,
}

impl StackOptions {
    /// 環境のスタックタグ付きオプション
    pub fn for_environment(environment: Environment, assets: StackAssets) -> Self {
        Self {
            assets,
            tags: stack_tags(environment),
        }
    }
}

/// 環境のスタックタグ
pub fn stack_tags(environment: Environment) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TAG_ENVIRONMENT.to_string(), environment.name().to_string()),
        (TAG_RESOURCE_CONTACT.to_string(), RESOURCE_CONTACT.to_string()),
    ])
}

/// 構築済みスタック
#[derive(Debug, Clone, PartialEq)]
pub struct IotEventsStack {
    graph: ResourceGraph,
    reference_table: TableHandle,
    vehicle_table: TableHandle,
    device_table: TableHandle,
    function: ComputeHandle,
    event_source_id: LogicalId,
}

impl IotEventsStack {
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn into_graph(self) -> ResourceGraph {
        self.graph
    }

    pub fn reference_table(&self) -> &TableHandle {
        &self.reference_table
    }

    pub fn vehicle_table(&self) -> &TableHandle {
        &self.vehicle_table
    }

    pub fn device_table(&self) -> &TableHandle {
        &self.device_table
    }

    pub fn function(&self) -> &ComputeHandle {
        &self.function
    }

    pub fn event_source_id(&self) -> &LogicalId {
        &self.event_source_id
    }

    /// CloudFormationテンプレートを合成する
    pub fn synthesize(&self) -> Result<Value, StackError> {
        Ok(self.graph.synthesize()?)
    }
}

/// デフォルトのアセットディレクトリでスタックを構築する（タグなし）
pub fn build_stack(context: &EnvironmentContext) -> Result<IotEventsStack, StackError> {
    build_stack_with_options(context, &StackOptions::default())
}

/// スタックを構築する
///
/// 同じコンテキスト・同じアセット内容からは常に同一のグラフが得られる。
pub fn build_stack_with_options(
    context: &EnvironmentContext,
    options: &StackOptions,
) -> Result<IotEventsStack, StackError> {
    context.validate()?;
    let assets = &options.assets;
    let mut graph = ResourceGraph::new().with_description(STACK_DESCRIPTION);
    for (key, value) in &options.tags {
        graph = graph.with_tag(key.as_str(), value.as_str());
    }

    // Step 1-3: テーブル
    let reference_table = declare_table(
        &mut graph,
        REFERENCE_TABLE_CONSTRUCT_ID,
        &TableSpec::new(
            context.reference_table_name.as_str(),
            context.reference_table_partition_key.as_str(),
        )?,
    )?;
    let vehicle_table = declare_table(
        &mut graph,
        VEHICLE_TABLE_CONSTRUCT_ID,
        &TableSpec::new(
            context.vehicle_table_name.as_str(),
            context.vehicle_table_partition_key.as_str(),
        )?,
    )?;
    let device_table = declare_table(
        &mut graph,
        DEVICE_TABLE_CONSTRUCT_ID,
        &TableSpec::new(
            context.device_table_name.as_str(),
            context.device_table_partition_key.as_str(),
        )?
        .with_stream(StreamViewType::NewImage),
    )?;

    // Step 4: 関数
    let spec = ComputeSpec::from_context(context)?
        .with_code_dirs(assets.function_code_dir.as_str(), assets.layer_code_dir.as_str());
    let function = declare_function(
        &mut graph,
        FUNCTION_CONSTRUCT_ID,
        &spec,
        &FunctionTables {
            reference: &reference_table,
            vehicle: &vehicle_table,
            device: &device_table,
        },
    )?;

    // Step 5-6: 権限
    grant_read_data(&mut graph, &reference_table, &function)?;
    grant_read_data(&mut graph, &vehicle_table, &function)?;
    grant_stream_read(&mut graph, &device_table, &function)?;

    // Step 7: ストリーム購読
    let event_source_id =
        add_dynamo_event_source(&mut graph, &device_table, &function, StartingPosition::Latest)?;

    info!(
        resource_count = graph.len(),
        function_name = function.function_name(),
        "スタック構築完了"
    );

    Ok(IotEventsStack {
        graph,
        reference_table,
        vehicle_table,
        device_table,
        function,
        event_source_id,
    })
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::domain::compute_spec::tests::AssetFixture;
    use crate::domain::logical_id::MAX_LOGICAL_ID_LENGTH;
    use crate::domain::{resolve, AssetError, ConfigurationError};
    use crate::infrastructure::logging::init_test_logging;
    use serde_json::json;

    /// フィクスチャのアセットディレクトリ
    pub fn fixture_assets(assets: &AssetFixture) -> StackAssets {
        StackAssets {
            function_code_dir: assets.code_dir(),
            layer_code_dir: assets.layer_dir(),
        }
    }

    fn untagged(assets: &AssetFixture) -> StackOptions {
        StackOptions {
            assets: fixture_assets(assets),
            tags: BTreeMap::new(),
        }
    }

    fn build(context: &EnvironmentContext) -> IotEventsStack {
        let assets = AssetFixture::new();
        build_stack_with_options(context, &untagged(&assets)).unwrap()
    }

    fn dev_stack() -> IotEventsStack {
        init_test_logging();
        build(&resolve("dev").unwrap())
    }

    fn resources_of_type<'a>(template: &'a Value, resource_type: &str) -> Vec<&'a Value> {
        template["Resources"]
            .as_object()
            .unwrap()
            .values()
            .filter(|r| r["Type"] == json!(resource_type))
            .collect()
    }

    #[test]
    fn test_structural_counts() {
        let template = dev_stack().synthesize().unwrap();

        assert_eq!(resources_of_type(&template, "AWS::DynamoDB::Table").len(), 3);
        assert_eq!(resources_of_type(&template, "AWS::IAM::Role").len(), 2);
        assert_eq!(resources_of_type(&template, "AWS::IAM::Policy").len(), 2);
        assert_eq!(resources_of_type(&template, "Custom::LogRetention").len(), 1);
        assert_eq!(resources_of_type(&template, "AWS::Lambda::EventSourceMapping").len(), 1);
        assert_eq!(resources_of_type(&template, "AWS::Lambda::Version").len(), 1);
        assert_eq!(resources_of_type(&template, "AWS::Lambda::Alias").len(), 1);
        assert_eq!(resources_of_type(&template, "AWS::Lambda::LayerVersion").len(), 1);

        // ハンドラー関数は1つ（もう1つはログ保持期間プロバイダー）
        let handlers: Vec<_> = resources_of_type(&template, "AWS::Lambda::Function")
            .into_iter()
            .filter(|r| r["Properties"].get("FunctionName").is_some())
            .collect();
        assert_eq!(handlers.len(), 1);
    }

    #[test]
    fn test_structure_independent_of_context_values() {
        let mut context = Environment::Dev.context();
        context.reference_table_name = "a".to_string();
        context.vehicle_table_name = "b".to_string();
        context.device_table_name = "c".to_string();
        context.lambda_function_name = "other-function".to_string();

        let stack = build(&context);
        assert_eq!(stack.graph().count_of_type("AWS::DynamoDB::Table"), 3);
        assert_eq!(stack.graph().count_of_type("AWS::Lambda::EventSourceMapping"), 1);
        assert_eq!(stack.function().function_name(), "other-function");
    }

    #[test]
    fn test_only_device_table_has_stream() {
        let stack = dev_stack();
        let template = stack.synthesize().unwrap();
        let resources = &template["Resources"];

        let device = &resources[stack.device_table().logical_id().as_str()];
        assert_eq!(
            device["Properties"]["StreamSpecification"],
            json!({"StreamViewType": "NEW_IMAGE"})
        );
        for table in [stack.reference_table(), stack.vehicle_table()] {
            let resource = &resources[table.logical_id().as_str()];
            assert!(resource["Properties"].get("StreamSpecification").is_none());
        }
    }

    #[test]
    fn test_environment_variables_exactly_four_keys() {
        let stack = dev_stack();
        let template = stack.synthesize().unwrap();
        let function = &template["Resources"][stack.function().function_id().as_str()];
        let variables = function["Properties"]["Environment"]["Variables"]
            .as_object()
            .unwrap();

        let mut keys: Vec<&str> = variables.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["DEVICE_TABLE_NAME", "REFERENCE_TABLE_NAME", "SNS_ARN", "VEHICLE_TABLE_NAME"]
        );
        assert_eq!(variables["REFERENCE_TABLE_NAME"], stack.reference_table().name_ref());
        assert_eq!(variables["VEHICLE_TABLE_NAME"], stack.vehicle_table().name_ref());
        assert_eq!(variables["DEVICE_TABLE_NAME"], stack.device_table().name_ref());
        assert_eq!(
            variables["SNS_ARN"],
            json!("arn:aws:sns:ap-south-1:189351993567:demo-sns-topic")
        );
    }

    #[test]
    fn test_build_is_idempotent() {
        let context = resolve("dev").unwrap();
        let assets = AssetFixture::new();
        let first = build_stack_with_options(&context, &untagged(&assets)).unwrap();
        let second = build_stack_with_options(&context, &untagged(&assets)).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.synthesize().unwrap(), second.synthesize().unwrap());
    }

    #[test]
    fn test_end_to_end_dev_scenario() {
        let stack = dev_stack();
        let template = stack.synthesize().unwrap();
        let resources = template["Resources"].as_object().unwrap();

        let tables = resources_of_type(&template, "AWS::DynamoDB::Table");
        let reference = tables
            .iter()
            .find(|t| t["Properties"]["TableName"] == json!("vehicle_device_mapping_table"))
            .unwrap();
        assert_eq!(
            reference["Properties"]["KeySchema"],
            json!([{"AttributeName": "device_mac_address", "KeyType": "HASH"}])
        );
        assert!(reference["Properties"].get("StreamSpecification").is_none());

        let device = tables
            .iter()
            .find(|t| t["Properties"]["TableName"] == json!("device_table"))
            .unwrap();
        assert_eq!(
            device["Properties"]["KeySchema"],
            json!([{"AttributeName": "device_mac_address", "KeyType": "HASH"}])
        );
        assert_eq!(
            device["Properties"]["StreamSpecification"]["StreamViewType"],
            json!("NEW_IMAGE")
        );

        let function = &resources[stack.function().function_id().as_str()];
        assert_eq!(
            function["Properties"]["FunctionName"],
            json!("events-handler-lambda-function")
        );
        assert_eq!(function["Properties"]["Timeout"], json!(60));
        assert_eq!(
            function["Properties"]["Environment"]["Variables"]["REFERENCE_TABLE_NAME"],
            json!({"Ref": stack.reference_table().logical_id().as_str()})
        );
    }

    #[test]
    fn test_grants_and_subscription() {
        let stack = dev_stack();
        let policy = stack.graph().get(stack.function().policy_id()).unwrap();
        let statements = policy.policy_statements().unwrap();

        let read_targets: Vec<_> = statements
            .iter()
            .filter(|s| s.has_action("dynamodb:GetItem"))
            .flat_map(|s| s.resource.clone())
            .collect();
        assert_eq!(
            read_targets,
            vec![stack.reference_table().arn(), stack.vehicle_table().arn()]
        );
        assert!(
            statements
                .iter()
                .any(|s| s.has_action("dynamodb:DescribeStream")
                    && s.resource == vec![stack.device_table().stream_arn().unwrap()])
        );
        assert!(
            statements
                .iter()
                .all(|s| !s.has_action("dynamodb:PutItem"))
        );

        let mapping = stack.graph().get(stack.event_source_id()).unwrap();
        assert_eq!(mapping.get_property("StartingPosition"), Some(json!("LATEST")));
        assert_eq!(
            mapping.get_property("EventSourceArn"),
            Some(stack.device_table().stream_arn().unwrap())
        );
    }

    #[test]
    fn test_dependency_order() {
        let stack = dev_stack();
        let order = stack.graph().topological_order().unwrap();
        let position = |id: &LogicalId| order.iter().position(|x| x == id).unwrap();

        let function = position(stack.function().function_id());
        for table in [stack.reference_table(), stack.vehicle_table(), stack.device_table()] {
            assert!(position(table.logical_id()) < function);
        }
        assert!(position(stack.function().policy_id()) < position(stack.event_source_id()));
        assert!(function < position(stack.event_source_id()));
    }

    #[test]
    fn test_custom_asset_dirs() {
        let assets = AssetFixture::new();
        let stack = build_stack_with_options(&resolve("dev").unwrap(), &untagged(&assets)).unwrap();
        let template = stack.synthesize().unwrap();

        let function = &template["Resources"][stack.function().function_id().as_str()];
        assert_eq!(function["Metadata"]["aws:asset:path"], json!(assets.code_dir()));
        let layer = &template["Resources"][stack.function().layer_id().as_str()];
        assert_eq!(layer["Metadata"]["aws:asset:path"], json!(assets.layer_dir()));
    }

    #[test]
    fn test_handler_change_changes_template() {
        let context = resolve("dev").unwrap();
        let assets = AssetFixture::new();
        let before = build_stack_with_options(&context, &untagged(&assets)).unwrap();

        assets.write_handler("def lambda_handler(event, context):\n    raise ValueError()\n");
        let after = build_stack_with_options(&context, &untagged(&assets)).unwrap();

        let key = |stack: &IotEventsStack| {
            let function = stack.graph().get(stack.function().function_id()).unwrap();
            function.get_property("Code").unwrap()["S3Key"].clone()
        };
        assert_ne!(key(&before), key(&after));
        assert_ne!(before.function().version_id(), after.function().version_id());
        assert_ne!(before.synthesize().unwrap(), after.synthesize().unwrap());
    }

    #[test]
    fn test_missing_default_asset_dir_fails() {
        let result = build_stack(&resolve("dev").unwrap());
        assert_eq!(
            result.err(),
            Some(StackError::Asset(AssetError::NotFound("src/lambda".to_string())))
        );
    }

    #[test]
    fn test_max_length_table_names() {
        let mut context = Environment::Dev.context();
        context.reference_table_name = "r".repeat(255);
        context.vehicle_table_name = "v".repeat(255);
        context.device_table_name = "d".repeat(255);

        let stack = build(&context);
        let template = stack.synthesize().unwrap();
        let resources = template["Resources"].as_object().unwrap();

        assert!(resources.keys().all(|id| id.len() <= MAX_LOGICAL_ID_LENGTH));
        assert_eq!(resources_of_type(&template, "AWS::DynamoDB::Table").len(), 3);
        assert_eq!(resources_of_type(&template, "AWS::Lambda::EventSourceMapping").len(), 1);
        let device = &resources[stack.device_table().logical_id().as_str()];
        assert_eq!(device["Properties"]["TableName"], json!("d".repeat(255)));
        assert_eq!(
            stack.graph().get(stack.event_source_id()).unwrap().get_property("EventSourceArn"),
            Some(stack.device_table().stream_arn().unwrap())
        );
    }

    #[test]
    fn test_environment_tags() {
        let assets = AssetFixture::new();
        let options = StackOptions::for_environment(Environment::Dev, fixture_assets(&assets));
        let stack = build_stack_with_options(&resolve("dev").unwrap(), &options).unwrap();
        let template = stack.synthesize().unwrap();

        let expected = json!([
            {"Key": "Environment", "Value": "dev"},
            {"Key": "ResourceContact", "Value": "Rajnish Kumar"}
        ]);
        for resource_type in ["AWS::DynamoDB::Table", "AWS::Lambda::Function", "AWS::IAM::Role"] {
            for resource in resources_of_type(&template, resource_type) {
                assert_eq!(resource["Properties"]["Tags"], expected, "{}", resource_type);
            }
        }
        for resource_type in [
            "AWS::IAM::Policy",
            "AWS::Lambda::EventSourceMapping",
            "AWS::Lambda::Alias",
            "Custom::LogRetention",
        ] {
            for resource in resources_of_type(&template, resource_type) {
                assert!(resource["Properties"].get("Tags").is_none(), "{}", resource_type);
            }
        }
    }

    #[test]
    fn test_stack_tags() {
        let tags = stack_tags(Environment::Test);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["Environment"], "test");
        assert_eq!(tags["ResourceContact"], "Rajnish Kumar");
    }

    #[test]
    fn test_invalid_context_aborts_before_declaring() {
        let mut context = Environment::Dev.context();
        context.sns_topic_arn = String::new();

        let assets = AssetFixture::new();
        let result = build_stack_with_options(&context, &untagged(&assets));
        assert_eq!(
            result.err(),
            Some(StackError::Configuration(ConfigurationError::EmptyField("sns_topic_arn")))
        );
    }

    #[test]
    fn test_template_literal_values() {
        let template = dev_stack().synthesize().unwrap();
        for table in resources_of_type(&template, "AWS::DynamoDB::Table") {
            assert_eq!(table["Properties"]["TableClass"], json!("STANDARD"));
            assert_eq!(table["Properties"]["BillingMode"], json!("PAY_PER_REQUEST"));
            assert_eq!(table["Properties"]["SSESpecification"]["SSEEnabled"], json!(true));
        }
        let retention = resources_of_type(&template, "Custom::LogRetention");
        assert_eq!(retention[0]["Properties"]["RetentionInDays"], json!(7));
    }
}
