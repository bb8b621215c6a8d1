//! Lambda関数の宣言
//!
//! 1つの関数定義から以下のリソースをグラフに登録する:
//! - 実行ロール（`AWS::IAM::Role`）とデフォルトポリシー（`AWS::IAM::Policy`）
//! - レイヤー（`AWS::Lambda::LayerVersion`）
//! - 関数本体（`AWS::Lambda::Function`）
//! - ロググループ保持期間（`Custom::LogRetention`、プロバイダーはグラフ内で共有）
//! - 不変バージョン（`AWS::Lambda::Version`）とそれを指すエイリアス（`AWS::Lambda::Alias`）
//!
//! コードアセットのS3キーは内容ハッシュから決まる。バージョンの論理IDは関数プロパティと
//! レイヤー内容のハッシュを含むため、コードか設定が変わると新しいバージョンが発行され、
//! エイリアスはそれを指し直す。古いバージョンは保持される。
//!
//! 権限は宣言時に追加されるのみで、実行時に変更されることはない。

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::domain::compute_spec::{
    asset_object_key, AssetCode, ENV_DEVICE_TABLE_NAME, ENV_REFERENCE_TABLE_NAME, ENV_SNS_ARN,
    ENV_VEHICLE_TABLE_NAME, FUNCTION_DESCRIPTION, FUNCTION_HANDLER, FUNCTION_TIMEOUT_SECS,
    LAYER_LICENSE,
};
use crate::domain::digest::sha256_hex;
use crate::domain::intrinsic::{get_att, join, pseudo, ref_to, regional_arn, sub, AWS_PARTITION};
use crate::domain::{
    ComputeSpec, GraphError, LogicalId, PolicyDocument, PolicyStatement, RemovalPolicy, Resource,
    ResourceGraph,
};

use super::stack_error::StackError;
use super::table_construct::TableHandle;

pub const FUNCTION_RESOURCE_TYPE: &str = "AWS::Lambda::Function";
pub const LAYER_RESOURCE_TYPE: &str = "AWS::Lambda::LayerVersion";
pub const VERSION_RESOURCE_TYPE: &str = "AWS::Lambda::Version";
pub const ALIAS_RESOURCE_TYPE: &str = "AWS::Lambda::Alias";
pub const ROLE_RESOURCE_TYPE: &str = "AWS::IAM::Role";
pub const POLICY_RESOURCE_TYPE: &str = "AWS::IAM::Policy";
pub const LOG_RETENTION_RESOURCE_TYPE: &str = "Custom::LogRetention";

/// アセット用ブートストラップバケット
pub const ASSET_BUCKET: &str = "cdk-hnb659fds-assets-${AWS::AccountId}-${AWS::Region}";

/// ログ保持期間プロバイダー（グラフ内で1つ）の論理ID
pub const LOG_RETENTION_PROVIDER_ID: &str = "LogRetentionProvider";
const LOG_RETENTION_PROVIDER_RUNTIME: &str = "nodejs18.x";
const LOG_RETENTION_PROVIDER_HANDLER: &str = "index.handler";
const LOG_RETENTION_PROVIDER_TIMEOUT_SECS: u32 = 900;
/// プロバイダーのコード（プロビジョニング側が同梱して発行する）
const LOG_RETENTION_PROVIDER_CODE_KEY: &str = "log-retention-provider.zip";

/// バージョン論理IDに付けるハッシュの長さ
const VERSION_HASH_LENGTH: usize = 32;

const BASIC_EXECUTION_ROLE_POLICY: &str =
    ":iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// 関数の環境変数に渡すテーブル
#[derive(Debug, Clone, Copy)]
pub struct FunctionTables<'a> {
    pub reference: &'a TableHandle,
    pub vehicle: &'a TableHandle,
    pub device: &'a TableHandle,
}

impl FunctionTables<'_> {
    fn all(&self) -> [&TableHandle; 3] {
        [self.reference, self.vehicle, self.device]
    }
}

/// 宣言済み関数への参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeHandle {
    function_id: LogicalId,
    role_id: LogicalId,
    policy_id: LogicalId,
    layer_id: LogicalId,
    version_id: LogicalId,
    alias_id: LogicalId,
    log_retention_id: LogicalId,
    function_name: String,
    alias_name: String,
}

impl ComputeHandle {
    pub fn function_id(&self) -> &LogicalId {
        &self.function_id
    }

    pub fn role_id(&self) -> &LogicalId {
        &self.role_id
    }

    /// 追加の権限付与先となるデフォルトポリシー
    pub fn policy_id(&self) -> &LogicalId {
        &self.policy_id
    }

    pub fn layer_id(&self) -> &LogicalId {
        &self.layer_id
    }

    pub fn version_id(&self) -> &LogicalId {
        &self.version_id
    }

    pub fn alias_id(&self) -> &LogicalId {
        &self.alias_id
    }

    pub fn log_retention_id(&self) -> &LogicalId {
        &self.log_retention_id
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn alias_name(&self) -> &str {
        &self.alias_name
    }

    /// 関数名（`Ref`）
    pub fn function_ref(&self) -> Value {
        ref_to(&self.function_id)
    }
}

/// 関数を宣言する
///
/// # エラー
/// - 渡されたテーブルがグラフに存在しない: `GraphError::UnresolvedDependency`
/// - コードアセットが読めない: `AssetError`
/// - 論理IDの重複: `GraphError::DuplicateLogicalId`
///
/// いずれの場合もグラフには何も追加しない。
pub fn declare_function(
    graph: &mut ResourceGraph,
    construct_id: &str,
    spec: &ComputeSpec,
    tables: &FunctionTables<'_>,
) -> Result<ComputeHandle, StackError> {
    let base = LogicalId::from_path(&[construct_id])?;
    let function_id = base.child("Function")?;

    // 参照するテーブルは先に宣言されていなければならない
    for table in tables.all() {
        graph.require(function_id.as_str(), table.logical_id())?;
    }

    let code_hash = spec.code().fingerprint()?;
    let layer_hash = spec.layer_code().fingerprint()?;

    let role_id = base.child("ServiceRole")?;
    let policy_id = role_id.child("DefaultPolicy")?;
    let layer_id = base.child("Layer")?;
    let alias_id = base.child("Alias")?;
    let log_retention_id = base.child("LogRetention")?;

    let function = with_asset_metadata(
        Resource::new(FUNCTION_RESOURCE_TYPE)
            .property("Architectures", json!([spec.architecture().as_str()]))
            .property("Code", asset_location(&code_hash))
            .property("Description", json!(FUNCTION_DESCRIPTION))
            .property(
                "Environment",
                json!({ "Variables": environment_variables(spec, tables) }),
            )
            .property("FunctionName", json!(spec.function_name()))
            .property("Handler", json!(FUNCTION_HANDLER))
            .property("Layers", json!([ref_to(&layer_id)]))
            .property("Role", get_att(&role_id, "Arn"))
            .property("Runtime", json!(spec.runtime().as_str()))
            .property("Timeout", json!(FUNCTION_TIMEOUT_SECS))
            .property("TracingConfig", json!({ "Mode": spec.tracing().as_str() }))
            // ポリシーがアタッチされてから関数を作成する
            .depends_on(&policy_id)
            .depends_on(&role_id),
        spec.code(),
        "Code",
    );
    let version_hash = sha256_hex([function.fingerprint().as_str(), layer_hash.as_str()]);
    let version_id = base
        .child("Version")?
        .child(&version_hash[..VERSION_HASH_LENGTH])?;

    let declared = [
        &role_id,
        &policy_id,
        &layer_id,
        &function_id,
        &version_id,
        &alias_id,
        &log_retention_id,
    ];
    for id in declared {
        if graph.contains(id) {
            return Err(GraphError::DuplicateLogicalId(id.to_string()).into());
        }
    }

    graph.add(role_id.clone(), lambda_service_role())?;
    graph.add(
        policy_id.clone(),
        Resource::new(POLICY_RESOURCE_TYPE)
            .policy_document(PolicyDocument::new(initial_statements(spec)))
            .property("PolicyName", json!(policy_id.as_str()))
            .property("Roles", json!([ref_to(&role_id)])),
    )?;

    graph.add(
        layer_id.clone(),
        with_asset_metadata(
            Resource::new(LAYER_RESOURCE_TYPE)
                .property("Content", asset_location(&layer_hash))
                .property("CompatibleArchitectures", json!([spec.architecture().as_str()]))
                .property("LayerName", json!(spec.layer_name()))
                .property("LicenseInfo", json!(LAYER_LICENSE)),
            spec.layer_code(),
            "Content",
        ),
    )?;

    graph.add(function_id.clone(), function)?;

    let provider_id = ensure_log_retention_provider(graph)?;
    graph.add(
        log_retention_id.clone(),
        Resource::new(LOG_RETENTION_RESOURCE_TYPE)
            .property("ServiceToken", get_att(&provider_id, "Arn"))
            .property(
                "LogGroupName",
                join("", vec![json!("/aws/lambda/"), ref_to(&function_id)]),
            )
            .property("RetentionInDays", json!(spec.log_retention().days())),
    )?;

    graph.add(
        version_id.clone(),
        Resource::new(VERSION_RESOURCE_TYPE)
            .property("FunctionName", ref_to(&function_id))
            .removal_policy(RemovalPolicy::Retain),
    )?;

    // エイリアスは同じ宣言で作成したバージョンを指す
    graph.add(
        alias_id.clone(),
        Resource::new(ALIAS_RESOURCE_TYPE)
            .property("FunctionName", ref_to(&function_id))
            .property("FunctionVersion", get_att(&version_id, "Version"))
            .property("Name", json!(spec.alias_name())),
    )?;

    info!(
        logical_id = %function_id,
        function_name = spec.function_name(),
        layer_name = spec.layer_name(),
        alias_name = spec.alias_name(),
        runtime = spec.runtime().as_str(),
        architecture = spec.architecture().as_str(),
        code_hash = %code_hash,
        version_id = %version_id,
        "Lambda関数を宣言"
    );

    Ok(ComputeHandle {
        function_id,
        role_id,
        policy_id,
        layer_id,
        version_id,
        alias_id,
        log_retention_id,
        function_name: spec.function_name().to_string(),
        alias_name: spec.alias_name().to_string(),
    })
}

/// 関数の環境変数
///
/// テーブル名はデプロイ時に解決される`Ref`、トピックARNはリテラル。
fn environment_variables(spec: &ComputeSpec, tables: &FunctionTables<'_>) -> Map<String, Value> {
    let mut variables = Map::new();
    variables.insert(ENV_REFERENCE_TABLE_NAME.to_string(), tables.reference.name_ref());
    variables.insert(ENV_VEHICLE_TABLE_NAME.to_string(), tables.vehicle.name_ref());
    variables.insert(ENV_DEVICE_TABLE_NAME.to_string(), tables.device.name_ref());
    variables.insert(ENV_SNS_ARN.to_string(), json!(spec.sns_topic_arn()));
    variables
}

/// 実行ロールの初期権限
fn initial_statements(spec: &ComputeSpec) -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::allow(["logs:CreateLogGroup"], vec![regional_arn("logs", "*")]),
        PolicyStatement::allow(
            ["logs:CreateLogStream", "logs:PutLogEvents"],
            vec![regional_arn("logs", "log-group:/aws/lambda/*")],
        ),
        PolicyStatement::allow(
            ["sns:Publish", "sns:ListTopics"],
            vec![json!(spec.sns_topic_arn())],
        ),
        // アクティブトレーシングに必要
        PolicyStatement::allow(
            ["xray:PutTraceSegments", "xray:PutTelemetryRecords"],
            vec![json!("*")],
        ),
    ]
}

/// Lambdaサービスが引き受けるロール（基本実行ポリシー付き）
fn lambda_service_role() -> Resource {
    Resource::new(ROLE_RESOURCE_TYPE)
        .property(
            "AssumeRolePolicyDocument",
            json!({
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": { "Service": "lambda.amazonaws.com" },
                }],
                "Version": crate::domain::policy::POLICY_VERSION,
            }),
        )
        .property(
            "ManagedPolicyArns",
            json!([join(
                "",
                vec![json!("arn:"), pseudo(AWS_PARTITION), json!(BASIC_EXECUTION_ROLE_POLICY)],
            )]),
        )
}

fn asset_location(fingerprint: &str) -> Value {
    bucket_location(asset_object_key(fingerprint))
}

fn bucket_location(key: impl Into<String>) -> Value {
    json!({
        "S3Bucket": sub(ASSET_BUCKET),
        "S3Key": key.into(),
    })
}

fn with_asset_metadata(resource: Resource, asset: &AssetCode, property: &str) -> Resource {
    let mut resource = resource
        .metadata("aws:asset:path", json!(asset.path()))
        .metadata("aws:asset:property", json!(property));
    let exclude = asset.exclude_patterns();
    if !exclude.is_empty() {
        resource = resource.metadata("aws:asset:exclude", json!(exclude));
    }
    resource
}

/// ログ保持期間プロバイダーをグラフに1つだけ登録する
///
/// 既に存在する場合はその論理IDを返す。
fn ensure_log_retention_provider(graph: &mut ResourceGraph) -> Result<LogicalId, StackError> {
    let provider_id = LogicalId::new(LOG_RETENTION_PROVIDER_ID)?;
    if graph.contains(&provider_id) {
        debug!(logical_id = %provider_id, "ログ保持期間プロバイダーを再利用");
        return Ok(provider_id);
    }

    let role_id = provider_id.child("ServiceRole")?;
    let policy_id = role_id.child("DefaultPolicy")?;

    graph.add(role_id.clone(), lambda_service_role())?;
    graph.add(
        policy_id.clone(),
        Resource::new(POLICY_RESOURCE_TYPE)
            .policy_document(PolicyDocument::new(vec![PolicyStatement::allow(
                ["logs:PutRetentionPolicy", "logs:DeleteRetentionPolicy"],
                vec![json!("*")],
            )]))
            .property("PolicyName", json!(policy_id.as_str()))
            .property("Roles", json!([ref_to(&role_id)])),
    )?;

    graph.add(
        provider_id.clone(),
        Resource::new(FUNCTION_RESOURCE_TYPE)
            .property("Code", bucket_location(LOG_RETENTION_PROVIDER_CODE_KEY))
            .property("Handler", json!(LOG_RETENTION_PROVIDER_HANDLER))
            .property("Role", get_att(&role_id, "Arn"))
            .property("Runtime", json!(LOG_RETENTION_PROVIDER_RUNTIME))
            .property("Timeout", json!(LOG_RETENTION_PROVIDER_TIMEOUT_SECS))
            .depends_on(&policy_id)
            .depends_on(&role_id),
    )?;

    debug!(logical_id = %provider_id, "ログ保持期間プロバイダーを宣言");
    Ok(provider_id)
}
