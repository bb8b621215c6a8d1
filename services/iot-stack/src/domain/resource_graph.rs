//! リソースグラフ
//!
//! 1回のデプロイで宣言される全リソースと、その依存関係（参照・明示的DependsOn）を保持する。
//! 宣言順には依存しない: 依存辺はプロパティ中の`Ref`/`Fn::GetAtt`/`Fn::Sub`から導出し、
//! 合成時にトポロジカルソートで未解決参照と循環を検出する。
//! スタック単位のタグは合成時にタグ付け可能なリソースへ付与する。

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use super::digest::sha256_hex;
use super::intrinsic::collect_references;
use super::logical_id::LogicalId;
use super::policy::{PolicyDocument, PolicyStatement};

/// テンプレートフォーマットバージョン
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// スタックタグを付与するリソースタイプ
pub const TAGGABLE_RESOURCE_TYPES: [&str; 3] =
    ["AWS::DynamoDB::Table", "AWS::Lambda::Function", "AWS::IAM::Role"];

/// リソースグラフのエラー型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// グラフに存在しないリソースへの参照
    #[error("未解決の依存関係: {from} -> {to}")]
    UnresolvedDependency { from: String, to: String },

    /// 論理IDの重複
    #[error("論理IDが重複しています: {0}")]
    DuplicateLogicalId(String),

    /// 依存関係の循環
    #[error("依存関係が循環しています: {0:?}")]
    DependencyCycle(Vec<String>),

    /// 指定リソースが存在しない
    #[error("リソースが存在しません: {0}")]
    MissingResource(String),

    /// ポリシードキュメントを持たないリソースへのステートメント追加
    #[error("ポリシーリソースではありません: {0}")]
    NotAPolicy(String),

    /// テンプレートのシリアライズ失敗
    #[error("テンプレートのシリアライズに失敗しました: {0}")]
    Serialize(String),
}

/// 削除/置換時の保持ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemovalPolicy {
    Retain,
    Delete,
}

/// グラフ上の1リソース
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    resource_type: String,
    properties: Map<String, Value>,
    policy_document: Option<PolicyDocument>,
    depends_on: BTreeSet<LogicalId>,
    removal_policy: Option<RemovalPolicy>,
    metadata: Map<String, Value>,
}

impl Resource {
    /// 指定タイプのリソースを作成
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            policy_document: None,
            depends_on: BTreeSet::new(),
            removal_policy: None,
            metadata: Map::new(),
        }
    }

    /// プロパティを設定
    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// `PolicyDocument`プロパティとして出力されるポリシーを設定
    pub fn policy_document(mut self, document: PolicyDocument) -> Self {
        self.policy_document = Some(document);
        self
    }

    /// 明示的な依存関係を追加
    pub fn depends_on(mut self, id: &LogicalId) -> Self {
        self.depends_on.insert(id.clone());
        self
    }

    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = Some(policy);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// プロパティ値を取得（ポリシードキュメントを含む）
    pub fn get_property(&self, key: &str) -> Option<Value> {
        if key == "PolicyDocument" {
            if let Some(document) = &self.policy_document {
                return Some(document.to_value());
            }
        }
        self.properties.get(key).cloned()
    }

    /// ポリシーステートメント一覧（ポリシーリソースのみ）
    pub fn policy_statements(&self) -> Option<&[PolicyStatement]> {
        self.policy_document.as_ref().map(PolicyDocument::statements)
    }

    pub fn explicit_dependencies(&self) -> &BTreeSet<LogicalId> {
        &self.depends_on
    }

    /// 出力プロパティの内容ハッシュ
    ///
    /// プロパティが1つでも変われば変わる。スタックタグは含まない。
    pub fn fingerprint(&self) -> String {
        let properties = Value::Object(self.rendered_properties());
        sha256_hex([self.resource_type.as_str(), properties.to_string().as_str()])
    }

    /// 出力時のプロパティ（ポリシードキュメントをマージ済み）
    fn rendered_properties(&self) -> Map<String, Value> {
        let mut properties = self.properties.clone();
        if let Some(document) = &self.policy_document {
            properties.insert("PolicyDocument".to_string(), document.to_value());
        }
        properties
    }

    /// プロパティ中の参照と明示的依存をあわせた依存先
    fn dependencies(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.depends_on.iter().map(|id| id.to_string()).collect();
        collect_references(&Value::Object(self.rendered_properties()), &mut out);
        out
    }

    fn to_template(&self, tags: &BTreeMap<String, String>) -> TemplateResource {
        let mut properties = self.rendered_properties();
        if !tags.is_empty() && TAGGABLE_RESOURCE_TYPES.contains(&self.resource_type.as_str()) {
            let tags: Vec<Value> = tags
                .iter()
                .map(|(key, value)| json!({ "Key": key, "Value": value }))
                .collect();
            properties.entry("Tags").or_insert(Value::Array(tags));
        }
        TemplateResource {
            resource_type: self.resource_type.clone(),
            properties,
            depends_on: self.depends_on.iter().map(|id| id.to_string()).collect(),
            update_replace_policy: self.removal_policy,
            deletion_policy: self.removal_policy,
            metadata: self.metadata.clone(),
        }
    }
}

/// テンプレート上のリソース表現
#[derive(Debug, Serialize)]
struct TemplateResource {
    #[serde(rename = "Type")]
    resource_type: String,
    #[serde(rename = "Properties", skip_serializing_if = "Map::is_empty")]
    properties: Map<String, Value>,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    update_replace_policy: Option<RemovalPolicy>,
    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    deletion_policy: Option<RemovalPolicy>,
    #[serde(rename = "Metadata", skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
}

/// テンプレート全体
#[derive(Debug, Serialize)]
struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    format_version: &'static str,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "Resources")]
    resources: BTreeMap<String, TemplateResource>,
}

/// リソースグラフ
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceGraph {
    description: Option<String>,
    tags: BTreeMap<String, String>,
    resources: BTreeMap<LogicalId, Resource>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// テンプレートの説明を設定
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// スタックタグを設定（同じキーは上書き）
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// リソースを追加
    ///
    /// # エラー
    /// 同じ論理IDが既に存在する場合は`GraphError::DuplicateLogicalId`
    pub fn add(&mut self, id: LogicalId, resource: Resource) -> Result<(), GraphError> {
        if self.resources.contains_key(&id) {
            return Err(GraphError::DuplicateLogicalId(id.to_string()));
        }
        debug!(
            logical_id = %id,
            resource_type = resource.resource_type(),
            "リソースを宣言"
        );
        self.resources.insert(id, resource);
        Ok(())
    }

    pub fn contains(&self, id: &LogicalId) -> bool {
        self.resources.contains_key(id)
    }

    /// リソースが存在することを要求する
    ///
    /// # エラー
    /// 存在しない場合は`from`からの未解決依存として報告する
    pub fn require(&self, from: &str, id: &LogicalId) -> Result<&Resource, GraphError> {
        self.resources
            .get(id)
            .ok_or_else(|| GraphError::UnresolvedDependency {
                from: from.to_string(),
                to: id.to_string(),
            })
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// ポリシーリソースにステートメントを追加する
    pub fn add_policy_statement(
        &mut self,
        policy_id: &LogicalId,
        statement: PolicyStatement,
    ) -> Result<(), GraphError> {
        let resource = self
            .resources
            .get_mut(policy_id)
            .ok_or_else(|| GraphError::MissingResource(policy_id.to_string()))?;
        let document = resource
            .policy_document
            .as_mut()
            .ok_or_else(|| GraphError::NotAPolicy(policy_id.to_string()))?;
        debug!(
            policy_id = %policy_id,
            actions = ?statement.action,
            "ポリシーステートメントを追加"
        );
        document.add_statement(statement);
        Ok(())
    }

    /// 明示的な依存関係を追加する
    pub fn add_dependency(&mut self, from: &LogicalId, to: &LogicalId) -> Result<(), GraphError> {
        let resource = self
            .resources
            .get_mut(from)
            .ok_or_else(|| GraphError::MissingResource(from.to_string()))?;
        resource.depends_on.insert(to.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// 指定タイプのリソース数
    pub fn count_of_type(&self, resource_type: &str) -> usize {
        self.resources
            .values()
            .filter(|r| r.resource_type == resource_type)
            .count()
    }

    /// 指定タイプのリソース一覧
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a LogicalId, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    /// 指定リソースの依存先（参照・明示的依存）
    pub fn dependencies_of(&self, id: &LogicalId) -> Result<BTreeSet<String>, GraphError> {
        self.resources
            .get(id)
            .map(Resource::dependencies)
            .ok_or_else(|| GraphError::MissingResource(id.to_string()))
    }

    /// 依存先が先に来るトポロジカル順序を返す
    ///
    /// 同順位は論理IDの辞書順で並べるため、同じグラフからは常に同じ順序が得られる。
    ///
    /// # エラー
    /// - 存在しないリソースへの参照: `GraphError::UnresolvedDependency`
    /// - 循環: `GraphError::DependencyCycle`（循環に含まれる論理ID）
    pub fn topological_order(&self) -> Result<Vec<LogicalId>, GraphError> {
        let by_name: BTreeMap<&str, &LogicalId> =
            self.resources.keys().map(|id| (id.as_str(), id)).collect();
        let mut in_degree: BTreeMap<&LogicalId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&LogicalId, Vec<&LogicalId>> = BTreeMap::new();

        for (id, resource) in &self.resources {
            let deps = resource.dependencies();
            in_degree.insert(id, deps.len());
            for dep in deps {
                let dep_id = by_name.get(dep.as_str()).ok_or_else(|| {
                    GraphError::UnresolvedDependency {
                        from: id.to_string(),
                        to: dep.clone(),
                    }
                })?;
                dependents.entry(*dep_id).or_default().push(id);
            }
        }

        let mut ready: BTreeSet<&LogicalId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.resources.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            if let Some(children) = dependents.get(id) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(child);
                        }
                    }
                }
            }
        }

        if order.len() != self.resources.len() {
            let cycle: Vec<String> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(GraphError::DependencyCycle(cycle));
        }

        Ok(order)
    }

    /// グラフを検証してCloudFormationテンプレート（JSON）に変換する
    pub fn synthesize(&self) -> Result<Value, GraphError> {
        let order = self.topological_order()?;
        debug!(resource_count = order.len(), "テンプレートを合成");

        let template = Template {
            format_version: TEMPLATE_FORMAT_VERSION,
            description: self.description.clone(),
            resources: self
                .resources
                .iter()
                .map(|(id, resource)| (id.to_string(), resource.to_template(&self.tags)))
                .collect(),
        };

        serde_json::to_value(template).map_err(|e| GraphError::Serialize(e.to_string()))
    }
}
