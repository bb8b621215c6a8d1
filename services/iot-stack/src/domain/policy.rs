/// IAMポリシードキュメント
///
/// 実行ロールに付与する許可ステートメントを型で表現する。
/// リソースはARN文字列またはCloudFormation組み込み関数（JSON値）で指定する。
use serde_json::Value;

/// IAMポリシー言語のバージョン
pub const POLICY_VERSION: &str = "2012-10-17";

/// ステートメントの効果（このスタックは許可のみを宣言する）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
        }
    }
}

/// ポリシーステートメント
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub action: Vec<String>,
    pub resource: Vec<Value>,
}

impl PolicyStatement {
    /// Allowステートメントを作成
    pub fn allow<A, I>(actions: I, resources: Vec<Value>) -> Self
    where
        A: Into<String>,
        I: IntoIterator<Item = A>,
    {
        Self {
            effect: Effect::Allow,
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources,
        }
    }

    /// 指定アクションを含むかどうか
    pub fn has_action(&self, action: &str) -> bool {
        self.action.iter().any(|a| a == action)
    }

    /// CloudFormationテンプレート上のJSON表現
    ///
    /// 単一要素のAction/Resourceは配列ではなくスカラーで出力する。
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "Action".to_string(),
            collapse(self.action.iter().cloned().map(Value::String).collect()),
        );
        map.insert("Effect".to_string(), Value::String(self.effect.as_str().to_string()));
        map.insert("Resource".to_string(), collapse(self.resource.clone()));
        Value::Object(map)
    }
}

fn collapse(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// ポリシードキュメント
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDocument {
    statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self { statements }
    }

    /// ステートメントを追加（付与は追加のみ）
    pub fn add_statement(&mut self, statement: PolicyStatement) {
        self.statements.push(statement);
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// CloudFormationテンプレート上のJSON表現
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "Statement": self.statements.iter().map(PolicyStatement::to_value).collect::<Vec<_>>(),
            "Version": POLICY_VERSION,
        })
    }
}
