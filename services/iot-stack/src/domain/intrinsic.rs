//! CloudFormation組み込み関数
//!
//! `Ref`・`Fn::GetAtt`・`Fn::Join`・`Fn::Sub`のJSON表現を生成し、
//! プロパティツリーから他リソースへの参照を抽出する。

use std::collections::BTreeSet;

use serde_json::{json, Value};

use super::logical_id::LogicalId;

/// 擬似パラメータ: リージョン
pub const AWS_REGION: &str = "AWS::Region";
/// 擬似パラメータ: アカウントID
pub const AWS_ACCOUNT_ID: &str = "AWS::AccountId";
/// 擬似パラメータ: パーティション
pub const AWS_PARTITION: &str = "AWS::Partition";

/// `{"Ref": <logical id>}`
pub fn ref_to(id: &LogicalId) -> Value {
    json!({ "Ref": id.as_str() })
}

/// `{"Ref": "AWS::..."}`
pub fn pseudo(name: &str) -> Value {
    json!({ "Ref": name })
}

/// `{"Fn::GetAtt": [<logical id>, <attribute>]}`
pub fn get_att(id: &LogicalId, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id.as_str(), attribute] })
}

/// `{"Fn::Join": [<delimiter>, [...]]}`
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// `{"Fn::Sub": <template>}`
pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// リージョン・アカウントを埋め込んだARNを組み立てる
///
/// `regional_arn("logs", "log-group:/aws/lambda/*")` →
/// `arn:aws:logs:<region>:<account>:log-group:/aws/lambda/*`
pub fn regional_arn(service: &str, resource: &str) -> Value {
    join(
        "",
        vec![
            json!(format!("arn:aws:{service}:")),
            pseudo(AWS_REGION),
            json!(":"),
            pseudo(AWS_ACCOUNT_ID),
            json!(format!(":{resource}")),
        ],
    )
}

/// 値の中に含まれる他リソースへの参照（論理ID）を収集する
///
/// `AWS::`で始まる擬似パラメータは対象外。
pub fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    push_target(target, out);
                    return;
                }
                if let Some(att) = map.get("Fn::GetAtt") {
                    match att {
                        Value::Array(items) => {
                            if let Some(Value::String(target)) = items.first() {
                                push_target(target, out);
                            }
                        }
                        Value::String(dotted) => {
                            if let Some(target) = dotted.split('.').next() {
                                push_target(target, out);
                            }
                        }
                        _ => {}
                    }
                    return;
                }
                if let Some(template) = map.get("Fn::Sub") {
                    match template {
                        Value::String(s) => collect_sub_references(s, out),
                        // [テンプレート, 変数マップ] 形式: マップのキーはローカル変数
                        Value::Array(items) => {
                            let variables = items.get(1).and_then(Value::as_object);
                            if let Some(Value::String(s)) = items.first() {
                                let mut names = BTreeSet::new();
                                collect_sub_references(s, &mut names);
                                out.extend(names.into_iter().filter(|name| {
                                    variables.is_none_or(|vars| !vars.contains_key(name))
                                }));
                            }
                            if let Some(vars) = variables {
                                for v in vars.values() {
                                    collect_references(v, out);
                                }
                            }
                        }
                        _ => {}
                    }
                    return;
                }
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

fn push_target(target: &str, out: &mut BTreeSet<String>) {
    if !target.starts_with("AWS::") {
        out.insert(target.to_string());
    }
}

fn collect_sub_references(template: &str, out: &mut BTreeSet<String>) {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        // ${!Literal} はエスケープ
        if !name.starts_with('!') {
            if let Some(target) = name.split('.').next() {
                push_target(target, out);
            }
        }
        rest = &after[end + 1..];
    }
}
