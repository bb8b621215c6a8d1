/// ログ基盤モジュール
///
/// 合成ツール向けの構造化ログ設定を提供する。
/// tracingクレートを使用し、JSON形式での出力をサポートする。
use std::sync::Once;

use tracing::Subscriber;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::{Layer, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログサブスクライバー初期化用の同期プリミティブ
static INIT: Once = Once::new();

/// ログサブスクライバーを初期化する
///
/// JSON形式での構造化ログ出力を設定し、環境変数`RUST_LOG`または
/// デフォルトのログレベル（info）でフィルタリングを行う。
/// ログは標準エラー出力に書き出す。
///
/// この関数は複数回呼び出しても安全で、最初の呼び出しのみ初期化を実行する。
///
/// # 使用例
/// ```ignore
/// use iot_stack::infrastructure::init_logging;
///
/// init_logging();
/// tracing::info!("synth started");
/// ```
pub fn init_logging() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer(std::io::stderr))
            .init();
    });
}

/// 1イベント1行のJSONレイヤー（イベントのフィールドはトップレベルに展開）
fn json_layer<S, W>(make_writer: W) -> Layer<S, JsonFields, Format<Json>, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_writer(make_writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .flatten_event(true)
        .with_current_span(false)
}

/// テスト用のログサブスクライバーを初期化する（人間が読みやすい形式）
///
/// # 注意
/// この関数はテスト専用であり、本番環境では`init_logging`を使用すること。
#[cfg(test)]
pub fn init_test_logging() {
    static TEST_INIT: Once = Once::new();

    TEST_INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use crate::application::table_construct::declare_table;
    use crate::domain::{ResourceGraph, StreamViewType, TableSpec};

    /// 書き込まれたログを保持するライター
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl CapturedLogs {
        /// 1行ずつJSONとしてパースする
        fn events(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }

        fn find(&self, message: &str) -> Value {
            self.events()
                .into_iter()
                .find(|event| event["message"] == json!(message))
                .unwrap_or_else(|| panic!("log not found: {}", message))
        }
    }

    fn capture<F: FnOnce()>(f: F) -> CapturedLogs {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::registry().with(json_layer(logs.clone()));
        tracing::subscriber::with_default(subscriber, f);
        logs
    }

    #[test]
    fn test_init_logging_idempotent() {
        init_test_logging();
        init_test_logging();
    }

    #[test]
    fn test_declaration_is_logged_as_flat_json() {
        let logs = capture(|| {
            let mut graph = ResourceGraph::new();
            declare_table(
                &mut graph,
                "dynamodbDeviceTable",
                &TableSpec::new("device_table", "device_mac_address")
                    .unwrap()
                    .with_stream(StreamViewType::NewImage),
            )
            .unwrap();
        });

        let event = logs.find("DynamoDBテーブルを宣言");
        assert_eq!(event["level"], json!("INFO"));
        assert_eq!(
            event["logical_id"],
            json!("dynamodbDeviceTabledevicetabledynamodbLogicalId")
        );
        assert_eq!(event["table_name"], json!("device_table"));
        assert_eq!(event["partition_key"], json!("device_mac_address"));
        assert_eq!(event["stream"], json!("NEW_IMAGE"));
        assert_eq!(event["target"], json!("iot_stack::application::table_construct"));
        assert!(event["filename"].as_str().unwrap().ends_with("table_construct.rs"));
        assert!(event["line_number"].is_u64());
        assert!(event.get("fields").is_none());
    }

    #[test]
    fn test_one_line_per_event() {
        let logs = capture(|| {
            tracing::info!(stack_name = "IotEventsHandlerStack", "スタック構築開始");
            tracing::warn!(error = "Rate exceeded", "CreateStackエラー");
        });

        let events = logs.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["stack_name"], json!("IotEventsHandlerStack"));
        assert_eq!(events[1]["level"], json!("WARN"));
        assert_eq!(events[1]["error"], json!("Rate exceeded"));
    }

    #[test]
    fn test_current_span_is_not_emitted() {
        let logs = capture(|| {
            let span = tracing::info_span!("synth", environment = "dev");
            let _guard = span.enter();
            tracing::info!("スタック構築開始");
        });

        let event = logs.find("スタック構築開始");
        assert!(event.get("span").is_none());
    }
}
