/// スタック合成ツール
///
/// 対象環境のIoTイベント処理スタックを合成し、テンプレートを提出する。
///
/// # 処理フロー
/// 1. 構造化ログを初期化
/// 2. 環境変数から設定を読み込み
/// 3. 環境コンテキストを解決してスタックを構築・合成
/// 4. 設定された提出先（ファイルまたはCloudFormation）に提出
///
/// いずれかの段階で失敗した場合は非ゼロで終了し、何も提出しない。
use iot_stack::application::{StackAssets, SynthError, SynthHandler, SynthRequest};
use iot_stack::infrastructure::{
    init_logging, AwsCloudFormationOps, CloudFormationSink, FileTemplateSink, SubmitResult,
    SynthConfig, SynthTarget, TemplateSink,
};
use tracing::{error, info};

type Error = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let config = SynthConfig::from_env().inspect_err(|err| {
        error!(error = %err, "合成設定の読み込みに失敗");
    })?;

    info!(
        environment = config.environment(),
        stack_name = config.stack_name(),
        output_dir = %config.output_dir().display(),
        target = %config.target(),
        "合成設定を読み込み"
    );

    let request = SynthRequest {
        environment: config.environment().to_string(),
        stack_name: config.stack_name().to_string(),
        assets: StackAssets {
            function_code_dir: config.function_code_dir().to_string(),
            layer_code_dir: config.layer_code_dir().to_string(),
        },
    };

    let result = match config.target() {
        SynthTarget::File => run(FileTemplateSink::new(config.output_dir()), &request).await,
        SynthTarget::CloudFormation => {
            let ops = AwsCloudFormationOps::from_config().await;
            run(CloudFormationSink::new(ops), &request).await
        }
    };

    match result {
        Ok(result) => {
            info!(
                stack_name = %result.stack_name,
                action = result.action.as_str(),
                location = %result.location,
                "合成完了"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "合成失敗");
            Err(err.into())
        }
    }
}

async fn run<S: TemplateSink>(sink: S, request: &SynthRequest) -> Result<SubmitResult, SynthError> {
    SynthHandler::new(sink).handle(request).await
}
