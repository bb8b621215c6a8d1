// Lambda関数定義
//
// 関数名・レイヤー名・エイリアス名・通知先トピックとコードアセットを保持する。
// ランタイム・アーキテクチャ・タイムアウト・トレーシング・ログ保持期間は固定値。

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::digest::sha256_hex;
use super::environment::EnvironmentContext;
use super::table_spec::SpecError;

// ===========================================
// 固定パラメータ
// ===========================================

/// 関数タイムアウト（秒、1分）
pub const FUNCTION_TIMEOUT_SECS: u32 = 60;

/// ハンドラー（モジュール.関数）
pub const FUNCTION_HANDLER: &str = "iot_events_handler.lambda_handler";

/// ハンドラーのソースファイル（コードアセットに含める唯一のファイル）
pub const FUNCTION_SOURCE_FILE: &str = "iot_events_handler.py";

/// 関数の説明
pub const FUNCTION_DESCRIPTION: &str = "IoT Events Handler Lambda Function";

/// レイヤーのライセンス情報
pub const LAYER_LICENSE: &str = "Assignment Purpose";

/// 関数コードのデフォルトアセットディレクトリ
pub const DEFAULT_FUNCTION_CODE_DIR: &str = "src/lambda";

/// レイヤーのデフォルトアセットディレクトリ
pub const DEFAULT_LAYER_CODE_DIR: &str = "src/lambda_layer";

// ===========================================
// 関数に渡す環境変数名
// ===========================================

pub const ENV_REFERENCE_TABLE_NAME: &str = "REFERENCE_TABLE_NAME";
pub const ENV_VEHICLE_TABLE_NAME: &str = "VEHICLE_TABLE_NAME";
pub const ENV_DEVICE_TABLE_NAME: &str = "DEVICE_TABLE_NAME";
pub const ENV_SNS_ARN: &str = "SNS_ARN";

// ===========================================
// 列挙型
// ===========================================

/// 関数ランタイム
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Runtime {
    #[default]
    Python39,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Python39 => "python3.9",
        }
    }
}

/// 命令セットアーキテクチャ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Architecture {
    #[default]
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Arm64 => "arm64",
        }
    }
}

/// X-Rayトレーシングモード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingMode {
    #[default]
    Active,
}

impl TracingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TracingMode::Active => "Active",
        }
    }
}

/// ロググループの保持期間
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionDays {
    #[default]
    OneWeek,
}

impl RetentionDays {
    pub fn days(&self) -> u32 {
        match self {
            RetentionDays::OneWeek => 7,
        }
    }
}

// ===========================================
// AssetCode
// ===========================================

/// コードアセットのエラー型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("アセットディレクトリが見つかりません: {0}")]
    NotFound(String),

    #[error("アセットの読み込みに失敗しました: {path}: {message}")]
    Io { path: String, message: String },

    #[error("アセットにバンドル対象のファイルがありません: {0}")]
    Empty(String),
}

/// ローカルディレクトリのコードアセット
///
/// アセットのS3への発行はプロビジョニング側の責務。
/// テンプレートにはブートストラップバケット上のキーとパスのメタデータを出力する。
/// キーはバンドル対象ファイルの内容ハッシュなので、コードが変われば必ず変わる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetCode {
    path: String,
    include_only: Option<String>,
}

impl AssetCode {
    pub fn from_dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            include_only: None,
        }
    }

    /// 指定ファイル以外を除外する
    pub fn include_only(mut self, file_name: impl Into<String>) -> Self {
        self.include_only = Some(file_name.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// バンドル対象外とするパターン
    pub fn exclude_patterns(&self) -> Vec<String> {
        match &self.include_only {
            Some(file) => vec!["**".to_string(), format!("!{}", file)],
            None => Vec::new(),
        }
    }

    /// バンドル対象ファイルの内容ハッシュ
    ///
    /// ディレクトリ相対パス（`/`区切り）の昇順に、パスと内容を連結してハッシュする。
    /// 除外されたファイルの変更はハッシュに影響しない。
    ///
    /// # エラー
    /// - ディレクトリが存在しない: `AssetError::NotFound`
    /// - 対象ファイルが1つもない: `AssetError::Empty`
    pub fn fingerprint(&self) -> Result<String, AssetError> {
        let root = Path::new(&self.path);
        if !root.is_dir() {
            return Err(AssetError::NotFound(self.path.clone()));
        }

        let mut files = Vec::new();
        collect_files(root, root, &mut files)?;
        files.retain(|(relative, _)| match &self.include_only {
            Some(file) => relative == file,
            None => true,
        });
        if files.is_empty() {
            return Err(AssetError::Empty(self.path.clone()));
        }
        files.sort();

        let mut parts = Vec::with_capacity(files.len() * 2);
        for (relative, path) in files {
            let contents = fs::read(&path).map_err(|err| io_error(&path, err))?;
            parts.push(relative.into_bytes());
            parts.push(contents);
        }
        Ok(sha256_hex(parts))
    }
}

/// 内容ハッシュからブートストラップバケット上のオブジェクトキーを作る
pub fn asset_object_key(fingerprint: &str) -> String {
    format!("{}.zip", fingerprint)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    files: &mut Vec<(String, PathBuf)>,
) -> Result<(), AssetError> {
    let entries = fs::read_dir(dir).map_err(|err| io_error(dir, err))?;
    for entry in entries {
        let path = entry.map_err(|err| io_error(dir, err))?.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else if path.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((relative, path));
        }
    }
    Ok(())
}

fn io_error(path: &Path, err: std::io::Error) -> AssetError {
    AssetError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

// ===========================================
// ComputeSpec
// ===========================================

/// Lambda関数定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeSpec {
    function_name: String,
    layer_name: String,
    alias_name: String,
    sns_topic_arn: String,
    code: AssetCode,
    layer_code: AssetCode,
    runtime: Runtime,
    architecture: Architecture,
    tracing: TracingMode,
    log_retention: RetentionDays,
}

impl ComputeSpec {
    /// 関数定義を作成
    ///
    /// # エラー
    /// 名前・トピックARNのいずれかが空の場合
    pub fn new(
        function_name: impl Into<String>,
        layer_name: impl Into<String>,
        alias_name: impl Into<String>,
        sns_topic_arn: impl Into<String>,
    ) -> Result<Self, SpecError> {
        let spec = Self {
            function_name: function_name.into(),
            layer_name: layer_name.into(),
            alias_name: alias_name.into(),
            sns_topic_arn: sns_topic_arn.into(),
            code: AssetCode::from_dir(DEFAULT_FUNCTION_CODE_DIR).include_only(FUNCTION_SOURCE_FILE),
            layer_code: AssetCode::from_dir(DEFAULT_LAYER_CODE_DIR),
            runtime: Runtime::default(),
            architecture: Architecture::default(),
            tracing: TracingMode::default(),
            log_retention: RetentionDays::default(),
        };

        for (field, value) in [
            ("function_name", &spec.function_name),
            ("layer_name", &spec.layer_name),
            ("alias_name", &spec.alias_name),
            ("sns_topic_arn", &spec.sns_topic_arn),
        ] {
            if value.trim().is_empty() {
                return Err(SpecError::EmptyField(field));
            }
        }

        Ok(spec)
    }

    /// 環境コンテキストから関数定義を作成
    pub fn from_context(context: &EnvironmentContext) -> Result<Self, SpecError> {
        Self::new(
            context.lambda_function_name.clone(),
            context.lambda_layer_name.clone(),
            context.lambda_alias_name.clone(),
            context.sns_topic_arn.clone(),
        )
    }

    /// コードアセットのディレクトリを差し替える
    pub fn with_code_dirs(mut self, code_dir: impl Into<String>, layer_dir: impl Into<String>) -> Self {
        self.code = AssetCode::from_dir(code_dir).include_only(FUNCTION_SOURCE_FILE);
        self.layer_code = AssetCode::from_dir(layer_dir);
        self
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn alias_name(&self) -> &str {
        &self.alias_name
    }

    pub fn sns_topic_arn(&self) -> &str {
        &self.sns_topic_arn
    }

    pub fn code(&self) -> &AssetCode {
        &self.code
    }

    pub fn layer_code(&self) -> &AssetCode {
        &self.layer_code
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn tracing(&self) -> TracingMode {
        self.tracing
    }

    pub fn log_retention(&self) -> RetentionDays {
        self.log_retention
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::domain::environment::Environment;
    use tempfile::TempDir;

    /// 関数コードとレイヤーのアセットを一時ディレクトリに用意する
    pub struct AssetFixture {
        dir: TempDir,
    }

    impl AssetFixture {
        pub fn new() -> Self {
            let fixture = Self {
                dir: TempDir::new().unwrap(),
            };
            fixture.write_code_file(FUNCTION_SOURCE_FILE, "def lambda_handler(event, context):\n    return None\n");
            fixture.write_code_file("README.md", "local notes\n");
            fixture.write_layer_file("python/events_common.py", "TABLES = ()\n");
            fixture
        }

        pub fn code_dir(&self) -> String {
            self.dir.path().join("lambda").display().to_string()
        }

        pub fn layer_dir(&self) -> String {
            self.dir.path().join("lambda_layer").display().to_string()
        }

        /// ハンドラーのソースを書き換える
        pub fn write_handler(&self, contents: &str) {
            self.write_code_file(FUNCTION_SOURCE_FILE, contents);
        }

        pub fn write_code_file(&self, relative: &str, contents: &str) {
            write_file(&Path::new(&self.code_dir()).join(relative), contents);
        }

        pub fn write_layer_file(&self, relative: &str, contents: &str) {
            write_file(&Path::new(&self.layer_dir()).join(relative), contents);
        }

        /// フィクスチャのアセットを使う関数定義
        pub fn spec(&self) -> ComputeSpec {
            ComputeSpec::from_context(&Environment::Dev.context())
                .unwrap()
                .with_code_dirs(self.code_dir(), self.layer_dir())
        }
    }

    fn write_file(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_from_context_uses_fixed_runtime_parameters() {
        let spec = ComputeSpec::from_context(&Environment::Dev.context()).unwrap();

        assert_eq!(spec.function_name(), "events-handler-lambda-function");
        assert_eq!(spec.layer_name(), "events-handler-lambda-layer");
        assert_eq!(spec.alias_name(), "events-handler-lambda-alias");
        assert_eq!(spec.runtime().as_str(), "python3.9");
        assert_eq!(spec.architecture().as_str(), "arm64");
        assert_eq!(spec.tracing().as_str(), "Active");
        assert_eq!(spec.log_retention().days(), 7);
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = ComputeSpec::new("fn", "", "alias", "arn:aws:sns:ap-south-1:1:t");
        assert_eq!(result, Err(SpecError::EmptyField("layer_name")));
    }

    #[test]
    fn test_default_assets() {
        let spec = ComputeSpec::new("fn", "layer", "alias", "arn").unwrap();
        assert_eq!(spec.code().path(), "src/lambda");
        assert_eq!(
            spec.code().exclude_patterns(),
            vec!["**".to_string(), "!iot_events_handler.py".to_string()]
        );
        assert_eq!(spec.layer_code().path(), "src/lambda_layer");
        assert!(spec.layer_code().exclude_patterns().is_empty());
    }

    #[test]
    fn test_with_code_dirs() {
        let spec = ComputeSpec::new("fn", "layer", "alias", "arn")
            .unwrap()
            .with_code_dirs("/opt/app/lambda", "/opt/app/layer");
        assert_eq!(spec.code().path(), "/opt/app/lambda");
        assert_eq!(spec.layer_code().path(), "/opt/app/layer");
    }

    #[test]
    fn test_fingerprint_changes_with_handler_contents() {
        let assets = AssetFixture::new();
        let spec = assets.spec();
        let before = spec.code().fingerprint().unwrap();

        assets.write_handler("def lambda_handler(event, context):\n    return 1\n");
        let after = spec.code().fingerprint().unwrap();

        assert_ne!(before, after);
        assert_eq!(asset_object_key(&after), format!("{}.zip", after));
        assert_ne!(asset_object_key(&before), asset_object_key(&after));
    }

    #[test]
    fn test_fingerprint_ignores_excluded_files() {
        let assets = AssetFixture::new();
        let spec = assets.spec();
        let before = spec.code().fingerprint().unwrap();

        assets.write_code_file("README.md", "changed notes\n");
        assets.write_code_file("tests/test_handler.py", "assert True\n");

        assert_eq!(spec.code().fingerprint().unwrap(), before);
    }

    #[test]
    fn test_layer_fingerprint_covers_nested_files() {
        let assets = AssetFixture::new();
        let spec = assets.spec();
        let before = spec.layer_code().fingerprint().unwrap();

        assets.write_layer_file("python/lib/helpers.py", "VALUE = 1\n");

        assert_ne!(spec.layer_code().fingerprint().unwrap(), before);
    }

    #[test]
    fn test_fingerprint_is_independent_of_location() {
        let first = AssetFixture::new();
        let second = AssetFixture::new();
        assert_ne!(first.code_dir(), second.code_dir());
        assert_eq!(
            first.spec().code().fingerprint().unwrap(),
            second.spec().code().fingerprint().unwrap()
        );
    }

    #[test]
    fn test_missing_directory() {
        let asset = AssetCode::from_dir("/nonexistent/lambda");
        assert_eq!(
            asset.fingerprint(),
            Err(AssetError::NotFound("/nonexistent/lambda".to_string()))
        );
    }

    #[test]
    fn test_missing_included_file_is_empty() {
        let assets = AssetFixture::new();
        let asset = AssetCode::from_dir(assets.code_dir()).include_only("other_handler.py");
        assert_eq!(asset.fingerprint(), Err(AssetError::Empty(assets.code_dir())));
    }
}
