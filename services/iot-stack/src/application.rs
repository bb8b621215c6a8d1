// アプリケーション層モジュール
pub mod function_construct;
pub mod grants;
pub mod stack_builder;
pub mod stack_error;
pub mod synth_handler;
pub mod table_construct;

// 再エクスポート
pub use function_construct::{declare_function, ComputeHandle, FunctionTables};
pub use grants::{add_dynamo_event_source, grant_read_data, grant_stream_read, StartingPosition};
pub use stack_builder::{
    build_stack, build_stack_with_options, stack_tags, IotEventsStack, StackAssets, StackOptions,
};
pub use stack_error::StackError;
pub use synth_handler::{SynthError, SynthHandler, SynthRequest};
pub use table_construct::{declare_table, TableHandle};
