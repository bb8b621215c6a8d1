// Infrastructure layer modules
pub mod cloudformation_ops;
pub mod config;
pub mod logging;
pub mod template_sink;

// Re-exports
pub use cloudformation_ops::{AwsCloudFormationOps, CloudFormationOps, CloudFormationSink, StackUpdate};
pub use config::{SynthConfig, SynthConfigError, SynthTarget};
pub use logging::init_logging;
pub use template_sink::{FileTemplateSink, SinkError, SubmitAction, SubmitResult, TemplateSink};
