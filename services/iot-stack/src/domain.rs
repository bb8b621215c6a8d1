// Domain layer modules
pub mod compute_spec;
pub mod digest;
pub mod environment;
pub mod intrinsic;
pub mod logical_id;
pub mod policy;
pub mod resource_graph;
pub mod table_spec;

// Re-exports
pub use compute_spec::{
    asset_object_key, Architecture, AssetCode, AssetError, ComputeSpec, RetentionDays, Runtime,
    TracingMode,
};
pub use environment::{resolve, ConfigurationError, Environment, EnvironmentContext};
pub use logical_id::{LogicalId, LogicalIdError};
pub use policy::{Effect, PolicyDocument, PolicyStatement};
pub use resource_graph::{GraphError, RemovalPolicy, Resource, ResourceGraph};
pub use table_spec::{SpecError, StreamViewType, TableEncryption, TableSpec};
