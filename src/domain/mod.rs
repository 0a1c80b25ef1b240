//! 领域模型模块
//!
//! 纯数据结构，不依赖 russh/tokio

pub mod deploy;
pub mod project;
pub mod server;

// Re-exports for convenience
pub use deploy::{
    Advisory, DeployOutcome, DeployPhase, DeployStage, DeployStatus, DeployStep, LogLine,
    ProjectStatus, StageStatus, StepOutcome,
};
pub use project::{ProjectDescriptor, ProjectType, SourceMode};
pub use server::{AuthMethod, ServerDescriptor};
