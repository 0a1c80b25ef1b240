//! 配置模块
//!
//! 环境变量解析与部署请求加载

pub mod env;
pub mod request;

pub use env::{EngineConfig, StrictSteps};
pub use request::DeployRequest;
