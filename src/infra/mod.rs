//! 基础设施模块
//!
//! 远程命令拼装与执行边界

pub mod command;
pub mod shell;

pub use command::CommandRunner;
