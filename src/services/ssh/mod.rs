//! SSH 会话模块
//!
//! 打开并认证远程命令执行会话，保证在所有退出路径上释放

mod client;
mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{SshConnector, SshSession};
pub use session::{Connector, ExecOutput, RemoteSession, SessionGuard};
