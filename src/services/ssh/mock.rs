//! 测试用的脚本化会话

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::session::{Connector, ExecOutput, RemoteSession};
use crate::domain::ServerDescriptor;
use crate::error::{DeployError, RemoteError};

#[derive(Clone)]
enum Reply {
    Output(ExecOutput),
    Fail(String),
    Hang,
}

#[derive(Clone)]
struct Rule {
    pattern: String,
    reply: Reply,
}

/// 共享的调用记录
#[derive(Clone, Default)]
pub struct MockProbe {
    commands: Arc<Mutex<Vec<String>>>,
    transfers: Arc<Mutex<Vec<(PathBuf, String)>>>,
    closes: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

impl MockProbe {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn transfers(&self) -> Vec<(PathBuf, String)> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// 包含 `needle` 的第一条命令的位置
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(needle))
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.position(needle).is_some()
    }
}

/// 按子串匹配回复的会话；没有匹配的命令以退出码 0 成功
#[derive(Clone, Default)]
pub struct MockSession {
    rules: Vec<Rule>,
    fail_transfer: bool,
    probe: MockProbe,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 匹配 `pattern` 的命令以 `exit_code` 退出
    pub fn on(mut self, pattern: &str, exit_code: i32) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Output(ExecOutput::new(exit_code, "", "")),
        });
        self
    }

    pub fn on_output(mut self, pattern: &str, output: ExecOutput) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Output(output),
        });
        self
    }

    /// 匹配 `pattern` 的命令永不返回
    pub fn hang_on(mut self, pattern: &str) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Hang,
        });
        self
    }

    /// 匹配 `pattern` 的命令返回通道错误
    pub fn fail_on(mut self, pattern: &str, message: &str) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Fail(message.to_string()),
        });
        self
    }

    pub fn fail_transfer(mut self) -> Self {
        self.fail_transfer = true;
        self
    }

    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn execute(&mut self, command: &str) -> Result<ExecOutput, RemoteError> {
        self.probe.commands.lock().unwrap().push(command.to_string());
        let reply = self
            .rules
            .iter()
            .find(|rule| command.contains(&rule.pattern))
            .map(|rule| rule.reply.clone());
        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Fail(message)) => Err(RemoteError::Channel(message)),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(ExecOutput::default()),
        }
    }

    async fn transfer(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        if self.fail_transfer {
            return Err(RemoteError::Channel("sftp subsystem unavailable".to_string()));
        }
        self.probe
            .transfers
            .lock()
            .unwrap()
            .push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 每次连接都克隆同一个脚本化会话（共享同一份记录）
pub struct MockConnector {
    session: MockSession,
    refuse: Option<String>,
}

impl MockConnector {
    pub fn new(session: MockSession) -> Self {
        Self { session, refuse: None }
    }

    pub fn refusing(message: &str) -> Self {
        Self {
            session: MockSession::new(),
            refuse: Some(message.to_string()),
        }
    }

    pub fn probe(&self) -> MockProbe {
        self.session.probe()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, server: &ServerDescriptor) -> Result<Box<dyn RemoteSession>, DeployError> {
        self.session.probe.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.refuse {
            return Err(DeployError::Connection {
                host: server.host.clone(),
                port: server.port,
                message: message.clone(),
            });
        }
        Ok(Box::new(self.session.clone()))
    }
}
