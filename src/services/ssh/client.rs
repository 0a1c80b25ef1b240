//! SSH 客户端实现 (russh)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tracing::{debug, info, warn};

use super::session::{Connector, ExecOutput, RemoteSession};
use crate::config::EngineConfig;
use crate::domain::{AuthMethod, ServerDescriptor};
use crate::error::{DeployError, RemoteError};
use crate::infra::shell;

/// 基于 russh 的连接器
#[derive(Clone, Debug)]
pub struct SshConnector {
    connect_timeout: Duration,
    inactivity_timeout: Duration,
    host_key_fingerprint: Option<String>,
}

impl SshConnector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            inactivity_timeout: config.command_timeout,
            host_key_fingerprint: config.host_key_fingerprint.clone(),
        }
    }

    async fn open(
        &self,
        server: &ServerDescriptor,
        auth: AuthMethod,
    ) -> Result<Handle<ClientHandler>, String> {
        let russh_config = Arc::new(client::Config {
            inactivity_timeout: Some(self.inactivity_timeout),
            ..Default::default()
        });

        let handler = ClientHandler {
            host: server.host.clone(),
            expected_fingerprint: self.host_key_fingerprint.clone(),
        };

        let mut handle = client::connect(russh_config, (server.host.as_str(), server.port), handler)
            .await
            .map_err(|e| e.to_string())?;

        let authenticated = match auth {
            AuthMethod::Password(password) => handle
                .authenticate_password(server.username.as_str(), password)
                .await
                .map_err(|e| e.to_string())?,
            AuthMethod::PrivateKey { key, passphrase } => {
                let key_pair = russh_keys::decode_secret_key(&key, passphrase.as_deref())
                    .map_err(|e| format!("invalid private key: {}", e))?;
                handle
                    .authenticate_publickey(server.username.as_str(), Arc::new(key_pair))
                    .await
                    .map_err(|e| e.to_string())?
            }
        };

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(format!("authentication rejected for user {}", server.username));
        }

        Ok(handle)
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, server: &ServerDescriptor) -> Result<Box<dyn RemoteSession>, DeployError> {
        let auth = server.auth_method()?;
        let method = auth.name();
        let connection_error = |message: String| DeployError::Connection {
            host: server.host.clone(),
            port: server.port,
            message,
        };

        debug!(host = %server.host, port = server.port, user = %server.username, method, "Opening SSH session");

        let handle = match tokio::time::timeout(self.connect_timeout, self.open(server, auth)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(message)) => return Err(connection_error(message)),
            Err(_) => {
                return Err(connection_error(format!(
                    "timed out after {:?}",
                    self.connect_timeout
                )))
            }
        };

        info!(host = %server.host, port = server.port, method, "SSH session established");

        Ok(Box::new(SshSession {
            handle,
            address: server.address(),
        }))
    }
}

/// 客户端回调：主机密钥校验
pub struct ClientHandler {
    host: String,
    expected_fingerprint: Option<String>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        if accepts(self.expected_fingerprint.as_deref(), &fingerprint) {
            debug!(host = %self.host, key_type = ?server_public_key.name(), fingerprint = %fingerprint, "Accepting SSH host key");
            Ok(true)
        } else {
            warn!(
                host = %self.host,
                expected = ?self.expected_fingerprint,
                actual = %fingerprint,
                "SSH host key fingerprint mismatch"
            );
            Ok(false)
        }
    }
}

/// 主机密钥指纹校验：未固定时接受任何密钥，固定值可带 `SHA256:` 前缀
fn accepts(expected: Option<&str>, actual: &str) -> bool {
    match expected.map(str::trim) {
        None | Some("") => true,
        Some(expected) => {
            let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
            let actual = actual.strip_prefix("SHA256:").unwrap_or(actual);
            expected == actual
        }
    }
}

/// russh 会话
pub struct SshSession {
    handle: Handle<ClientHandler>,
    address: String,
}

impl SshSession {
    /// 读取通道直到关闭，收集 stdout / stderr / 退出码
    async fn collect(channel: &mut Channel<Msg>) -> Result<ExecOutput, RemoteError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    stderr.extend_from_slice(format!("terminated by signal {:?}", signal_name).as_bytes());
                    exit_code = Some(-1);
                }
                _ => {}
            }
        }

        let exit_code = exit_code.ok_or(RemoteError::Closed)?;
        Ok(ExecOutput::new(
            exit_code,
            String::from_utf8_lossy(&stdout),
            String::from_utf8_lossy(&stderr),
        ))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&mut self, command: &str) -> Result<ExecOutput, RemoteError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        Self::collect(&mut channel).await
    }

    async fn transfer(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let read_error = |source| RemoteError::Transfer {
            local: local.to_path_buf(),
            source,
        };
        // 流式发送，不把整个文件读进内存
        let file = tokio::fs::File::open(local).await.map_err(read_error)?;
        let size = file.metadata().await.map_err(read_error)?.len();

        debug!(address = %self.address, local = %local.display(), remote = %remote, size, "Uploading file");

        let mut channel = self.handle.channel_open_session().await?;
        channel
            .exec(true, format!("cat > {}", shell::quote(remote)))
            .await?;
        channel.data(file).await?;
        channel.eof().await?;

        let output = Self::collect(&mut channel).await?;
        if !output.success() {
            return Err(RemoteError::Exit {
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        debug!(address = %self.address, "SSH session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINGERPRINT: &str = "nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8";

    #[test]
    fn test_unpinned_accepts_any_key() {
        assert!(accepts(None, FINGERPRINT));
        assert!(accepts(Some("  "), FINGERPRINT));
    }

    #[test]
    fn test_pinned_fingerprint_matches() {
        assert!(accepts(Some(FINGERPRINT), FINGERPRINT));
        assert!(accepts(Some(format!("SHA256:{}", FINGERPRINT).as_str()), FINGERPRINT));
    }

    #[test]
    fn test_pinned_fingerprint_mismatch_rejects() {
        assert!(!accepts(Some("SHA256:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"), FINGERPRINT));
        assert!(!accepts(Some("SHA256:"), FINGERPRINT));
    }

    #[test]
    fn test_connector_takes_timeouts_from_config() {
        let config = EngineConfig {
            connect_timeout: Duration::from_secs(3),
            command_timeout: Duration::from_secs(42),
            host_key_fingerprint: Some(FINGERPRINT.to_string()),
            ..EngineConfig::default()
        };
        let connector = SshConnector::new(&config);

        assert_eq!(connector.connect_timeout, Duration::from_secs(3));
        assert_eq!(connector.inactivity_timeout, Duration::from_secs(42));
        assert_eq!(connector.host_key_fingerprint.as_deref(), Some(FINGERPRINT));
    }
}
