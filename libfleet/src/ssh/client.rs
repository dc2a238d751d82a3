//! [`SshTransport`] on top of thrussh.

use std::sync::Arc;

use async_trait::async_trait;
use thrussh::client::{self, Channel, Handle};
use thrussh::ChannelMsg;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use super::{ExecOutput, RemoteSession, SshTransport};
use crate::error::HostError;
use crate::inventory::{Endpoint, HostKeyPolicy, Port};
use crate::log::*;

const TUNNEL_BUFFER_SIZE: usize = 64 * 1024;

/// Connects with thrussh, authenticating by password.
#[derive(Clone)]
pub struct ThrusshTransport {
    config: Arc<client::Config>,
}

impl ThrusshTransport {
    pub fn new(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for ThrusshTransport {
    fn default() -> Self {
        Self::new(client::Config::default())
    }
}

impl std::fmt::Debug for ThrusshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrusshTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl SshTransport for ThrusshTransport {
    type Session = ThrusshSession;

    #[tracing::instrument(skip(self, policy), fields(endpoint = %endpoint))]
    async fn connect(
        &self,
        endpoint: &Endpoint,
        policy: &HostKeyPolicy,
    ) -> Result<ThrusshSession, HostError> {
        let handler = ClientHandler::new(endpoint, policy);
        let addr = (endpoint.host().as_str(), *endpoint.port());
        let handle = client::connect(self.config.clone(), addr, handler).await?;
        let handle = authenticate(handle, endpoint).await?;
        debug!("authenticated");
        Ok(ThrusshSession {
            handle,
            name: endpoint.to_string(),
            tunnel: None,
        })
    }

    #[tracing::instrument(skip(self, via, policy), fields(endpoint = %endpoint, via = %via.name))]
    async fn connect_via(
        &self,
        via: &mut ThrusshSession,
        endpoint: &Endpoint,
        policy: &HostKeyPolicy,
    ) -> Result<ThrusshSession, HostError> {
        let channel = via
            .handle
            .channel_open_direct_tcpip(
                endpoint.host().as_str(),
                *endpoint.port() as u32,
                "127.0.0.1",
                0,
            )
            .await?;
        debug!("direct-tcpip channel open");

        let (local, remote) = tokio::io::duplex(TUNNEL_BUFFER_SIZE);
        let tunnel = tokio::spawn(pump_tunnel(channel, remote));
        let handler = ClientHandler::new(endpoint, policy);
        let handle = match client::connect_stream(self.config.clone(), local, handler).await {
            Ok(handle) => handle,
            Err(err) => {
                tunnel.abort();
                return Err(err);
            }
        };
        let handle = match authenticate(handle, endpoint).await {
            Ok(handle) => handle,
            Err(err) => {
                tunnel.abort();
                return Err(err);
            }
        };
        debug!("authenticated through tunnel");
        Ok(ThrusshSession {
            handle,
            name: endpoint.to_string(),
            tunnel: Some(tunnel),
        })
    }
}

async fn authenticate(
    mut handle: Handle<ClientHandler>,
    endpoint: &Endpoint,
) -> Result<Handle<ClientHandler>, HostError> {
    let accepted = handle
        .authenticate_password(endpoint.username().as_str(), endpoint.password())
        .await?;
    if accepted {
        Ok(handle)
    } else {
        if let Err(err) = handle
            .disconnect(thrussh::Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("disconnect after failed auth: {}", err);
        }
        Err(HostError::Auth {
            username: endpoint.username().clone(),
        })
    }
}

/// Shovel bytes between a direct-tcpip channel and the in-memory stream the
/// tunnelled SSH session runs over.
async fn pump_tunnel(mut channel: Channel, stream: DuplexStream) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; TUNNEL_BUFFER_SIZE];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    if let Err(err) = channel.eof().await {
                        trace!("tunnel eof: {}", err);
                    }
                    break;
                }
                Ok(n) => {
                    if let Err(err) = channel.data(&buf[..n]).await {
                        debug!("tunnel write failed: {}", err);
                        break;
                    }
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if writer.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }
    trace!("tunnel closed");
}

/// A thrussh session. Tunnelled sessions also own the task feeding their
/// channel.
pub struct ThrusshSession {
    handle: Handle<ClientHandler>,
    name: String,
    tunnel: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ThrusshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrusshSession")
            .field("name", &self.name)
            .field("tunneled", &self.tunnel.is_some())
            .finish()
    }
}

#[async_trait]
impl RemoteSession for ThrusshSession {
    #[tracing::instrument(skip(self), fields(session = %self.name))]
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, HostError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExitStatus {
                    exit_status: status,
                } => exit_status = Some(status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    return Err(HostError::Unclassified(format!(
                        "command '{}' killed by signal {:?}",
                        command, signal_name
                    )));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let exit_status = exit_status.ok_or_else(|| {
            HostError::Protocol(format!("no exit status for command '{}'", command))
        })?;
        Ok(ExecOutput::new(
            exit_status,
            String::from_utf8_lossy(&stdout).into_owned(),
        ))
    }

    async fn close(&mut self) {
        if let Err(err) = self
            .handle
            .disconnect(thrussh::Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("disconnecting {}: {}", &self.name, err);
        }
        if let Some(tunnel) = self.tunnel.take() {
            tunnel.abort();
        }
    }
}

/// Per-connection handler; decides whether the server key is acceptable.
#[derive(Debug)]
struct ClientHandler {
    host: String,
    port: Port,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    fn new(endpoint: &Endpoint, policy: &HostKeyPolicy) -> Self {
        Self {
            host: endpoint.host().clone(),
            port: *endpoint.port(),
            policy: policy.clone(),
        }
    }

    fn reject<S: Into<String>>(&self, reason: S) -> HostError {
        HostError::HostKey {
            host: self.host.clone(),
            port: self.port,
            reason: reason.into(),
        }
    }

    fn verify(&self, key: &thrussh_keys::key::PublicKey) -> Result<(), HostError> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => Ok(()),
            HostKeyPolicy::TrustOnFirstUse { path } => {
                match thrussh_keys::check_known_hosts_path(&self.host, self.port, key, path) {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        info!("learning host key for {}:{}", &self.host, self.port);
                        thrussh_keys::learn_known_hosts_path(&self.host, self.port, key, path)
                            .map_err(|err| self.reject(err.to_string()))
                    }
                    Err(err) => Err(self.reject(err.to_string())),
                }
            }
            HostKeyPolicy::KnownHosts { path } => {
                match thrussh_keys::check_known_hosts_path(&self.host, self.port, key, path) {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(self.reject("host not in known_hosts")),
                    Err(err) => Err(self.reject(err.to_string())),
                }
            }
            HostKeyPolicy::Fingerprint { value } => {
                let presented = key.fingerprint();
                if presented == value.trim_start_matches("SHA256:") {
                    Ok(())
                } else {
                    Err(self.reject(format!("fingerprint mismatch: got {}", presented)))
                }
            }
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = HostError;
    type FutureUnit = futures::future::Ready<Result<(Self, client::Session), HostError>>;
    type FutureBool = futures::future::Ready<Result<(Self, bool), HostError>>;

    fn finished_bool(self, b: bool) -> Self::FutureBool {
        futures::future::ready(Ok((self, b)))
    }

    fn finished(self, session: client::Session) -> Self::FutureUnit {
        futures::future::ready(Ok((self, session)))
    }

    fn check_server_key(self, server_public_key: &thrussh_keys::key::PublicKey) -> Self::FutureBool {
        match self.verify(server_public_key) {
            Ok(()) => self.finished_bool(true),
            Err(err) => {
                warn!("{}", err);
                futures::future::ready(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, Ordering};

    use color_eyre::eyre::Result;

    use super::*;
    use crate::error::HOST_KEY_NOT_VERIFIABLE;

    static KNOWN_HOSTS_COUNTER: AtomicU64 = AtomicU64::new(0);

    /// A known_hosts path in a fresh directory. The file itself does not
    /// exist yet.
    fn known_hosts_path() -> Result<PathBuf> {
        let id = KNOWN_HOSTS_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = env::temp_dir().join(format!("fleet-known-hosts-{}-{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join("known_hosts"))
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    fn server_key() -> Result<thrussh_keys::key::PublicKey> {
        thrussh_keys::key::KeyPair::generate_ed25519()
            .map(|pair| pair.clone_public_key())
            .ok_or_else(|| eyre!("generating ed25519 key"))
    }

    fn handler(policy: HostKeyPolicy) -> ClientHandler {
        ClientHandler::new(&Endpoint::new("10.0.0.1", 22, "admin", "admin"), &policy)
    }

    #[test]
    fn test_accept_any_takes_every_key() -> Result<()> {
        assert!(handler(HostKeyPolicy::AcceptAny)
            .verify(&server_key()?)
            .is_ok());
        Ok(())
    }

    #[test]
    fn test_fingerprint_policy() -> Result<()> {
        let key = server_key()?;
        let pinned = handler(HostKeyPolicy::Fingerprint {
            value: format!("SHA256:{}", key.fingerprint()),
        });
        assert!(pinned.verify(&key).is_ok());

        let err = pinned.verify(&server_key()?).unwrap_err();
        assert!(matches!(err, HostError::HostKey { ref host, port: 22, .. } if host == "10.0.0.1"));
        assert_eq!(HOST_KEY_NOT_VERIFIABLE, err.code_and_message().0);
        Ok(())
    }

    #[test]
    fn test_trust_on_first_use_learns_then_accepts() -> Result<()> {
        let path = known_hosts_path()?;
        let key = server_key()?;
        let tofu = handler(HostKeyPolicy::TrustOnFirstUse { path: path.clone() });

        tofu.verify(&key)?;
        assert!(thrussh_keys::check_known_hosts_path("10.0.0.1", 22, &key, &path)?);
        let contents = std::fs::read_to_string(&path)?;
        assert_eq!(1, contents.lines().count());
        assert!(contents.starts_with("10.0.0.1 "));

        // Seen before: accepted without writing a second entry.
        tofu.verify(&key)?;
        assert_eq!(1, std::fs::read_to_string(&path)?.lines().count());

        cleanup(&path);
        Ok(())
    }

    #[test]
    fn test_trust_on_first_use_rejects_changed_key() -> Result<()> {
        let path = known_hosts_path()?;
        let tofu = handler(HostKeyPolicy::TrustOnFirstUse { path: path.clone() });
        tofu.verify(&server_key()?)?;

        let err = tofu.verify(&server_key()?).unwrap_err();
        assert!(matches!(err, HostError::HostKey { ref host, port: 22, .. } if host == "10.0.0.1"));
        assert_eq!(HOST_KEY_NOT_VERIFIABLE, err.code_and_message().0);
        assert_eq!(1, std::fs::read_to_string(&path)?.lines().count());

        cleanup(&path);
        Ok(())
    }

    #[test]
    fn test_known_hosts_rejects_unknown_host() -> Result<()> {
        let path = known_hosts_path()?;
        let key = server_key()?;
        let strict = handler(HostKeyPolicy::KnownHosts { path: path.clone() });

        let err = strict.verify(&key).unwrap_err();
        assert_eq!(
            (
                HOST_KEY_NOT_VERIFIABLE,
                "host key for 10.0.0.1:22 not verifiable: host not in known_hosts".to_string()
            ),
            err.code_and_message()
        );
        assert!(!path.exists());

        // Once the key is on file the strict policy accepts it.
        thrussh_keys::learn_known_hosts_path("10.0.0.1", 22, &key, &path)?;
        strict.verify(&key)?;

        cleanup(&path);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_key_check_fails_the_handshake() -> Result<()> {
        use thrussh::client::Handler as _;

        let path = known_hosts_path()?;
        let key = server_key()?;
        let strict = handler(HostKeyPolicy::KnownHosts { path: path.clone() });
        let rejected = strict.check_server_key(&key).await;
        assert!(matches!(rejected, Err(HostError::HostKey { .. })));

        let (_, accepted) = handler(HostKeyPolicy::AcceptAny)
            .check_server_key(&key)
            .await?;
        assert!(accepted);

        cleanup(&path);
        Ok(())
    }

    #[test]
    fn test_transport_debug_hides_config() {
        let transport = ThrusshTransport::default();
        assert_eq!("ThrusshTransport { .. }", format!("{:?}", transport));
    }
}
