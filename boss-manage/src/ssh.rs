//! Tunnelled access to hosts inside the VPC.  A `Connection` reaches its target through a chain
//! of jump hosts; each hop is an `ssh -L` process listening on a local ephemeral port, dialled by
//! the next hop.  The connection owns those processes and stops them, innermost first, when it
//! is dropped.

use crate::poll::poll;
use bosslet_config::JumpHost;
use log::{debug, info, warn};
use rand::Rng;
use snafu::{ensure, OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use tokio::net::TcpStream;

/// Exit code ssh uses for its own failures
const SSH_FAILURE: i32 = 255;

/// Range local tunnel ports are picked from
const EPHEMERAL_PORTS: std::ops::Range<u16> = 20000..60000;

const TUNNEL_CHECK_INTERVAL: Duration = Duration::from_millis(500);
const TUNNEL_TIMEOUT: Duration = Duration::from_secs(20);

const SSH_OPTIONS: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "ServerAliveInterval=30",
    "-o",
    "LogLevel=ERROR",
];

/// One host in a chain: where it is and how to log into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Hop {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) key: PathBuf,
}

impl Hop {
    pub(crate) fn new<S1, S2, P>(host: S1, user: S2, key: P) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key: key.into(),
        }
    }
}

impl From<&JumpHost> for Hop {
    fn from(jump: &JumpHost) -> Self {
        Self {
            host: jump.host.clone(),
            port: jump.port,
            user: jump.user.clone(),
            key: jump.key.clone(),
        }
    }
}

fn ephemeral_port() -> u16 {
    rand::thread_rng().gen_range(EPHEMERAL_PORTS)
}

/// Arguments that log into `hop`, reached at `address:port`
fn login_args(hop: &Hop, address: &str, port: u16) -> Vec<String> {
    let mut args: Vec<String> = SSH_OPTIONS.iter().map(|s| s.to_string()).collect();
    args.extend([
        "-i".to_string(),
        hop.key.display().to_string(),
        "-p".to_string(),
        port.to_string(),
        format!("{}@{}", hop.user, address),
    ]);
    args
}

/// Arguments for a forward-only ssh process: `local` on this machine reaches `to_host:to_port`
/// as seen from `hop`.
fn forward_args(hop: &Hop, address: &str, port: u16, local: u16, to_host: &str, to_port: u16) -> Vec<String> {
    let mut args = vec![
        "-N".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-L".to_string(),
        format!("{}:{}:{}", local, to_host, to_port),
    ];
    args.extend(login_args(hop, address, port));
    args
}

/// A target reached through zero or more jump hosts
#[derive(Debug)]
pub(crate) struct Connection {
    target: Hop,
    jumps: Vec<Hop>,
    /// Where the target's ssh port is reachable from this machine, once opened
    endpoint: Option<(String, u16)>,
    tunnels: Vec<Child>,
}

impl Connection {
    pub(crate) fn new(target: Hop, jumps: Vec<Hop>) -> Self {
        Self {
            target,
            jumps,
            endpoint: None,
            tunnels: Vec::new(),
        }
    }

    /// Every host on the way, in dialling order, ending with the target
    pub(crate) fn hops(&self) -> impl Iterator<Item = &Hop> {
        self.jumps.iter().chain(std::iter::once(&self.target))
    }

    /// Starts one forwarding process per jump host.  The first hop is dialled directly, each
    /// later hop through the previous hop's local port.  If any hop fails, the ones already
    /// started are stopped when the connection is dropped.
    pub(crate) async fn open(&mut self) -> Result<()> {
        if self.endpoint.is_some() {
            return Ok(());
        }
        let jumps = self.jumps.clone();
        let target = self.target.clone();
        let mut address = None;
        for (index, jump) in jumps.iter().enumerate() {
            let next = jumps.get(index + 1).unwrap_or(&target);
            let (dial_host, dial_port) = address
                .clone()
                .unwrap_or_else(|| (jump.host.clone(), jump.port));
            let local = ephemeral_port();
            debug!(
                "Forwarding localhost:{} to {}:{} through {}",
                local, next.host, next.port, jump.host
            );
            let args = forward_args(jump, &dial_host, dial_port, local, &next.host, next.port);
            let child = spawn("ssh", &args)?;
            self.tunnels.push(child);
            self.wait_listening(&jump.host, local).await?;
            address = Some(("localhost".to_string(), local));
        }
        self.endpoint = Some(address.unwrap_or((target.host, target.port)));
        Ok(())
    }

    /// Waits for the newest tunnel to accept connections, failing early if it exits.
    async fn wait_listening(&mut self, host: &str, port: u16) -> Result<()> {
        let mut tunnel = self.tunnels.last_mut();
        let ready = poll(
            &format!("tunnel through {}", host),
            TUNNEL_CHECK_INTERVAL,
            Some(TUNNEL_TIMEOUT),
            || {
                let exited = tunnel
                    .as_mut()
                    .and_then(|child| child.try_wait().ok().flatten());
                async move {
                    if let Some(status) = exited {
                        return error::TunnelSnafu {
                            host,
                            reason: format!("ssh exited with {}", status),
                        }
                        .fail();
                    }
                    Ok::<_, Error>(TcpStream::connect(("127.0.0.1", port)).await.ok().map(|_| ()))
                }
            },
        )
        .await?;
        ready.context(error::TunnelSnafu {
            host,
            reason: format!("nothing listening on port {}", port),
        })
    }

    fn endpoint(&self) -> Result<(&str, u16)> {
        let (host, port) = self.endpoint.as_ref().context(error::NotOpenSnafu {
            host: &self.target.host,
        })?;
        Ok((host.as_str(), *port))
    }

    /// Attaches the operator's terminal to a login shell on the target.
    pub(crate) fn shell(&self) -> Result<()> {
        let (address, port) = self.endpoint()?;
        let mut args = vec!["-t".to_string()];
        args.extend(login_args(&self.target, address, port));
        info!("Opening shell on {}", self.target.host);
        let status = Command::new("ssh")
            .args(&args)
            .status()
            .context(error::SpawnSnafu { program: "ssh" })?;
        check_status(&self.target.host, "shell", status)
    }

    /// Runs `command` on the target with the output going to the operator's terminal.
    pub(crate) fn cmd(&self, command: &str) -> Result<()> {
        let (address, port) = self.endpoint()?;
        let mut args = login_args(&self.target, address, port);
        args.push(command.to_string());
        debug!("Running '{}' on {}", command, self.target.host);
        let status = Command::new("ssh")
            .args(&args)
            .status()
            .context(error::SpawnSnafu { program: "ssh" })?;
        check_status(&self.target.host, command, status)
    }

    /// Copies `local` to `remote` on the target, or the other way round when `upload` is false.
    pub(crate) fn scp(&self, local: &Path, remote: &str, upload: bool) -> Result<()> {
        let (address, port) = self.endpoint()?;
        let mut args: Vec<String> = SSH_OPTIONS.iter().map(|s| s.to_string()).collect();
        args.extend([
            "-i".to_string(),
            self.target.key.display().to_string(),
            "-P".to_string(),
            port.to_string(),
        ]);
        let remote = format!("{}@{}:{}", self.target.user, address, remote);
        let local = local.display().to_string();
        if upload {
            args.extend([local, remote]);
        } else {
            args.extend([remote, local]);
        }
        let status = Command::new("scp")
            .args(&args)
            .status()
            .context(error::SpawnSnafu { program: "scp" })?;
        check_status(&self.target.host, "scp", status)
    }

    /// Forwards a fresh local port to `remote_port` on the target and returns the local port.
    /// The forward lives as long as the connection.
    pub(crate) async fn tunnel(&mut self, remote_port: u16) -> Result<u16> {
        self.open().await?;
        let (address, port) = self.endpoint()?;
        let local = ephemeral_port();
        let args = forward_args(&self.target, address, port, local, "localhost", remote_port);
        info!(
            "Forwarding localhost:{} to {}:{}",
            local, self.target.host, remote_port
        );
        let child = spawn("ssh", &args)?;
        self.tunnels.push(child);
        let host = self.target.host.clone();
        self.wait_listening(&host, local).await?;
        Ok(local)
    }

    /// Local port for the secret store on the target
    pub(crate) async fn vault_tunnel(&mut self) -> Result<u16> {
        self.tunnel(crate::vault::VAULT_PORT).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for mut child in self.tunnels.drain(..).rev() {
            let pid = child.id();
            if let Err(e) = child.kill() {
                debug!("Tunnel process {} already gone: {}", pid, e);
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap tunnel process {}: {}", pid, e);
            }
        }
    }
}

fn spawn(program: &str, args: &[String]) -> Result<Child> {
    debug!("Starting {} {}", program, args.join(" "));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .context(error::SpawnSnafu { program })
}

fn check_status(host: &str, command: &str, status: ExitStatus) -> Result<()> {
    let code = status.code().context(error::SignalSnafu { command })?;
    ensure!(code != SSH_FAILURE, error::SshSnafu { host });
    ensure!(code == 0, error::RemoteCommandSnafu { command, code });
    Ok(())
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Connection to {} isn't open", host))]
        NotOpen { host: String },

        #[snafu(display("Remote command '{}' exited with {}", command, code))]
        RemoteCommand { command: String, code: i32 },

        #[snafu(display("'{}' was killed by a signal", command))]
        Signal { command: String },

        #[snafu(display("Failed to start {}: {}", program, source))]
        Spawn {
            program: String,
            source: std::io::Error,
        },

        #[snafu(display("SSH connection to {} failed", host))]
        Ssh { host: String },

        #[snafu(display("Failed to open tunnel through {}: {}", host, reason))]
        Tunnel { host: String, reason: String },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;
