//! An SSH tunnel manager. Exposes the workload manager's REST API on a
//! local loopback port via an `ssh2` direct-tcpip forward, and provides
//! ad-hoc remote file fetch, directory sync, and command execution.
//!
//! Grounded on `vault.rs`'s shape: a client struct wrapping a blocking
//! transport (there `reqwest::Client`, here an `ssh2::Session`), with a
//! small per-module error enum for the ways the transport can fail.
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use failure::{Context, Backtrace, Fail, ResultExt};
use std::fmt::{self, Display};
use ssh2::Session;

use config::SshTarget;

#[derive(Debug)]
struct TunnelError {
    inner: Context<TErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum TErrKind {
    #[fail(display = "could not reach {}:{} over ssh", _0, _1)]
    Unreachable(String, u16),

    #[fail(display = "probe of forwarded port {} failed", _0)]
    ProbeFailed(u16),

    #[fail(display = "remote command timed out after {:?}", _0)]
    CommandTimeout(Duration),
}
impl Fail for TunnelError {
    fn cause(&self) -> Option<&Fail> { self.inner.cause() }
    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}
impl Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<TErrKind> for TunnelError {
    fn from(kind: TErrKind) -> TunnelError { TunnelError { inner: Context::new(kind) } }
}
impl From<Context<TErrKind>> for TunnelError {
    fn from(inner: Context<TErrKind>) -> TunnelError { TunnelError { inner } }
}

use Result;

/// A single established forward: which local port it's bound to, and a
/// handle to the background thread relaying connections.
struct Forward {
    local_port: u16,
    shutdown: Arc<AtomicBool>,
    listener_thread: JoinHandle<()>,
}

impl Forward {
    /// Stop the relay loop and block until its listener is dropped, so the
    /// port is free for `TcpListener::bind` to reuse immediately.
    fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // incoming() blocks on accept; a dummy connection wakes it so the
        // loop can observe the flag and exit.
        let _ = TcpStream::connect(("127.0.0.1", self.local_port));
        let _ = self.listener_thread.join();
    }
}

/// Owns every forwarded port this process has established. One lock per
/// port (spec section 5): concurrent callers never race to re-establish
/// the same tunnel, but establishing two different ports proceeds in
/// parallel.
pub struct TunnelManager {
    ssh: SshTarget,
    forwards: Mutex<HashMap<u16, Forward>>,
}

fn connect_session(ssh: &SshTarget) -> Result<Session> {
    let tcp = TcpStream::connect((ssh.host.as_str(), ssh.port))
        .context(TErrKind::Unreachable(ssh.host.clone(), ssh.port))?;
    let mut sess = Session::new().ok_or_else(|| TErrKind::Unreachable(ssh.host.clone(), ssh.port))?;
    sess.set_tcp_stream(tcp);
    sess.handshake().context(TErrKind::Unreachable(ssh.host.clone(), ssh.port))?;
    sess.userauth_pubkey_file(&ssh.user, None, Path::new(&ssh.key_path), None)
        .context(TErrKind::Unreachable(ssh.host.clone(), ssh.port))?;
    Ok(sess)
}

impl TunnelManager {
    pub fn new(ssh: SshTarget) -> TunnelManager {
        TunnelManager { ssh, forwards: Mutex::new(HashMap::new()) }
    }

    /// Probe a forwarded port with an HTTP `ping`. Used both to detect an
    /// already-active tunnel (idempotent `ensure_tunnel`) and to decide
    /// whether a tunnel needs re-establishing.
    fn probe(local_port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}/ping", local_port);
        reqwest::Client::new()
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Ensure a forward from `local_port` to `remote_host:remote_port`
    /// exists, reusing an already-active tunnel. Establishing it twice in
    /// succession opens exactly one forwarded port (spec section 8).
    pub fn ensure_tunnel(&self, local_port: u16, remote_host: &str, remote_port: u16) -> Result<u16> {
        let mut forwards = self.forwards.lock().expect("forwards lock poisoned");
        if forwards.contains_key(&local_port) {
            if Self::probe(local_port) {
                return Ok(local_port);
            }
            // the tunnel died: its listener thread is still holding the
            // port, so it must be torn down before we can rebind.
            if let Some(stale) = forwards.remove(&local_port) {
                stale.shutdown();
            }
        }

        let listener = TcpListener::bind(("127.0.0.1", local_port))
            .context(TErrKind::Unreachable(remote_host.to_string(), remote_port))?;
        let ssh = self.ssh.clone();
        let remote_host = remote_host.to_string();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();

        let listener_thread = thread::spawn(move || {
            for incoming in listener.incoming() {
                if thread_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let local_stream = match incoming {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let ssh = ssh.clone();
                let remote_host = remote_host.clone();
                thread::spawn(move || {
                    if let Err(e) = relay_one_connection(&ssh, &remote_host, remote_port, local_stream) {
                        warn!("tunnel relay ended: {}", e);
                    }
                });
            }
        });

        // give the listener a moment to come up before the first probe
        thread::sleep(Duration::from_millis(50));
        if !Self::probe(local_port) {
            return Err(TErrKind::ProbeFailed(local_port).into());
        }
        forwards.insert(local_port, Forward { local_port, shutdown, listener_thread });
        Ok(local_port)
    }

    /// Read a file from the remote side via sftp, writing it locally,
    /// creating parent directories as needed.
    pub fn fetch_remote_file(&self, remote_path: &str, local_path: &Path) -> Result<bool> {
        let sess = connect_session(&self.ssh)?;
        let sftp = sess.sftp().context(TErrKind::Unreachable(self.ssh.host.clone(), self.ssh.port))?;
        let mut remote_file = match sftp.open(Path::new(remote_path)) {
            Ok(f) => f,
            Err(_) => return Ok(false), // file doesn't exist yet
        };
        let mut buf = Vec::new();
        remote_file.read_to_end(&mut buf)?;
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(local_path)?;
        out.write_all(&buf)?;
        Ok(true)
    }

    /// One-way mirror `local_dir` -> `remote_dir`. `exclude` entries match
    /// on path suffix.
    pub fn sync_directory(&self, local_dir: &Path, remote_dir: &str, exclude: &[String]) -> Result<bool> {
        let sess = connect_session(&self.ssh)?;
        let sftp = sess.sftp().context(TErrKind::Unreachable(self.ssh.host.clone(), self.ssh.port))?;

        for entry in walkdir_files(local_dir)? {
            let rel = entry.strip_prefix(local_dir).unwrap_or(&entry);
            let rel_str = rel.to_string_lossy();
            if exclude.iter().any(|ex| rel_str.ends_with(ex.as_str())) {
                continue;
            }
            let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), rel_str);
            ensure_remote_parents(&sftp, &remote_path);

            let mut data = Vec::new();
            fs::File::open(&entry)?.read_to_end(&mut data)?;
            let mut remote_file = sftp
                .create(Path::new(&remote_path))
                .context(TErrKind::Unreachable(self.ssh.host.clone(), self.ssh.port))?;
            remote_file.write_all(&data)?;
        }
        Ok(true)
    }

    /// Execute a remote command with a deadline. If the command has not
    /// finished by `timeout`, the session is closed, surfacing
    /// `CommandTimeout` instead of blocking indefinitely (spec section 9:
    /// every side-effectful call is cancellable/deadline-bounded even when
    /// the underlying transport doesn't natively support it).
    pub fn execute(&self, command: &str, timeout: Duration) -> Result<(bool, String, String)> {
        let sess = connect_session(&self.ssh)?;
        let deadline = Instant::now() + timeout;

        let mut channel = sess.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        loop {
            let mut buf = [0u8; 4096];
            match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => stdout.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() > deadline {
                let _ = channel.close();
                return Err(TErrKind::CommandTimeout(timeout).into());
            }
        }
        let mut stderr_buf = String::new();
        channel.stderr().read_to_string(&mut stderr_buf).ok();
        stderr.push_str(&stderr_buf);

        channel.wait_close()?;
        let ok = channel.exit_status().unwrap_or(-1) == 0;
        Ok((ok, stdout, stderr))
    }
}

fn relay_one_connection(ssh: &SshTarget, remote_host: &str, remote_port: u16, mut local: TcpStream) -> Result<()> {
    let sess = connect_session(ssh)?;
    let mut channel = sess.channel_direct_tcpip(remote_host, remote_port, None)?;

    let mut local_read = local.try_clone()?;
    let mut channel_write = channel.stream(0);
    let to_remote = thread::spawn(move || {
        let _ = ::std::io::copy(&mut local_read, &mut channel_write);
    });

    let mut channel_read = channel.stream(0);
    let _ = ::std::io::copy(&mut channel_read, &mut local);
    let _ = to_remote.join();
    Ok(())
}

fn ensure_remote_parents(sftp: &::ssh2::Sftp, remote_path: &str) {
    if let Some(idx) = remote_path.rfind('/') {
        let dir = &remote_path[..idx];
        let mut acc = String::new();
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            acc.push('/');
            acc.push_str(part);
            let _ = sftp.mkdir(Path::new(&acc), 0o755);
        }
    }
}

#[cfg(feature = "filesystem")]
fn walkdir_files(dir: &Path) -> Result<Vec<::std::path::PathBuf>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            out.push(entry.path().to_path_buf());
        }
    }
    Ok(out)
}

#[cfg(not(feature = "filesystem"))]
fn walkdir_files(_dir: &Path) -> Result<Vec<::std::path::PathBuf>> {
    Ok(Vec::new())
}
