//! Feed client: keeps one logged-in connection to the upstream APRS feed.
//!
//! Loop: connect, send the login line, read and frame lines, decode each
//! non-comment line and publish the report. Any failure, including a clean
//! close by the server, ends the session; the client waits a fixed delay and
//! starts over with the same login. It stops only on shutdown.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use ogn_core::config::FeedConfig;
use ogn_core::framing::{is_comment, login_line, LineFramer, MAX_LINE_BYTES};
use ogn_core::{try_decode, PositionReport};

use crate::broadcast::Broadcaster;

const READ_BUF_BYTES: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Opens the byte stream to the feed.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn connect(&self) -> io::Result<Self::Stream>;
}

/// Plain TCP to `host:port`.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Errors, state, counters
// ---------------------------------------------------------------------------

/// Why a session ended.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("login write failed: {0}")]
    Login(#[source] io::Error),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("no data received for {0:?}")]
    Idle(Duration),

    #[error("shutdown requested")]
    Shutdown,
}

/// Connection state, published through a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
}

#[derive(Debug, Default)]
pub struct FeedStats {
    pub connects: AtomicU64,
    pub lines: AtomicU64,
    pub comments: AtomicU64,
    pub decoded: AtomicU64,
    pub rejected: AtomicU64,
    pub discarded: AtomicU64,
}

/// Point-in-time copy of `FeedStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedCounters {
    pub connects: u64,
    pub lines: u64,
    pub comments: u64,
    pub decoded: u64,
    pub rejected: u64,
    pub discarded: u64,
}

impl FeedStats {
    pub fn snapshot(&self) -> FeedCounters {
        FeedCounters {
            connects: self.connects.load(Ordering::Relaxed),
            lines: self.lines.load(Ordering::Relaxed),
            comments: self.comments.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Seconds from config as a `Duration`; non-positive or invalid means `None`.
fn positive_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct FeedClient<C: Connector> {
    connector: C,
    config: FeedConfig,
    reports: Broadcaster<PositionReport>,
    state: watch::Sender<FeedState>,
    stats: Arc<FeedStats>,
}

impl<C: Connector> FeedClient<C> {
    pub fn new(connector: C, config: FeedConfig, reports: Broadcaster<PositionReport>) -> Self {
        let (state, _) = watch::channel(FeedState::Disconnected);
        FeedClient {
            connector,
            config,
            reports,
            state,
            stats: Arc::new(FeedStats::default()),
        }
    }

    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `shutdown` is cancelled. Never returns an error: every
    /// session failure is logged and followed by a reconnect.
    pub async fn run(self, shutdown: CancellationToken) {
        let delay = positive_secs(self.config.reconnect_delay).unwrap_or(Duration::ZERO);
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            filter = %self.config.filter,
            reconnect_delay_secs = delay.as_secs_f64(),
            "Feed client started"
        );

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let err = self.session(&shutdown, attempt).await;
            self.set_state(FeedState::Disconnected);

            if let FeedError::Shutdown = err {
                break;
            }
            tracing::warn!(
                error = %err,
                attempt,
                retry_in_secs = delay.as_secs_f64(),
                "Feed session ended"
            );

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let counters = self.stats.snapshot();
        tracing::info!(
            connects = counters.connects,
            lines = counters.lines,
            decoded = counters.decoded,
            rejected = counters.rejected,
            "Feed client stopped"
        );
    }

    /// One connect/login/stream cycle. Always ends in an error.
    async fn session(&self, shutdown: &CancellationToken, attempt: u64) -> FeedError {
        self.set_state(FeedState::Connecting);
        bump(&self.stats.connects);
        tracing::info!(attempt, host = %self.config.host, "Connecting to feed");

        let idle = positive_secs(self.config.idle_timeout);
        let mut stream = tokio::select! {
            _ = shutdown.cancelled() => return FeedError::Shutdown,
            res = connect_within(&self.connector, idle) => match res {
                Ok(stream) => stream,
                Err(e) => return e,
            },
        };

        let login = login_line(&self.config);
        if let Err(e) = write_login(&mut stream, &login).await {
            return FeedError::Login(e);
        }
        self.set_state(FeedState::Streaming);
        tracing::info!(attempt, user = %self.config.user, "Logged in, streaming");

        let mut framer = LineFramer::new();
        let mut buf = vec![0u8; READ_BUF_BYTES];

        loop {
            let n = tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = stream.shutdown().await;
                    return FeedError::Shutdown;
                }
                res = read_some(&mut stream, &mut buf, idle) => match res {
                    Ok(0) => return FeedError::Closed,
                    Ok(n) => n,
                    Err(e) => return e,
                },
            };

            let discarded = framer.discarded();
            for line in framer.push(&buf[..n]) {
                self.dispatch(&line);
            }
            if framer.discarded() > discarded {
                bump(&self.stats.discarded);
                tracing::warn!(limit = MAX_LINE_BYTES, "Oversized partial line discarded");
            }
        }
    }

    fn dispatch(&self, line: &str) {
        bump(&self.stats.lines);
        if is_comment(line) {
            bump(&self.stats.comments);
            tracing::trace!(line, "Server comment");
            return;
        }

        match try_decode(line) {
            Ok(report) => {
                bump(&self.stats.decoded);
                tracing::trace!(
                    id = report.identity(),
                    protocol = %report.protocol,
                    lat = report.latitude,
                    lon = report.longitude,
                    "Decoded report"
                );
                self.reports.publish(report);
            }
            Err(e) => {
                bump(&self.stats.rejected);
                tracing::debug!(error = %e, line, "Skipping packet");
            }
        }
    }

    fn set_state(&self, state: FeedState) {
        self.state.send_replace(state);
    }
}

/// Connect, giving up after `limit` (the idle timeout) if one is set.
async fn connect_within<C: Connector>(
    connector: &C,
    limit: Option<Duration>,
) -> Result<C::Stream, FeedError> {
    let res = match limit {
        Some(limit) => tokio::time::timeout(limit, connector.connect())
            .await
            .map_err(|_| FeedError::ConnectTimeout(limit))?,
        None => connector.connect().await,
    };
    res.map_err(FeedError::Connect)
}

async fn write_login<S: AsyncWrite + Unpin>(stream: &mut S, login: &str) -> io::Result<()> {
    stream.write_all(login.as_bytes()).await?;
    stream.flush().await
}

async fn read_some<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
    idle: Option<Duration>,
) -> Result<usize, FeedError> {
    let read = stream.read(buf);
    let res = match idle {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| FeedError::Idle(limit))?,
        None => read.await,
    };
    res.map_err(FeedError::Read)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use ogn_core::Protocol;

    const FLARM: &str = "FLRDDA5BA>OGFLR,qAS,LFMX:/160829h4415.41N/00600.03E'342/049/A=005524 id0ADDA5BA -454fpm -1.1rot 8.8dB 0e +51.2kHz gps4x5";
    const SDR: &str = "ICA4B0E3A>OGNSDR,qAS,Bern:/163757h4654.73N/00724.01E^106/212/A=007864 id254B0E3A -1152fpm 0.0rot Sq1351";

    enum Session {
        /// Connection refused.
        Refuse,
        /// Connect never completes.
        Blackhole,
        /// Accept, read the login, write `chunks`, then close or stay open.
        Serve { chunks: Vec<String>, hold: bool },
    }

    fn serve(lines: &[&str], hold: bool) -> Session {
        Session::Serve {
            chunks: lines.iter().map(|l| format!("{l}\r\n")).collect(),
            hold,
        }
    }

    struct ScriptedConnector {
        script: Mutex<VecDeque<Session>>,
        attempts: Arc<AtomicUsize>,
        logins: mpsc::UnboundedSender<(Instant, String)>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            let (chunks, hold) = match next {
                Some(Session::Serve { chunks, hold }) => (chunks, hold),
                Some(Session::Blackhole) => std::future::pending().await,
                Some(Session::Refuse) | None => {
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                }
            };

            let (client, mut server) = tokio::io::duplex(64 * 1024);
            let logins = self.logins.clone();
            tokio::spawn(async move {
                let mut login = Vec::new();
                let mut buf = [0u8; 256];
                while !login.ends_with(b"\r\n") {
                    match server.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => login.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = logins.send((Instant::now(), String::from_utf8_lossy(&login).into_owned()));

                for chunk in chunks {
                    if server.write_all(chunk.as_bytes()).await.is_err() {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
                if hold {
                    std::future::pending::<()>().await;
                }
            });
            Ok(client)
        }
    }

    struct Harness {
        reports: crate::broadcast::Subscription<PositionReport>,
        logins: mpsc::UnboundedReceiver<(Instant, String)>,
        attempts: Arc<AtomicUsize>,
        state: watch::Receiver<FeedState>,
        stats: Arc<FeedStats>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(script: Vec<Session>, config: FeedConfig) -> Harness {
        let (tx, logins) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = ScriptedConnector {
            script: Mutex::new(script.into()),
            attempts: Arc::clone(&attempts),
            logins: tx,
        };

        let hub = Broadcaster::new(64);
        let reports = hub.subscribe();
        let client = FeedClient::new(connector, config, hub);
        let state = client.state();
        let stats = client.stats();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(client.run(shutdown.clone()));

        Harness {
            reports,
            logins,
            attempts,
            state,
            stats,
            shutdown,
            task,
        }
    }

    impl Harness {
        async fn stop(self) -> Arc<AtomicUsize> {
            self.shutdown.cancel();
            self.task.await.unwrap();
            self.attempts
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_line_sent_on_connect() {
        let config = FeedConfig::default();
        let expected = login_line(&config);
        let mut h = start(vec![serve(&[], true)], config);

        let (_, login) = h.logins.recv().await.unwrap();
        assert_eq!(login, expected);
        assert!(login.starts_with("user FOCACH pass -1 soft ogn-live "));
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_decoded_and_published() {
        let mut h = start(
            vec![serve(&["# aprsc 2.1.14-g5e3d", "not a packet", FLARM, SDR], true)],
            FeedConfig::default(),
        );

        let first = h.reports.recv().await.unwrap();
        assert_eq!(first.source_name, "FLRDDA5BA");
        assert_eq!(first.protocol, Protocol::Flarm);
        let second = h.reports.recv().await.unwrap();
        assert_eq!(second.protocol, Protocol::Sdr);
        assert_eq!(*h.state.borrow(), FeedState::Streaming);

        let counters = h.stats.snapshot();
        assert_eq!(counters.lines, 4);
        assert_eq!(counters.comments, 1);
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.decoded, 2);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_split_across_reads() {
        let half = FLARM.len() / 2;
        let script = vec![Session::Serve {
            chunks: vec![FLARM[..half].to_string(), format!("{}\r\n", &FLARM[half..])],
            hold: true,
        }];
        let mut h = start(script, FeedConfig::default());

        let report = h.reports.recv().await.unwrap();
        assert_eq!(report.source_name, "FLRDDA5BA");
        assert_eq!(h.stats.snapshot().decoded, 1);
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_once_after_delay() {
        let mut h = start(
            vec![serve(&[FLARM], false), serve(&[SDR], true)],
            FeedConfig::default(),
        );

        let (t1, login1) = h.logins.recv().await.unwrap();
        assert_eq!(h.reports.recv().await.unwrap().protocol, Protocol::Flarm);

        let (t2, login2) = h.logins.recv().await.unwrap();
        assert_eq!(h.reports.recv().await.unwrap().protocol, Protocol::Sdr);

        let gap = t2 - t1;
        assert!(gap >= Duration::from_secs(5), "reconnected after {gap:?}");
        assert!(gap < Duration::from_secs(6), "reconnected after {gap:?}");
        assert_eq!(login1, login2);

        let attempts = h.stop().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connect_retried() {
        let started = Instant::now();
        let mut h = start(
            vec![Session::Refuse, serve(&[FLARM], true)],
            FeedConfig::default(),
        );

        let (t, _) = h.logins.recv().await.unwrap();
        assert!(t - started >= Duration::from_secs(5));
        h.reports.recv().await.unwrap();

        assert_eq!(h.stats.snapshot().connects, 2);
        let attempts = h.stop().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_reconnected() {
        let config = FeedConfig {
            idle_timeout: 10.0,
            ..FeedConfig::default()
        };
        let mut h = start(vec![serve(&[], true), serve(&[FLARM], true)], config);

        let (t1, _) = h.logins.recv().await.unwrap();
        let (t2, _) = h.logins.recv().await.unwrap();
        assert!(t2 - t1 >= Duration::from_secs(15));
        h.reports.recv().await.unwrap();
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_times_out() {
        let config = FeedConfig {
            idle_timeout: 10.0,
            ..FeedConfig::default()
        };
        let started = Instant::now();
        let mut h = start(vec![Session::Blackhole, serve(&[FLARM], true)], config);

        let (t, _) = h.logins.recv().await.unwrap();
        let gap = t - started;
        assert!(gap >= Duration::from_secs(15), "logged in after {gap:?}");
        assert!(gap < Duration::from_secs(16), "logged in after {gap:?}");
        h.reports.recv().await.unwrap();

        let attempts = h.stop().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_reconnect_delay() {
        let h = start(vec![Session::Refuse], FeedConfig::default());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let state = h.state.clone();
        let attempts = h.stop().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), FeedState::Disconnected);
    }

    #[test]
    fn test_positive_secs() {
        assert_eq!(positive_secs(5.0), Some(Duration::from_secs(5)));
        assert_eq!(positive_secs(0.0), None);
        assert_eq!(positive_secs(-1.0), None);
        assert_eq!(positive_secs(f64::NAN), None);
    }
}
