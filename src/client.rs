//! Public façade: a handle the caller holds, backed by the I/O task
//! running on its own Tokio task. Every method round-trips through an
//! mpsc command plus a oneshot reply, with a default 10 second deadline
//! enforced here rather than inside the I/O task itself.

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::io_task::{Command, IoTask, StatsSnapshot};
use crate::job::{Job, JobResult};
use crate::protocol::{self, CLIENT_VERSION};
use crate::rpc::MAX_LINE_LEN;
use crate::transport::Transport;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_CHANNEL_SIZE: usize = 64;
/// How long `connect()` waits for the first `mining.notify` after a
/// successful authorize, per the handshake contract.
const FIRST_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool address and worker credentials for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub worker_name: String,
    pub password: String,
}

impl ConnectionParams {
    pub fn new(host: impl Into<String>, port: u16, worker_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            worker_name: worker_name.into(),
            password: password.into(),
        }
    }
}

/// Tunables for how a connection behaves, independent of which pool it's
/// talking to.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub call_timeout: Duration,
    pub user_agent: String,
    pub max_line_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_TIMEOUT,
            user_agent: CLIENT_VERSION.to_string(),
            max_line_len: MAX_LINE_LEN,
        }
    }
}

/// A point-in-time snapshot of connection activity, for logging and
/// monitoring.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub last_activity: Option<DateTime<Local>>,
    pub current_difficulty: f64,
    pub known_jobs: usize,
}

impl From<StatsSnapshot> for ConnectionStats {
    fn from(snapshot: StatsSnapshot) -> Self {
        Self {
            messages_sent: snapshot.messages_sent,
            messages_received: snapshot.messages_received,
            errors: snapshot.errors,
            last_activity: snapshot.last_activity.map(DateTime::<Local>::from),
            current_difficulty: snapshot.current_difficulty,
            known_jobs: snapshot.known_jobs,
        }
    }
}

/// A live handle to a Stratum connection. Cloning is cheap: every clone
/// shares the same underlying I/O task.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
    jobs: watch::Receiver<Option<String>>,
    config: ConnectionConfig,
}

impl Connection {
    /// Opens a TCP connection, performs `mining.subscribe` and
    /// `mining.authorize`, then waits up to [`FIRST_NOTIFY_TIMEOUT`] for
    /// the first `mining.notify` before returning a handle ready to build
    /// and submit jobs. Fails if either handshake call errors, the pool
    /// rejects authorization, or no job arrives within the deadline.
    pub async fn connect(params: ConnectionParams, config: ConnectionConfig) -> Result<Self> {
        let transport = Transport::connect(&params.host, params.port).await?;

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let jobs = IoTask::spawn(transport, params.worker_name.clone(), config.max_line_len, rx);

        let connection = Self {
            commands: tx,
            jobs,
            config: config.clone(),
        };

        let subscribe_result = connection
            .call(protocol::MINING_SUBSCRIBE, protocol::subscribe_params(&config.user_agent))
            .await?;
        let (extranonce1, extranonce2_size) = protocol::parse_subscribe_result(&subscribe_result)?;
        connection
            .commands
            .send(Command::InitExtranonce {
                extranonce1,
                extranonce2_size,
            })
            .await
            .map_err(|_| Error::OwnerGone)?;

        let authorized = connection
            .call(
                protocol::MINING_AUTHORIZE,
                protocol::authorize_params(&params.worker_name, &params.password),
            )
            .await?;
        if !authorized.as_bool().unwrap_or(false) {
            return Err(Error::LocalReject(format!(
                "pool refused to authorize worker {}",
                params.worker_name
            )));
        }

        let mut jobs = connection.jobs.clone();
        if jobs.borrow().is_none() {
            tokio::time::timeout(FIRST_NOTIFY_TIMEOUT, jobs.changed())
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(|_| Error::OwnerGone)?;
        }

        Ok(connection)
    }

    async fn call(&self, method: &str, params: Vec<serde_json::Value>) -> Result<serde_json::Value> {
        let (respond_to, rx) = oneshot::channel();
        self.commands
            .send(Command::Call {
                method: method.to_string(),
                params,
                timeout: self.config.call_timeout,
                respond_to,
            })
            .await
            .map_err(|_| Error::OwnerGone)?;
        tokio::time::timeout(self.config.call_timeout, rx)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::OwnerGone)?
    }

    /// Requests a lower difficulty target from the pool. Not all pools
    /// honor this; a successful call only means the request was accepted,
    /// not that `mining.set_difficulty` will follow immediately.
    pub async fn suggest_difficulty(&self, difficulty: f64) -> Result<()> {
        self.call(
            protocol::MINING_SUGGEST_DIFFICULTY,
            protocol::suggest_difficulty_params(difficulty),
        )
        .await?;
        Ok(())
    }

    /// Builds a `Job` from the most recently received `mining.notify`
    /// using the given extranonce2 value. Returns an error if no job has
    /// been received yet.
    pub async fn build_current_job(&self, extranonce2: u64) -> Result<Job> {
        let (respond_to, rx) = oneshot::channel();
        self.commands
            .send(Command::BuildJob { extranonce2, respond_to })
            .await
            .map_err(|_| Error::OwnerGone)?;
        rx.await.map_err(|_| Error::OwnerGone)?
    }

    /// Submits a share. Rejected locally without touching the wire if the
    /// job is no longer in the connection's job table (stale or evicted
    /// by a `clean_jobs` notification).
    pub async fn submit(&self, job_result: JobResult) -> Result<bool> {
        let (respond_to, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                job_result,
                timeout: self.config.call_timeout,
                respond_to,
            })
            .await
            .map_err(|_| Error::OwnerGone)?;
        tokio::time::timeout(self.config.call_timeout, rx)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::OwnerGone)?
    }

    /// A snapshot of message counts, errors, and the last time any frame
    /// was seen on the wire.
    pub async fn stats(&self) -> Result<ConnectionStats> {
        let (respond_to, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { respond_to })
            .await
            .map_err(|_| Error::OwnerGone)?;
        rx.await.map(ConnectionStats::from).map_err(|_| Error::OwnerGone)
    }

    /// A channel that reports the most recently seen job_id, for callers
    /// that want to react to new work without polling `build_current_job`.
    pub fn watch_jobs(&self) -> watch::Receiver<Option<String>> {
        self.jobs.clone()
    }

    /// Closes the connection. Any call still in flight resolves with
    /// `Error::OwnerGone`.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }
}
