//! The isolated I/O task: owns the socket, the framer, and all protocol
//! state. The façade never touches the wire directly — it sends
//! `Command`s over an mpsc channel and gets its answer back over a
//! per-call oneshot, so the connection can be driven from any number of
//! caller contexts without shared mutable state.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant as TokioInstant;

use crate::error::{Error, Result};
use crate::job::{build_job, Job, JobResult};
use crate::protocol::{self, ProtocolState, ServerNotification};
use crate::rpc::{Framer, MessageId, RpcFrame};
use crate::transport::Transport;

const READ_BUF_SIZE: usize = 8 * 1024;
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// A unit of work the façade hands to the I/O task.
pub enum Command {
    /// A raw JSON-RPC call, used for subscribe/authorize/suggest_difficulty.
    Call {
        method: String,
        params: Vec<Value>,
        timeout: Duration,
        respond_to: oneshot::Sender<Result<Value>>,
    },
    /// A share submission, checked against the job table before it is
    /// allowed onto the wire.
    Submit {
        job_result: JobResult,
        timeout: Duration,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    /// Builds a `Job` from the currently known notification without any
    /// network round trip.
    BuildJob {
        extranonce2: u64,
        respond_to: oneshot::Sender<Result<Job>>,
    },
    /// Seeds the extranonce state from a `mining.subscribe` response.
    /// Fire-and-forget: the façade already has the parsed values in hand,
    /// this just hands them to the state the wire-reading side owns.
    InitExtranonce {
        extranonce1: String,
        extranonce2_size: usize,
    },
    Stats {
        respond_to: oneshot::Sender<StatsSnapshot>,
    },
    Close,
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub last_activity: Option<SystemTime>,
    pub current_difficulty: f64,
    pub known_jobs: usize,
}

enum PendingKind {
    Raw(oneshot::Sender<Result<Value>>),
    Submit(oneshot::Sender<Result<bool>>),
}

struct PendingCall {
    kind: PendingKind,
    deadline: TokioInstant,
}

struct Counters {
    messages_sent: u64,
    messages_received: u64,
    errors: u64,
    last_activity: Option<SystemTime>,
}

impl Counters {
    fn new() -> Self {
        Self {
            messages_sent: 0,
            messages_received: 0,
            errors: 0,
            last_activity: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Some(SystemTime::now());
    }
}

/// Drives one connection's lifetime: reads and decodes frames, dispatches
/// notifications into protocol state, answers façade commands, and sweeps
/// calls that have outlived their deadline.
pub struct IoTask {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    framer: Framer,
    state: ProtocolState,
    pending_calls: HashMap<MessageId, PendingCall>,
    commands: mpsc::Receiver<Command>,
    worker_name: String,
    job_watch: watch::Sender<Option<String>>,
    counters: Counters,
}

impl IoTask {
    pub fn spawn(
        transport: Transport,
        worker_name: String,
        max_line_len: usize,
        commands: mpsc::Receiver<Command>,
    ) -> watch::Receiver<Option<String>> {
        let (reader, writer) = transport.into_parts();
        let (job_watch, job_watch_rx) = watch::channel(None);

        let mut task = IoTask {
            reader,
            writer,
            framer: Framer::with_max_line_len(max_line_len),
            state: ProtocolState::default(),
            pending_calls: HashMap::new(),
            commands,
            worker_name,
            job_watch,
            counters: Counters::new(),
        };

        tokio::spawn(async move {
            task.run().await;
        });

        job_watch_rx
    }

    async fn run(&mut self) {
        let mut read_buf = vec![0u8; READ_BUF_SIZE];
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(Command::Close) | None => {
                            self.fail_all_pending(Error::OwnerGone);
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                    }
                }

                read = self.reader.read(&mut read_buf) => {
                    match read {
                        Ok(0) => {
                            log::warn!(target: "stratum", "pool closed the connection");
                            self.fail_all_pending(Error::Transport("connection closed by peer".into()));
                            break;
                        }
                        Ok(n) => {
                            match self.on_bytes(&read_buf[..n]).await {
                                Ok(true) => break,
                                Ok(false) => {}
                                Err(e) => {
                                    log::error!(target: "stratum", "framing error, closing connection: {e}");
                                    self.counters.errors += 1;
                                    self.fail_all_pending(e);
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            let err = Error::from(e);
                            log::error!(target: "stratum", "transport read error: {err}");
                            self.counters.errors += 1;
                            self.fail_all_pending(err);
                            break;
                        }
                    }
                }

                _ = sweep.tick() => {
                    self.sweep_timeouts();
                }
            }
        }
    }

    /// Feeds a chunk of bytes through the framer and dispatches the
    /// resulting frames. Returns `Ok(true)` when a notification has
    /// requested the connection close (e.g. `client.reconnect`); the caller
    /// must stop reading and break out of the event loop in that case.
    async fn on_bytes(&mut self, chunk: &[u8]) -> Result<bool> {
        let frames = self.framer.feed(chunk)?;
        for frame in frames {
            self.counters.touch();
            self.counters.messages_received += 1;
            match frame {
                RpcFrame::Notification { method, params } => {
                    if self.handle_notification(&method, &params).await {
                        return Ok(true);
                    }
                }
                RpcFrame::Response { id, outcome, .. } => {
                    self.handle_response(id, outcome);
                }
            }
        }
        Ok(false)
    }

    /// Returns `true` if the caller should stop reading and close the
    /// connection.
    async fn handle_notification(&mut self, method: &str, params: &[Value]) -> bool {
        let parsed = match protocol::parse_notification(method, params) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!(target: "stratum", "dropping malformed {method} notification: {e}");
                self.counters.errors += 1;
                return false;
            }
        };

        match parsed {
            ServerNotification::Notify(job) => {
                let job_id = job.job_id.clone();
                self.state.apply_notify(job);
                let _ = self.job_watch.send(Some(job_id));
                false
            }
            ServerNotification::SetDifficulty(difficulty) => {
                self.state.apply_set_difficulty(difficulty);
                false
            }
            ServerNotification::SetExtranonce {
                extranonce1,
                extranonce2_size,
            } => {
                self.state.apply_set_extranonce(extranonce1, extranonce2_size);
                false
            }
            ServerNotification::Reconnect => {
                log::info!(target: "stratum", "pool requested client.reconnect, closing");
                self.fail_all_pending(Error::Transport("pool requested reconnect".into()));
                if let Err(e) = self.writer.shutdown().await {
                    log::warn!(target: "stratum", "error shutting down writer during reconnect close: {e}");
                }
                true
            }
            ServerNotification::Unknown(_) => false,
        }
    }

    fn handle_response(&mut self, id: MessageId, outcome: std::result::Result<Value, Value>) {
        let Some(pending) = self.pending_calls.remove(&id) else {
            return;
        };
        match pending.kind {
            PendingKind::Raw(respond_to) => {
                let result = outcome.map_err(|e| Error::Rpc(e.to_string()));
                let _ = respond_to.send(result);
            }
            PendingKind::Submit(respond_to) => {
                let result = outcome.map_err(|e| Error::Rpc(e.to_string())).and_then(|value| {
                    value.as_bool().ok_or_else(|| {
                        Error::ProtocolShape(format!(
                            "mining.submit result was not a boolean: {value}"
                        ))
                    })
                });
                let _ = respond_to.send(result);
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Close => unreachable!("handled in run()"),
            Command::Call {
                method,
                params,
                timeout,
                respond_to,
            } => {
                if let Err(e) = self.send_call(&method, params, timeout, PendingKind::Raw(respond_to)).await {
                    log::error!(target: "stratum", "failed to send {method}: {e}");
                }
            }
            Command::Submit {
                job_result,
                timeout,
                respond_to,
            } => {
                let Some(snapshot) = self.state.job_table.get(&job_result.job_id).cloned() else {
                    let _ = respond_to.send(Err(Error::LocalReject(format!(
                        "job {} is no longer known to this connection",
                        job_result.job_id
                    ))));
                    return;
                };
                let params = protocol::submit_params(&self.worker_name, &job_result, &snapshot);
                if let Err(e) = self
                    .send_call(
                        protocol::MINING_SUBMIT,
                        params,
                        timeout,
                        PendingKind::Submit(respond_to),
                    )
                    .await
                {
                    log::error!(target: "stratum", "failed to send mining.submit: {e}");
                }
            }
            Command::BuildJob {
                extranonce2,
                respond_to,
            } => {
                let result = match &self.state.current_notification {
                    Some(notification) => build_job(
                        notification,
                        &self.state.extranonce.extranonce1,
                        extranonce2,
                        self.state.extranonce.extranonce2_size,
                        self.state.difficulty.0,
                    ),
                    None => Err(Error::ProtocolShape("no job has been received yet".into())),
                };
                let _ = respond_to.send(result);
            }
            Command::InitExtranonce {
                extranonce1,
                extranonce2_size,
            } => {
                self.state.apply_set_extranonce(extranonce1, extranonce2_size);
            }
            Command::Stats { respond_to } => {
                let snapshot = StatsSnapshot {
                    messages_sent: self.counters.messages_sent,
                    messages_received: self.counters.messages_received,
                    errors: self.counters.errors,
                    last_activity: self.counters.last_activity,
                    current_difficulty: self.state.difficulty.0,
                    known_jobs: self.state.job_table.len(),
                };
                let _ = respond_to.send(snapshot);
            }
        }
    }

    async fn send_call(
        &mut self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
        kind: PendingKind,
    ) -> Result<()> {
        let (id, bytes) = self.framer.encode_request(method, params);
        if let Err(e) = self.writer.write_all(&bytes).await {
            self.framer.forget(id);
            let err = Error::from(e);
            self.fail_one(kind, err.clone());
            return Err(err);
        }
        self.counters.messages_sent += 1;
        self.counters.touch();

        let deadline = TokioInstant::now() + timeout;
        self.pending_calls.insert(id, PendingCall { kind, deadline });
        Ok(())
    }

    fn fail_one(&mut self, kind: PendingKind, err: Error) {
        match kind {
            PendingKind::Raw(respond_to) => {
                let _ = respond_to.send(Err(err));
            }
            PendingKind::Submit(respond_to) => {
                let _ = respond_to.send(Err(err));
            }
        }
    }

    fn sweep_timeouts(&mut self) {
        let now = TokioInstant::now();
        let expired: Vec<MessageId> = self
            .pending_calls
            .iter()
            .filter(|(_, call)| call.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            self.framer.forget(id);
            if let Some(pending) = self.pending_calls.remove(&id) {
                self.fail_one(pending.kind, Error::Timeout);
            }
        }
    }

    fn fail_all_pending(&mut self, err: Error) {
        for (_, pending) in self.pending_calls.drain() {
            self.fail_one(pending.kind, err.clone());
        }
    }
}
