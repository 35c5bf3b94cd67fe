//! Test doubles for code built on the session.
//!
//! - [`ScriptedGateway`] answers commands from a script, with no transport
//! - [`MockBackend`] plays the bridge end of an in-memory connection
//! - [`wait_for`] waits until a session snapshot satisfies a predicate

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    sync::oneshot,
};
use transport::{
    FrameReader, FrameWriter, OutgoingEvent, OutgoingMessage, OutgoingResponse, Request, Seq,
    testing::{MemoryTransport, frame_message, split_bridge},
};

use crate::{
    config::SessionConfig,
    connection::{self, TransportGateway},
    error::{Result, SessionError},
    events::EventChannel,
    gateway::{Command, CommandGateway},
    reconciler::{SessionReconciler, SessionSnapshot},
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

enum Scripted {
    Reply(Value),
    Reject(String),
    Deferred(oneshot::Receiver<std::result::Result<Value, String>>),
}

#[derive(Default)]
struct Script {
    queued: HashMap<&'static str, VecDeque<Scripted>>,
    fallback: HashMap<&'static str, Value>,
    calls: Vec<Command>,
}

/// A [`CommandGateway`] that answers from a per-command script.
///
/// Scripted answers for a command are used once each, in order. When a
/// command has none left, the [`always`](Self::always) answer is used if
/// there is one; otherwise the call is rejected. Clones share the script.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: &'static str, answer: Scripted) {
        self.script
            .lock()
            .queued
            .entry(command)
            .or_default()
            .push_back(answer);
    }

    /// Answer the next `command` call with `body`.
    pub fn reply(&self, command: &'static str, body: Value) {
        self.push(command, Scripted::Reply(body));
    }

    /// Fail the next `command` call as a backend rejection.
    pub fn reject(&self, command: &'static str, message: &str) {
        self.push(command, Scripted::Reject(message.to_string()));
    }

    /// Hold the next `command` call open until the returned [`Release`] is
    /// used.
    pub fn defer(&self, command: &'static str) -> Release {
        let (tx, rx) = oneshot::channel();
        self.push(command, Scripted::Deferred(rx));
        Release { tx }
    }

    /// Answer every otherwise unscripted `command` call with `body`.
    pub fn always(&self, command: &'static str, body: Value) {
        self.script.lock().fallback.insert(command, body);
    }

    /// Every command received so far, in order.
    pub fn calls(&self) -> Vec<Command> {
        self.script.lock().calls.clone()
    }

    pub fn calls_to(&self, command: &str) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| c.name() == command)
            .count()
    }

    fn next_answer(&self, command: &Command) -> Option<Scripted> {
        let mut script = self.script.lock();
        script.calls.push(command.clone());
        let name = command.name();
        if let Some(answer) = script.queued.get_mut(name).and_then(VecDeque::pop_front) {
            return Some(answer);
        }
        script.fallback.get(name).cloned().map(Scripted::Reply)
    }
}

impl CommandGateway for ScriptedGateway {
    async fn call(&self, command: Command) -> Result<Option<Value>> {
        let name = command.name();
        let rejection = |message: String| SessionError::BackendRejection {
            command: name.to_string(),
            message,
        };

        match self.next_answer(&command) {
            Some(Scripted::Reply(body)) => Ok(Some(body)),
            Some(Scripted::Reject(message)) => Err(rejection(message)),
            Some(Scripted::Deferred(rx)) => match rx.await {
                Ok(Ok(body)) => Ok(Some(body)),
                Ok(Err(message)) => Err(rejection(message)),
                Err(_) => Err(rejection("released without an answer".to_string())),
            },
            None => Err(rejection(format!("unscripted command {name}"))),
        }
    }
}

/// Completes a call held open by [`ScriptedGateway::defer`].
pub struct Release {
    tx: oneshot::Sender<std::result::Result<Value, String>>,
}

impl Release {
    pub fn succeed(self, body: Value) {
        let _ = self.tx.send(Ok(body));
    }

    pub fn fail(self, message: &str) {
        let _ = self.tx.send(Err(message.to_string()));
    }
}

/// The bridge end of an in-memory connection.
///
/// Reads the session's requests and writes responses and events the way a
/// real bridge would. Dropping it closes the connection.
pub struct MockBackend {
    reader: FrameReader<DuplexStream, Request>,
    writer: FrameWriter<DuplexStream>,
    sequence_number: Seq,
    backlog: VecDeque<Request>,
}

impl MockBackend {
    /// Connect a [`TransportGateway`] to a new mock backend.
    pub fn connect(
        config: &SessionConfig,
    ) -> (TransportGateway<DuplexStream>, EventChannel, MockBackend) {
        let (session_end, bridge_end) = MemoryTransport::pair();
        let (reader, writer) = transport::split(session_end);
        let (gateway, events) = connection::from_transport(reader, writer, config);
        let (reader, writer) = split_bridge(bridge_end);
        let backend = MockBackend {
            reader,
            writer,
            sequence_number: 1,
            backlog: VecDeque::new(),
        };
        (gateway, events, backend)
    }

    fn next_seq(&mut self) -> Seq {
        let seq = self.sequence_number;
        self.sequence_number += 1;
        seq
    }

    /// Wait for a request for `command`. Requests for other commands that
    /// arrive first are kept for later calls.
    pub async fn expect_request(&mut self, command: &str) -> Request {
        if let Some(i) = self.backlog.iter().position(|r| r.command == command) {
            if let Some(request) = self.backlog.remove(i) {
                return request;
            }
        }

        let wait = async {
            loop {
                match self.reader.next().await {
                    Some(Ok(request)) if request.command == command => return request,
                    Some(Ok(request)) => self.backlog.push_back(request),
                    Some(Err(e)) => panic!("reading request: {e}"),
                    None => panic!("session closed while waiting for {command}"),
                }
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {command}"))
    }

    async fn write(&mut self, message: OutgoingMessage) {
        self.writer
            .send(message)
            .await
            .expect("writing to the session");
    }

    pub async fn respond(&mut self, request: &Request, body: Value) {
        let seq = self.next_seq();
        self.write(OutgoingMessage::Response(OutgoingResponse {
            seq,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body: Some(body),
        }))
        .await;
    }

    pub async fn reject(&mut self, request: &Request, message: &str) {
        let seq = self.next_seq();
        self.write(OutgoingMessage::Response(OutgoingResponse {
            seq,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.to_string()),
            body: None,
        }))
        .await;
    }

    pub async fn send_event(&mut self, event: &str, body: Value) {
        let seq = self.next_seq();
        self.write(OutgoingMessage::Event(OutgoingEvent {
            seq,
            event: event.to_string(),
            body: Some(body),
        }))
        .await;
    }

    /// Push an async indication such as `stopped` or `thread-created`.
    pub async fn indication(&mut self, indication: &str, result: Value) {
        self.send_event("async", json!({"indication": indication, "result": result}))
            .await;
    }

    pub async fn console(&mut self, text: &str) {
        self.send_event("console", json!(text)).await;
    }

    /// Write `body` as a frame as is, whether or not it is a valid message.
    pub async fn send_raw(&mut self, body: Value) {
        self.writer
            .get_mut()
            .write_all(&frame_message(&body))
            .await
            .expect("writing to the session");
    }

    pub async fn heartbeat(&mut self) {
        let seq = self.next_seq();
        self.write(OutgoingMessage::Event(OutgoingEvent {
            seq,
            event: "heartbeat".to_string(),
            body: None,
        }))
        .await;
    }
}

/// Deterministic random source for interleaving tests.
#[cfg(test)]
pub(crate) fn seeded_rng(seed: u64) -> rand::rngs::StdRng {
    use rand::SeedableRng;
    rand::rngs::StdRng::seed_from_u64(seed)
}

/// Wait until the session's state satisfies `pred`, and return the snapshot
/// that did. Panics after a few seconds, naming `what` was awaited.
pub async fn wait_for<G, F>(session: &SessionReconciler<G>, what: &str, pred: F) -> SessionSnapshot
where
    G: CommandGateway + 'static,
    F: Fn(&SessionSnapshot) -> bool,
{
    let mut revisions = session.subscribe();
    let wait = async {
        loop {
            let snapshot = session.snapshot();
            if pred(&snapshot) {
                return snapshot;
            }
            if revisions.changed().await.is_err() {
                panic!("session dropped while waiting for {what}");
            }
        }
    };
    tokio::time::timeout(WAIT_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
