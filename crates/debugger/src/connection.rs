//! A backend connection over a framed transport.
//!
//! [`from_transport`] splits the connection into the two paths the session
//! works with: a [`TransportGateway`] for commands and an [`EventChannel`]
//! for notifications. A single reader task feeds both.

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::ToSocketAddrs,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use transport::{FrameReader, FrameWriter, Message, OutgoingMessage, Request};

use crate::{
    config::SessionConfig,
    error::{Result, SessionError, TransportError},
    events::{self, EventChannel, EventSender, Notification},
    gateway::{Command, CommandGateway},
    pending_requests::PendingRequests,
};

/// [`CommandGateway`] over the writer half of a transport.
pub struct TransportGateway<W> {
    writer: tokio::sync::Mutex<FrameWriter<W>>,
    sequence_number: AtomicI64,
    pending: Arc<Mutex<PendingRequests>>,
    timeout: Duration,
    cancel_token: CancellationToken,
    reader_handle: Option<JoinHandle<()>>,
}

impl<W> TransportGateway<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_and_wait(&self, command: Command) -> Result<Option<Value>> {
        let name = command.name();
        let seq = self.sequence_number.fetch_add(1, Ordering::SeqCst);

        // registered before sending so a fast response cannot slip past
        let response_rx = self
            .pending
            .lock()
            .insert(seq, name)
            .ok_or(SessionError::SessionClosed)?;

        let request = OutgoingMessage::Request(Request {
            seq,
            command: name.to_string(),
            arguments: command.arguments(),
        });

        let sent = self.writer.lock().await.send(request).await;
        if let Err(source) = sent {
            tracing::error!(error = %source, command = name, "sending request");
            self.pending.lock().remove(seq);
            return Err(TransportError::Send {
                command: name.to_string(),
                source,
            }
            .into());
        }

        let response = match tokio::time::timeout(self.timeout, response_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(TransportError::Disconnected {
                    command: name.to_string(),
                }
                .into());
            }
            Err(_) => {
                tracing::warn!(seq, command = name, timeout = ?self.timeout, "request timed out");
                self.pending.lock().remove(seq);
                return Err(TransportError::Timeout {
                    command: name.to_string(),
                    timeout: self.timeout,
                }
                .into());
            }
        };

        if response.success {
            Ok(response.body)
        } else {
            let message = response.message.unwrap_or_default();
            tracing::debug!(command = name, %message, "backend rejected command");
            Err(SessionError::BackendRejection {
                command: name.to_string(),
                message,
            })
        }
    }

    /// Whether the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.pending.lock().is_closed()
    }
}

impl<W> CommandGateway for TransportGateway<W>
where
    W: AsyncWrite + Unpin + Send,
{
    #[tracing::instrument(skip(self), fields(command = command.name()))]
    async fn call(&self, command: Command) -> Result<Option<Value>> {
        self.send_and_wait(command).await
    }
}

impl<W> Drop for TransportGateway<W> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }
}

/// Wire up a session over an already split transport.
///
/// Must be called from within a tokio runtime.
pub fn from_transport<R, W>(
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    config: &SessionConfig,
) -> (TransportGateway<W>, EventChannel)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    let (event_tx, event_rx) = events::channel();
    let pending = Arc::new(Mutex::new(PendingRequests::new()));
    let cancel_token = CancellationToken::new();

    let reader_handle = spawn_reader_task(reader, pending.clone(), event_tx, cancel_token.clone());

    let gateway = TransportGateway {
        writer: tokio::sync::Mutex::new(writer),
        sequence_number: AtomicI64::new(1),
        pending,
        timeout: config.request_timeout(),
        cancel_token,
        reader_handle: Some(reader_handle),
    };
    (gateway, event_rx)
}

/// Connect to a bridge over TCP.
pub async fn connect(
    addr: impl ToSocketAddrs,
    config: &SessionConfig,
) -> std::io::Result<(
    TransportGateway<tokio::net::tcp::OwnedWriteHalf>,
    EventChannel,
)> {
    let (reader, writer) = transport::connect(addr).await?;
    Ok(from_transport(reader, writer, config))
}

fn spawn_reader_task<R>(
    mut reader: FrameReader<R>,
    pending: Arc<Mutex<PendingRequests>>,
    event_tx: EventSender,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("reader task cancelled");
                    break;
                }
                msg = reader.next() => {
                    match msg {
                        Some(Ok(Message::Response(response))) => {
                            let request_seq = response.request_seq;
                            if !pending.lock().complete(response) {
                                tracing::warn!(request_seq, "response for unknown or abandoned request");
                            }
                        }
                        Some(Ok(Message::Event(event))) => {
                            match Notification::from_event(&event) {
                                Ok(notification) => {
                                    tracing::trace!(?notification, "event");
                                    if event_tx.send(notification).is_err() {
                                        tracing::debug!("event receiver dropped");
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, event = %event.event, "skipping malformed event");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "transport error");
                            break;
                        }
                        None => {
                            tracing::debug!("transport closed");
                            break;
                        }
                    }
                }
            }
        }

        let abandoned = pending.lock().close();
        if abandoned > 0 {
            tracing::debug!(abandoned, "connection ended with calls in flight");
        }
        // dropping event_tx closes the event channel
    })
}
