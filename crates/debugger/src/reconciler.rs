//! The debugger session.
//!
//! [`SessionReconciler`] owns the thread registry, selection, breakpoints and
//! variables. A single event loop applies backend notifications in order;
//! user commands go through the gateway concurrently with it. Neither ever
//! holds a lock across a backend call: state is read, the call is made, and
//! the result is applied only if it still belongs to the current state.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{StreamExt, stream::FuturesUnordered};
use parking_lot::Mutex;
use tokio::{net::ToSocketAddrs, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    breakpoints::BreakpointRegistry,
    config::{ExecutionMode, SessionConfig},
    connection::{self, TransportGateway},
    error::{Result, SessionError},
    events::{EventChannel, LogLine, LogOrigin, Notification},
    gateway::{Command, CommandGateway, GatewayExt},
    model::{Effect, SessionModel},
    types::{Breakpoint, BreakpointId, Thread, ThreadId, VariableNode},
    variables::{ExpandOutcome, VariableTreeCache},
};

/// A consistent copy of everything the session knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub mode: ExecutionMode,
    /// In the order they were first seen.
    pub threads: Vec<Thread>,
    /// The selected thread and its selected frame.
    pub selected: Option<(ThreadId, usize)>,
    pub execution_enabled: bool,
    pub breakpoints: Vec<Breakpoint>,
    pub variables: Vec<VariableNode>,
    pub closed: bool,
}

impl SessionSnapshot {
    pub fn thread(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| &t.id == id)
    }

    pub fn selected_thread(&self) -> Option<&ThreadId> {
        self.selected.as_ref().map(|(id, _)| id)
    }
}

/// A backend fetch started on behalf of a state change.
#[derive(Debug)]
enum Fetch {
    ThreadInfo(ThreadId),
    Stack { thread: ThreadId, epoch: u64 },
    ThreadIds { mark_stopped: bool, transitions: u64 },
    FrameVariables {
        thread: ThreadId,
        level: usize,
        generation: u64,
    },
    Breakpoints,
}

struct Inner<G> {
    gateway: G,
    model: Mutex<SessionModel>,
    breakpoints: BreakpointRegistry,
    variables: VariableTreeCache,
    console: Mutex<VecDeque<LogLine>>,
    log_capacity: usize,
    expand_roots_on_load: bool,
    closed: AtomicBool,
    revision: watch::Sender<u64>,
}

impl<G> Inner<G>
where
    G: CommandGateway + 'static,
{
    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(SessionError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("debugger session closed");
            self.notify();
        }
    }

    /// Apply a change to the model and turn the effects it calls for into
    /// fetches. Variable clears happen under the model lock so the
    /// generation captured for a variable fetch belongs to this change.
    fn try_update<F>(&self, f: F) -> Result<Vec<Fetch>>
    where
        F: FnOnce(&mut SessionModel) -> Result<Vec<Effect>>,
    {
        let fetches = {
            let mut model = self.model.lock();
            let effects = f(&mut model)?;
            self.plan(effects)
        };
        self.notify();
        Ok(fetches)
    }

    fn update<F>(&self, f: F) -> Vec<Fetch>
    where
        F: FnOnce(&mut SessionModel) -> Vec<Effect>,
    {
        let fetches = {
            let mut model = self.model.lock();
            let effects = f(&mut model);
            self.plan(effects)
        };
        self.notify();
        fetches
    }

    fn plan(&self, effects: Vec<Effect>) -> Vec<Fetch> {
        let mut fetches = Vec::new();
        for effect in effects {
            match effect {
                Effect::ClearVariables => {
                    self.variables.clear();
                }
                Effect::FetchThreadInfo(id) => fetches.push(Fetch::ThreadInfo(id)),
                Effect::FetchStack { thread, epoch } => fetches.push(Fetch::Stack { thread, epoch }),
                Effect::FetchThreadIds {
                    mark_stopped,
                    transitions,
                } => fetches.push(Fetch::ThreadIds {
                    mark_stopped,
                    transitions,
                }),
                Effect::FetchFrameVariables { thread, level } => {
                    fetches.push(Fetch::FrameVariables {
                        thread,
                        level,
                        generation: self.variables.generation(),
                    })
                }
            }
        }
        fetches
    }

    fn spawn_fetches(self: &Arc<Self>, fetches: Vec<Fetch>) {
        if fetches.is_empty() {
            return;
        }
        tokio::spawn(self.clone().run_fetches(fetches));
    }

    /// Run fetches and whatever fetches their results call for, without
    /// blocking the event loop.
    async fn run_fetches(self: Arc<Self>, fetches: Vec<Fetch>) {
        let mut in_flight: FuturesUnordered<_> = fetches.into_iter().map(|f| self.fetch(f)).collect();
        while let Some(result) = in_flight.next().await {
            match result {
                Ok(next) => in_flight.extend(next.into_iter().map(|f| self.fetch(f))),
                Err(e) if self.is_closed() => {
                    tracing::debug!(error = %e, "fetch failed after session closed");
                }
                Err(e) => tracing::warn!(error = %e, "follow-up fetch failed"),
            }
        }
    }

    async fn fetch(&self, fetch: Fetch) -> Result<Vec<Fetch>> {
        if self.is_closed() {
            return Ok(Vec::new());
        }
        tracing::debug!(?fetch, "fetching");
        match fetch {
            Fetch::ThreadInfo(id) => match self.gateway.thread_info(&id).await? {
                Some(details) => Ok(self.update(|model| model.thread_info_fetched(details))),
                None => {
                    tracing::debug!(thread = %id, "backend has no details for thread");
                    Ok(Vec::new())
                }
            },
            Fetch::Stack { thread, epoch } => {
                let frames = self.gateway.stack_list(&thread).await?;
                Ok(self.update(|model| model.stack_fetched(&thread, epoch, frames)))
            }
            Fetch::ThreadIds {
                mark_stopped,
                transitions,
            } => {
                let ids = self.gateway.thread_list_ids().await?;
                Ok(self.update(|model| model.thread_ids_fetched(ids, mark_stopped, transitions)))
            }
            Fetch::FrameVariables {
                thread,
                level,
                generation,
            } => {
                let variables = self.gateway.variables_list(&thread, level).await?;
                let expandable: Vec<String> = if self.expand_roots_on_load {
                    variables
                        .iter()
                        .filter(|v| v.child_count > 0)
                        .map(|v| v.name.clone())
                        .collect()
                } else {
                    Vec::new()
                };
                if self.variables.set_roots_if_current(generation, variables).is_none() {
                    return Ok(Vec::new());
                }
                self.notify();

                for expression in expandable {
                    match self.variables.expand(&self.gateway, &expression).await {
                        Ok(ExpandOutcome::Stale) => break,
                        Ok(_) => self.notify(),
                        Err(e) => tracing::warn!(error = %e, %expression, "expanding variable"),
                    }
                }
                Ok(Vec::new())
            }
            Fetch::Breakpoints => {
                self.breakpoints.refresh(&self.gateway).await?;
                self.notify();
                Ok(Vec::new())
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn handle(self: &Arc<Self>, notification: Notification) {
        match notification {
            Notification::Log(line) => {
                match line.origin {
                    LogOrigin::Console | LogOrigin::Target => {
                        tracing::debug!(origin = ?line.origin, text = %line.text.trim_end(), "output");
                    }
                    LogOrigin::Backend => tracing::debug!(text = %line.text.trim_end(), "backend log"),
                }
                self.push_log(line);
                self.notify();
            }
            Notification::Heartbeat => tracing::trace!("heartbeat"),
            Notification::Indication(indication) => {
                let fetches = self.update(|model| model.apply(&indication));
                self.spawn_fetches(fetches);
            }
        }
    }

    fn push_log(&self, line: LogLine) {
        if self.log_capacity == 0 {
            return;
        }
        let mut console = self.console.lock();
        while console.len() >= self.log_capacity {
            console.pop_front();
        }
        console.push_back(line);
    }

    async fn run_events(self: Arc<Self>, mut events: EventChannel, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("event loop cancelled");
                    break;
                }
                notification = events.recv() => match notification {
                    Some(notification) => self.handle(notification),
                    None => {
                        tracing::debug!("event channel closed");
                        self.close();
                        break;
                    }
                }
            }
        }
    }
}

/// A debugger session reconciling backend events with user commands.
///
/// Queries are synchronous and cheap; use [`subscribe`](Self::subscribe) to
/// learn when something changed.
pub struct SessionReconciler<G> {
    inner: Arc<Inner<G>>,
    cancel_token: CancellationToken,
    event_handle: Option<JoinHandle<()>>,
}

impl SessionReconciler<TransportGateway<tokio::net::tcp::OwnedWriteHalf>> {
    /// Connect to a bridge over TCP and start a session.
    pub async fn connect(addr: impl ToSocketAddrs, config: &SessionConfig) -> std::io::Result<Self> {
        let (gateway, events) = connection::connect(addr, config).await?;
        Ok(Self::start(gateway, events, config))
    }
}

impl<G> SessionReconciler<G>
where
    G: CommandGateway + 'static,
{
    /// Start the event loop and load the breakpoint table.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(gateway: G, events: EventChannel, config: &SessionConfig) -> Self {
        let (revision, _) = watch::channel(0);
        let inner = Arc::new(Inner {
            gateway,
            model: Mutex::new(SessionModel::new(config.mode, config.reset_frame_on_deselect)),
            breakpoints: BreakpointRegistry::new(),
            variables: VariableTreeCache::new(),
            console: Mutex::new(VecDeque::new()),
            log_capacity: config.log_capacity,
            expand_roots_on_load: config.expand_roots_on_load,
            closed: AtomicBool::new(false),
            revision,
        });
        tracing::debug!(mode = ?config.mode, "starting session");

        let cancel_token = CancellationToken::new();
        let event_handle = tokio::spawn(inner.clone().run_events(events, cancel_token.clone()));
        inner.spawn_fetches(vec![Fetch::Breakpoints]);

        Self {
            inner,
            cancel_token,
            event_handle: Some(event_handle),
        }
    }

    /// Step over the current line in the selected thread.
    #[tracing::instrument(skip(self))]
    pub async fn next(&self) -> Result<()> {
        self.gated(Command::ExecNext).await
    }

    /// Step into the current line in the selected thread.
    #[tracing::instrument(skip(self))]
    pub async fn step(&self) -> Result<()> {
        self.gated(Command::ExecStep).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn continue_(&self) -> Result<()> {
        self.gated(Command::ExecContinue).await
    }

    async fn gated(&self, command: Command) -> Result<()> {
        self.inner.ensure_open()?;
        if !self.inner.model.lock().execution_enabled() {
            return Err(SessionError::ExecutionDisabled);
        }
        self.inner.gateway.call(command).await?;
        Ok(())
    }

    async fn pass_through(&self, command: Command) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.gateway.call(command).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn interrupt(&self) -> Result<()> {
        self.pass_through(Command::ExecInterrupt).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        self.pass_through(Command::ExecRun).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_args(&self, args: Vec<String>) -> Result<()> {
        self.pass_through(Command::ExecSetArgs { args }).await
    }

    /// Ask the backend to exit. The session closes when the backend goes
    /// away.
    #[tracing::instrument(skip(self))]
    pub async fn exit(&self) -> Result<()> {
        self.pass_through(Command::GdbExit).await
    }

    /// Make `id` the current thread, on the backend first and then locally.
    #[tracing::instrument(skip(self))]
    pub async fn select_thread(&self, id: &ThreadId) -> Result<()> {
        self.inner.ensure_open()?;
        if !self.inner.model.lock().threads().contains(id) {
            return Err(SessionError::UnknownThread(id.clone()));
        }
        self.inner
            .gateway
            .call(Command::ThreadSelect {
                thread_id: id.clone(),
            })
            .await?;

        let fetches = self.inner.try_update(|model| model.select_thread(id))?;
        self.inner.spawn_fetches(fetches);
        Ok(())
    }

    /// Remember `level` as the frame of interest for `thread`. If the thread
    /// is selected and stopped, its variables are fetched for that frame.
    #[tracing::instrument(skip(self))]
    pub fn select_frame(&self, thread: &ThreadId, level: usize) -> Result<()> {
        self.inner.ensure_open()?;
        let fetches = self
            .inner
            .try_update(|model| model.select_frame(thread, level))?;
        self.inner.spawn_fetches(fetches);
        Ok(())
    }

    pub async fn insert_breakpoint(&self, location: &str) -> Result<Breakpoint> {
        self.inner.ensure_open()?;
        let breakpoint = self.inner.breakpoints.insert(&self.inner.gateway, location).await?;
        self.inner.notify();
        Ok(breakpoint)
    }

    pub async fn enable_breakpoint(&self, id: &BreakpointId) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.breakpoints.enable(&self.inner.gateway, id).await?;
        self.inner.notify();
        Ok(())
    }

    pub async fn disable_breakpoint(&self, id: &BreakpointId) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.breakpoints.disable(&self.inner.gateway, id).await?;
        self.inner.notify();
        Ok(())
    }

    pub async fn refresh_breakpoints(&self) -> Result<usize> {
        self.inner.ensure_open()?;
        let added = self.inner.breakpoints.refresh(&self.inner.gateway).await?;
        self.inner.notify();
        Ok(added)
    }

    /// Fetch the children of a root variable.
    pub async fn expand(&self, expression: &str) -> Result<ExpandOutcome> {
        self.inner.ensure_open()?;
        let outcome = self.inner.variables.expand(&self.inner.gateway, expression).await?;
        if matches!(outcome, ExpandOutcome::Expanded(_)) {
            self.inner.notify();
        }
        Ok(outcome)
    }

    /// Evaluate an expression in the current frame and add it to the
    /// variables. `None` if the frame changed before the result arrived.
    pub async fn create_watch(&self, expression: &str) -> Result<Option<VariableNode>> {
        self.inner.ensure_open()?;
        let node = self.inner.variables.create_watch(&self.inner.gateway, expression).await?;
        if node.is_some() {
            self.inner.notify();
        }
        Ok(node)
    }

    /// Text of a source file, as the backend sees it.
    pub async fn source(&self, path: &str) -> Result<String> {
        self.inner.ensure_open()?;
        self.inner.gateway.file_get(path).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let model = self.inner.model.lock();
        let closed = self.inner.is_closed();
        SessionSnapshot {
            mode: model.mode(),
            threads: model.threads().iter().cloned().collect(),
            selected: model
                .selection()
                .current()
                .map(|(id, level)| (id.clone(), level)),
            execution_enabled: !closed && model.execution_enabled(),
            breakpoints: self.inner.breakpoints.list(),
            variables: self.inner.variables.list(),
            closed,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.model.lock().mode()
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.inner.model.lock().threads().iter().cloned().collect()
    }

    pub fn thread(&self, id: &ThreadId) -> Option<Thread> {
        self.inner.model.lock().threads().get(id).cloned()
    }

    pub fn selected_thread(&self) -> Option<ThreadId> {
        self.inner.model.lock().selection().selected().cloned()
    }

    /// The remembered frame of `thread`, 0 if none was chosen.
    pub fn selected_frame(&self, thread: &ThreadId) -> usize {
        self.inner.model.lock().selection().selected_frame(thread)
    }

    /// Whether step, next and continue are currently allowed.
    pub fn execution_enabled(&self) -> bool {
        !self.inner.is_closed() && self.inner.model.lock().execution_enabled()
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.inner.breakpoints.list()
    }

    pub fn variables(&self) -> Vec<VariableNode> {
        self.inner.variables.list()
    }

    /// Recent log lines, oldest first.
    pub fn console(&self) -> Vec<LogLine> {
        self.inner.console.lock().iter().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// A receiver whose value changes after every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

impl<G> Drop for SessionReconciler<G> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.event_handle.take() {
            handle.abort();
        }
    }
}
