//! The console owns the rules, the log, the counters and the attached transports.
//!
//! It runs as a single task.
//! Everything else talks to it through a [`ConsoleHandle`], so all state
//! changes are serialized and a scheduled response can never observe a
//! half-applied edit.

use std::{
    collections::BTreeMap,
    fmt::{Debug, Display},
};

use futures::{channel::mpsc, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::Config,
    encoding,
    engine::{Counter, Counters, EngineState},
    error::Error,
    log_store::{LogEntry, LogKind, LogStats, LogStore},
    matcher::Matcher,
    rule::{ActionKind, Rule, RuleId, RuleStatus},
    scheduler::{PendingResponse, ResponseScheduler, ResponseTicket},
    store::{ImportReport, RuleStore},
    transport::{Inbound, Outbound, Transport, TransportKind},
};

/// What became of one inbound data unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundOutcome {
    /// Whether rules were evaluated at all (the engine was enabled).
    pub evaluated: bool,

    /// Every matching rule, in active set order.
    pub matched: Vec<RuleId>,

    /// The response scheduled for the first match.
    pub scheduled: Option<ResponseTicket>,
}

/// Actions available to ask of the console.
pub(crate) enum Action {
    SetEngine(bool),
    ToggleEngine,
    EngineEnabled,

    AddRule(Rule),
    UpdateRule(Rule),
    RemoveRules(Vec<RuleId>),
    ToggleRule(RuleId),
    ImportRules { json: String, activate: bool },
    ExportRules,
    ActiveRules,
    Library,
    SearchLibrary(String),

    Connect(Box<dyn Transport>),
    Disconnect(TransportKind),
    Receive(TransportKind, Inbound),
    Send(TransportKind, Outbound),

    Counters(TransportKind),
    ResetCounters(TransportKind),

    Logs,
    ClearLogs,
    SubscribeToLogs,
    Stats,

    CancelResponse(ResponseTicket),
    PendingResponses,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::SetEngine(enabled) => write!(f, "set engine: {enabled}"),
            Action::ToggleEngine => write!(f, "toggle engine"),
            Action::EngineEnabled => write!(f, "engine enabled?"),
            Action::AddRule(rule) => write!(f, "add rule: {}", rule.id),
            Action::UpdateRule(rule) => write!(f, "update rule: {}", rule.id),
            Action::RemoveRules(ids) => write!(f, "remove {} rule(s)", ids.len()),
            Action::ToggleRule(id) => write!(f, "toggle rule: {id}"),
            Action::ImportRules { activate, .. } => write!(f, "import rules (activate: {activate})"),
            Action::ExportRules => write!(f, "export rules"),
            Action::ActiveRules => write!(f, "active rules"),
            Action::Library => write!(f, "library"),
            Action::SearchLibrary(term) => write!(f, "search library: {term:?}"),
            Action::Connect(transport) => write!(f, "connect: {}", transport.kind()),
            Action::Disconnect(kind) => write!(f, "disconnect: {kind}"),
            Action::Receive(kind, inbound) => write!(f, "receive {} byte(s) on {kind}", inbound.len()),
            Action::Send(kind, _) => write!(f, "send on {kind}"),
            Action::Counters(kind) => write!(f, "counters of {kind}"),
            Action::ResetCounters(kind) => write!(f, "reset counters of {kind}"),
            Action::Logs => write!(f, "logs"),
            Action::ClearLogs => write!(f, "clear logs"),
            Action::SubscribeToLogs => write!(f, "subscribe to logs"),
            Action::Stats => write!(f, "stats"),
            Action::CancelResponse(ticket) => write!(f, "cancel response {ticket}"),
            Action::PendingResponses => write!(f, "pending responses"),
        }
    }
}

impl Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// Inform the console of events.
#[derive(Debug)]
pub(crate) enum Inform {
    /// A transport went away on its own, e.g. a serial port was unplugged.
    TransportLost {
        kind: TransportKind,
        reason: String,
    },
}

impl Display for Inform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inform::TransportLost { kind, reason } => write!(f, "lost {kind}: {reason}"),
        }
    }
}

pub(crate) struct Request {
    action: Action,
    response: oneshot::Sender<Result<ConsoleResponse, Error>>,
}

pub(crate) enum ConsoleMessage {
    Request(Request),
    Inform(Inform),
}

impl Debug for ConsoleMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleMessage::Request(request) => f
                .debug_struct("ConsoleMessage")
                .field("action", &request.action)
                .finish(),
            ConsoleMessage::Inform(i) => f
                .debug_struct("ConsoleMessage")
                .field("information", &i)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ConsoleResponse {
    Done,
    Flag(bool),
    Count(usize),
    Status(RuleStatus),
    Imported(ImportReport),
    Exported(String),
    Rules(Vec<Rule>),
    Received(InboundOutcome),
    Counter(Counter),
    Logs(Vec<LogEntry>),
    LogObserver(broadcast::Receiver<LogEntry>),
    Stats(LogStats),
}

macro_rules! expect_response {
    ($response:expr, $variant:ident) => {
        match $response {
            ConsoleResponse::$variant(value) => Ok(value),
            other => unreachable!("Unexpected console response: {other:?}"),
        }
    };
}

macro_rules! expect_done {
    ($response:expr) => {
        match $response {
            ConsoleResponse::Done => Ok(()),
            other => unreachable!("Unexpected console response: {other:?}"),
        }
    };
}

/// A handle to the console task.
///
/// Cheap to clone.
/// The console stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct ConsoleHandle(mpsc::UnboundedSender<ConsoleMessage>);

impl ConsoleHandle {
    /// Start a console task set up as configured.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &Config) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded::<ConsoleMessage>();

        let mut console = Console::new(config, requests_rx);

        tokio::spawn(async move { console.run().await }.instrument(info_span!("console")));

        ConsoleHandle(requests_tx)
    }

    /// Inform the console of some event.
    pub(crate) fn inform(&self, information: Inform) {
        if self
            .0
            .unbounded_send(ConsoleMessage::Inform(information))
            .is_err()
        {
            debug!("Console gone, dropping information");
        }
    }

    async fn perform_action(&self, action: Action) -> Result<ConsoleResponse, Error> {
        let (tx, rx) = oneshot::channel();

        self.0
            .unbounded_send(ConsoleMessage::Request(Request {
                action,
                response: tx,
            }))
            .map_err(|_| Error::ConsoleGone)?;

        rx.await.map_err(|_| Error::ConsoleGone)?
    }

    /// Enable or disable rule evaluation.
    /// Disabling cancels every pending response.
    pub async fn set_engine_enabled(&self, enabled: bool) -> Result<(), Error> {
        expect_done!(self.perform_action(Action::SetEngine(enabled)).await?)
    }

    /// Flip the engine, returning the new state.
    pub async fn toggle_engine(&self) -> Result<bool, Error> {
        expect_response!(
            self.perform_action(Action::ToggleEngine).await?,
            Flag
        )
    }

    /// Check if rules are evaluated.
    pub async fn engine_enabled(&self) -> Result<bool, Error> {
        expect_response!(
            self.perform_action(Action::EngineEnabled).await?,
            Flag
        )
    }

    /// Wire a rule into the active set (and the library).
    /// Returns `false` if it was already active.
    pub async fn add_rule(&self, rule: Rule) -> Result<bool, Error> {
        expect_response!(
            self.perform_action(Action::AddRule(rule)).await?,
            Flag
        )
    }

    /// Replace a rule with a new revision.
    ///
    /// Fails with [`Error::EngineDisabled`] if the revision would resume a
    /// paused rule while the engine is stopped.
    pub async fn update_rule(&self, rule: Rule) -> Result<(), Error> {
        expect_done!(self.perform_action(Action::UpdateRule(rule)).await?)
    }

    /// Remove rules everywhere, cancelling their pending responses.
    /// Returns how many rules existed.
    pub async fn remove_rules(&self, ids: Vec<RuleId>) -> Result<usize, Error> {
        expect_response!(
            self.perform_action(Action::RemoveRules(ids)).await?,
            Count
        )
    }

    /// Flip a rule between active and paused, returning the new status.
    pub async fn toggle_rule(&self, id: RuleId) -> Result<RuleStatus, Error> {
        expect_response!(
            self.perform_action(Action::ToggleRule(id)).await?,
            Status
        )
    }

    /// Import a JSON array of rules into the library.
    /// If `activate` is set, the accepted rules are also wired into the active set.
    pub async fn import_rules<S: Into<String>>(
        &self,
        json: S,
        activate: bool,
    ) -> Result<ImportReport, Error> {
        expect_response!(
            self.perform_action(Action::ImportRules {
                json: json.into(),
                activate
            })
            .await?,
            Imported
        )
    }

    /// The library as a JSON array.
    pub async fn export_rules(&self) -> Result<String, Error> {
        expect_response!(
            self.perform_action(Action::ExportRules).await?,
            Exported
        )
    }

    /// The active set.
    pub async fn active_rules(&self) -> Result<Vec<Rule>, Error> {
        expect_response!(
            self.perform_action(Action::ActiveRules).await?,
            Rules
        )
    }

    /// The library.
    pub async fn library(&self) -> Result<Vec<Rule>, Error> {
        expect_response!(
            self.perform_action(Action::Library).await?,
            Rules
        )
    }

    /// Library rules mentioning the term.
    pub async fn search_library<S: Into<String>>(&self, term: S) -> Result<Vec<Rule>, Error> {
        expect_response!(
            self.perform_action(Action::SearchLibrary(term.into())).await?,
            Rules
        )
    }

    /// Attach a transport, replacing any attached transport of the same kind.
    pub async fn connect<T: Transport + 'static>(&self, transport: T) -> Result<(), Error> {
        expect_done!(
            self.perform_action(Action::Connect(Box::new(transport)))
                .await?
        )
    }

    /// Detach a transport, cancelling responses headed for it.
    pub async fn disconnect(&self, kind: TransportKind) -> Result<(), Error> {
        expect_done!(self.perform_action(Action::Disconnect(kind)).await?)
    }

    /// Feed data received on a transport into the console.
    pub async fn receive<I: Into<Inbound>>(
        &self,
        kind: TransportKind,
        inbound: I,
    ) -> Result<InboundOutcome, Error> {
        expect_response!(
            self.perform_action(Action::Receive(kind, inbound.into()))
                .await?,
            Received
        )
    }

    /// Put something on a transport on behalf of the user.
    pub async fn send(&self, kind: TransportKind, outbound: Outbound) -> Result<(), Error> {
        expect_done!(self.perform_action(Action::Send(kind, outbound)).await?)
    }

    /// Bytes moved over a transport.
    pub async fn counters(&self, kind: TransportKind) -> Result<Counter, Error> {
        expect_response!(
            self.perform_action(Action::Counters(kind)).await?,
            Counter
        )
    }

    /// Zero the counters of a transport.
    pub async fn reset_counters(&self, kind: TransportKind) -> Result<(), Error> {
        expect_done!(self.perform_action(Action::ResetCounters(kind)).await?)
    }

    /// All held log entries, oldest first.
    pub async fn logs(&self) -> Result<Vec<LogEntry>, Error> {
        expect_response!(
            self.perform_action(Action::Logs).await?,
            Logs
        )
    }

    /// Drop all log entries.
    pub async fn clear_logs(&self) -> Result<(), Error> {
        expect_done!(self.perform_action(Action::ClearLogs).await?)
    }

    /// Receive every log entry appended from now on.
    pub async fn subscribe_to_logs(&self) -> Result<broadcast::Receiver<LogEntry>, Error> {
        expect_response!(
            self.perform_action(Action::SubscribeToLogs).await?,
            LogObserver
        )
    }

    /// Trigger and error totals.
    pub async fn stats(&self) -> Result<LogStats, Error> {
        expect_response!(
            self.perform_action(Action::Stats).await?,
            Stats
        )
    }

    /// Cancel a scheduled response.
    /// Returns `false` if it already executed or was cancelled.
    pub async fn cancel_response(&self, ticket: ResponseTicket) -> Result<bool, Error> {
        expect_response!(
            self.perform_action(Action::CancelResponse(ticket)).await?,
            Flag
        )
    }

    /// The number of scheduled responses not yet executed.
    pub async fn pending_responses(&self) -> Result<usize, Error> {
        expect_response!(
            self.perform_action(Action::PendingResponses).await?,
            Count
        )
    }
}

pub(crate) struct Console {
    /// Messages for the console to handle.
    messages: mpsc::UnboundedReceiver<ConsoleMessage>,

    /// Tickets of responses whose delay has passed.
    due: mpsc::UnboundedReceiver<ResponseTicket>,

    engine: EngineState,
    rules: RuleStore,
    matcher: Matcher,
    scheduler: ResponseScheduler,
    log: LogStore,
    counters: Counters,
    transports: BTreeMap<TransportKind, Box<dyn Transport>>,
}

impl Console {
    pub(crate) fn new(config: &Config, messages: mpsc::UnboundedReceiver<ConsoleMessage>) -> Self {
        let (due_tx, due_rx) = mpsc::unbounded();

        let rules = if config.seed_default_rules {
            RuleStore::seeded()
        } else {
            RuleStore::new()
        };

        info!(
            engine = config.engine_enabled,
            capacity = config.log_capacity,
            rules = rules.library().len(),
            "Console init"
        );

        Self {
            messages,
            due: due_rx,
            engine: EngineState::new(config.engine_enabled),
            rules,
            matcher: Matcher::new(),
            scheduler: ResponseScheduler::new(due_tx),
            log: LogStore::new(config.log_capacity),
            counters: Counters::default(),
            transports: BTreeMap::new(),
        }
    }

    fn connected(&self, kind: TransportKind) -> Option<&dyn Transport> {
        self.transports
            .get(&kind)
            .map(|transport| transport.as_ref())
            .filter(|transport| transport.is_connected())
    }

    fn set_engine(&mut self, enabled: bool) {
        if self.engine.set(enabled) {
            let cancelled = self.scheduler.cancel_all();
            debug!(cancelled, "Engine stopped, pending responses dropped");
        }
    }

    fn add_rule(&mut self, rule: Rule) -> bool {
        let description = rule.condition.description.clone();
        let added = self.rules.add(rule);

        if added {
            self.log
                .append(LogEntry::sys(format!("Rule activated: {description}")));
        }

        added
    }

    fn update_rule(&mut self, rule: Rule) -> Result<(), Error> {
        let id = rule.id.clone();
        let paused = !rule.is_active();

        self.rules.update(rule, self.engine.is_enabled())?;

        if paused {
            self.scheduler.cancel_rule(&id);
        }

        Ok(())
    }

    fn remove_rules(&mut self, ids: Vec<RuleId>) -> usize {
        let removed = self.rules.remove(&ids);

        for id in &removed {
            self.scheduler.cancel_rule(id);
            self.matcher.forget(id);
        }

        removed.len()
    }

    fn toggle_rule(&mut self, id: RuleId) -> Result<RuleStatus, Error> {
        let status = self.rules.toggle(&id, self.engine.is_enabled())?;

        if !status.is_active() {
            self.scheduler.cancel_rule(&id);
        }

        Ok(status)
    }

    fn import_rules(&mut self, json: &str, activate: bool) -> Result<ImportReport, Error> {
        let before = self.rules.library().len();

        let report = self.rules.import(json).map_err(|e| {
            self.log.append(LogEntry::err(e.to_string()));
            e
        })?;

        if activate {
            let imported = self.rules.library()[before..].to_vec();
            for rule in imported {
                self.rules.add(rule);
            }
        }

        let mut entry = LogEntry::sys(format!("Imported {} rule(s)", report.accepted));
        if report.rejected > 0 {
            entry = entry.describe(format!("{} rejected", report.rejected));
        }
        self.log.append(entry);

        Ok(report)
    }

    fn connect(&mut self, transport: Box<dyn Transport>) {
        let kind = transport.kind();

        if self.transports.insert(kind, transport).is_some() {
            self.scheduler.cancel_transport(kind);
            debug!(%kind, "Replaced transport");
        }

        self.log
            .append(LogEntry::sys(format!("{kind} connected")).on(kind));
    }

    fn disconnect(&mut self, kind: TransportKind, reason: Option<String>) {
        let cancelled = self.scheduler.cancel_transport(kind);

        if self.transports.remove(&kind).is_none() {
            debug!(%kind, "Transport was not attached");
            return;
        }

        debug!(%kind, cancelled, "Transport detached");

        let mut entry = LogEntry::sys(format!("{kind} disconnected")).on(kind);
        if let Some(reason) = reason {
            entry = entry.describe(reason);
        }
        self.log.append(entry);
    }

    fn receive(&mut self, kind: TransportKind, inbound: Inbound) -> Result<InboundOutcome, Error> {
        if self.connected(kind).is_none() {
            return Err(Error::NotConnected(kind));
        }

        if inbound.is_empty() {
            return Ok(InboundOutcome::default());
        }

        self.log
            .append(LogEntry::new(LogKind::Rx, inbound.log_content()).on(kind));
        self.counters.add_rx(kind, inbound.len());

        if !self.engine.is_enabled() {
            return Ok(InboundOutcome::default());
        }

        let evaluation = self.matcher.evaluate(inbound.as_bytes(), &self.rules.list());

        for problem in evaluation.malformed.iter() {
            self.log.append(LogEntry::err(problem.to_string()));
        }

        let scheduled = evaluation
            .winner()
            .cloned()
            .map(|rule| self.scheduler.schedule(rule, kind));

        Ok(InboundOutcome {
            evaluated: true,
            matched: evaluation
                .matches
                .iter()
                .map(|rule| rule.id.clone())
                .collect(),
            scheduled,
        })
    }

    fn send(&mut self, kind: TransportKind, outbound: Outbound) -> Result<(), Error> {
        let (bytes, content) = outbound.encode();

        let sent = match self.connected(kind) {
            Some(transport) => transport.send(&bytes),
            None => Err(Error::NotConnected(kind)),
        };

        match sent {
            Ok(()) => {
                let mut entry = LogEntry::new(LogKind::Tx, content).on(kind);
                if kind == TransportKind::Http {
                    entry = entry.describe("Broadcast to all clients");
                }
                self.log.append(entry);
                self.counters.add_tx(kind, bytes.len());

                Ok(())
            }
            Err(e) => {
                self.log
                    .append(LogEntry::err(format!("Send failed: {e}")).on(kind));

                Err(e)
            }
        }
    }

    fn execute(&mut self, ticket: ResponseTicket) {
        let Some(PendingResponse {
            rule, transport, ..
        }) = self.scheduler.take_due(ticket)
        else {
            debug!(%ticket, "Response was cancelled");
            return;
        };

        let _span = info_span!("execute", %ticket, rule = %rule.id, %transport).entered();

        // Edits made during the delay apply.
        let action = match self.rules.get(&rule.id) {
            Some(current) if self.engine.is_enabled() && self.rules.is_live(&rule.id) => {
                current.action.clone()
            }
            _ => {
                debug!("Rule no longer eligible, dropping response");
                return;
            }
        };

        match action.kind {
            ActionKind::SendHex => {
                let bytes = encoding::parse_hex_input(&action.value);
                let content = if bytes.is_text() {
                    action.value.clone()
                } else {
                    encoding::tx_hex_content(bytes.as_bytes())
                };

                let Some(target) = self.connected(transport) else {
                    debug!("Transport gone, dropping response");
                    return;
                };

                match target.send(bytes.as_bytes()) {
                    Ok(()) => {
                        info!("Auto-response sent");
                        self.log.append(
                            LogEntry::new(LogKind::Tx, content)
                                .describe(action.description)
                                .auto_response()
                                .on(transport),
                        );
                        self.counters.add_tx(transport, bytes.as_bytes().len());
                    }
                    Err(e) => {
                        warn!(%e, "Auto-response failed");
                        self.log.append(
                            LogEntry::err(format!("Auto-response of rule {} failed: {e}", rule.id))
                                .on(transport),
                        );
                    }
                }
            }
            ActionKind::Log => {
                info!("Auto-response logged");
                self.log.append(
                    LogEntry::sys(action.value)
                        .describe(action.description)
                        .auto_response()
                        .on(transport),
                );
            }
        }
    }

    fn handle_information(&mut self, information: Inform) {
        debug!("Got information: {information}");

        match information {
            Inform::TransportLost { kind, reason } => self.disconnect(kind, Some(reason)),
        }
    }

    fn handle_request(&mut self, Request { action, response }: Request) {
        debug!("Got action request: `{action}`");

        let reply = match action {
            Action::SetEngine(enabled) => {
                self.set_engine(enabled);
                Ok(ConsoleResponse::Done)
            }
            Action::ToggleEngine => {
                self.set_engine(!self.engine.is_enabled());
                Ok(ConsoleResponse::Flag(self.engine.is_enabled()))
            }
            Action::EngineEnabled => Ok(ConsoleResponse::Flag(self.engine.is_enabled())),
            Action::AddRule(rule) => Ok(ConsoleResponse::Flag(self.add_rule(rule))),
            Action::UpdateRule(rule) => self.update_rule(rule).map(|()| ConsoleResponse::Done),
            Action::RemoveRules(ids) => Ok(ConsoleResponse::Count(self.remove_rules(ids))),
            Action::ToggleRule(id) => self.toggle_rule(id).map(ConsoleResponse::Status),
            Action::ImportRules { json, activate } => self
                .import_rules(&json, activate)
                .map(ConsoleResponse::Imported),
            Action::ExportRules => self.rules.export().map(ConsoleResponse::Exported),
            Action::ActiveRules => Ok(ConsoleResponse::Rules(self.rules.list())),
            Action::Library => Ok(ConsoleResponse::Rules(self.rules.library().to_vec())),
            Action::SearchLibrary(term) => Ok(ConsoleResponse::Rules(self.rules.search(&term))),
            Action::Connect(transport) => {
                self.connect(transport);
                Ok(ConsoleResponse::Done)
            }
            Action::Disconnect(kind) => {
                self.disconnect(kind, None);
                Ok(ConsoleResponse::Done)
            }
            Action::Receive(kind, inbound) => {
                self.receive(kind, inbound).map(ConsoleResponse::Received)
            }
            Action::Send(kind, outbound) => {
                self.send(kind, outbound).map(|()| ConsoleResponse::Done)
            }
            Action::Counters(kind) => Ok(ConsoleResponse::Counter(self.counters.get(kind))),
            Action::ResetCounters(kind) => {
                self.counters.reset(kind);
                Ok(ConsoleResponse::Done)
            }
            Action::Logs => Ok(ConsoleResponse::Logs(self.log.entries())),
            Action::ClearLogs => {
                self.log.clear();
                Ok(ConsoleResponse::Done)
            }
            Action::SubscribeToLogs => Ok(ConsoleResponse::LogObserver(self.log.subscribe())),
            Action::Stats => Ok(ConsoleResponse::Stats(self.log.stats())),
            Action::CancelResponse(ticket) => {
                Ok(ConsoleResponse::Flag(self.scheduler.cancel(ticket)))
            }
            Action::PendingResponses => Ok(ConsoleResponse::Count(self.scheduler.pending())),
        };

        if response.send(reply).is_err() {
            debug!("Requester left before the response");
        }
    }

    pub(crate) async fn run(&mut self) {
        loop {
            tokio::select! {
                message = self.messages.next() => match message {
                    Some(ConsoleMessage::Request(request)) => self.handle_request(request),
                    Some(ConsoleMessage::Inform(information)) => self.handle_information(information),
                    None => break,
                },
                Some(ticket) = self.due.next() => self.execute(ticket),
            }
        }

        let cancelled = self.scheduler.cancel_all();
        info!(cancelled, "All console handles dropped, stopping");
    }
}
