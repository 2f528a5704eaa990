//! Delayed, cancellable responses.
//!
//! Each scheduled response is a sleeping task which, once its delay has passed,
//! only announces that its ticket is due.
//! The owner of the scheduler then claims the ticket with [`ResponseScheduler::take_due`].
//! A ticket which was cancelled before being claimed is gone, so a response can
//! never be executed after cancellation even if the timer already fired.

use std::{collections::HashMap, fmt::Display, time::Duration};

use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::{
    rule::{Rule, RuleId},
    transport::TransportKind,
};

/// Identifies one scheduled response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct ResponseTicket(u64);

impl Display for ResponseTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A response waiting for its delay to pass.
#[derive(Debug)]
pub struct PendingResponse {
    /// The ticket this response was scheduled under.
    pub ticket: ResponseTicket,

    /// The rule as it was when it matched.
    pub rule: Rule,

    /// Where the triggering data came from, and where the response goes.
    pub transport: TransportKind,

    timer: AbortHandle,
}

/// Keeps track of pending responses.
#[derive(Debug)]
pub struct ResponseScheduler {
    next_ticket: u64,
    pending: HashMap<ResponseTicket, PendingResponse>,
    due: mpsc::UnboundedSender<ResponseTicket>,
}

impl ResponseScheduler {
    /// A scheduler announcing due tickets on the given channel.
    pub fn new(due: mpsc::UnboundedSender<ResponseTicket>) -> Self {
        Self {
            next_ticket: 0,
            pending: HashMap::new(),
            due,
        }
    }

    /// Schedule the rule's action to become due after the rule's delay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, rule: Rule, transport: TransportKind) -> ResponseTicket {
        let ticket = ResponseTicket(self.next_ticket);
        self.next_ticket += 1;

        let delay = Duration::from_millis(rule.delay);
        let due = self.due.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(%ticket, "Response due");

            // Nobody to tell if the console is gone.
            let _ = due.unbounded_send(ticket);
        })
        .abort_handle();

        debug!(%ticket, rule = %rule.id, %transport, ?delay, "Response scheduled");

        self.pending.insert(
            ticket,
            PendingResponse {
                ticket,
                rule,
                transport,
                timer,
            },
        );

        ticket
    }

    /// Claim a due response.
    /// Returns `None` if it was cancelled in the meantime.
    pub fn take_due(&mut self, ticket: ResponseTicket) -> Option<PendingResponse> {
        self.pending.remove(&ticket)
    }

    /// Cancel a single response.
    /// Returns `false` if it was not pending.
    pub fn cancel(&mut self, ticket: ResponseTicket) -> bool {
        self.cancel_where(|pending| pending.ticket == ticket) == 1
    }

    /// Cancel all responses scheduled by the given rule.
    pub fn cancel_rule(&mut self, id: &RuleId) -> usize {
        self.cancel_where(|pending| &pending.rule.id == id)
    }

    /// Cancel all responses headed for the given transport.
    pub fn cancel_transport(&mut self, transport: TransportKind) -> usize {
        self.cancel_where(|pending| pending.transport == transport)
    }

    /// Cancel everything.
    pub fn cancel_all(&mut self) -> usize {
        self.cancel_where(|_| true)
    }

    /// The number of responses waiting.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn cancel_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&PendingResponse) -> bool,
    {
        let cancelled = self
            .pending
            .values()
            .filter(|pending| predicate(pending))
            .map(|pending| pending.ticket)
            .collect::<Vec<_>>();

        for ticket in &cancelled {
            if let Some(pending) = self.pending.remove(ticket) {
                pending.timer.abort();
                debug!(%ticket, rule = %pending.rule.id, "Response cancelled");
            }
        }

        cancelled.len()
    }
}

impl Drop for ResponseScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rule::{Action, ActionKind, Condition, ConditionKind};

    fn rule(id: &str, delay: u64) -> Rule {
        Rule::new(
            Condition::new(ConditionKind::Contains, "x"),
            Action::new(ActionKind::Log, "y"),
        )
        .with_id(id)
        .with_delay(delay)
    }

    #[tokio::test(start_paused = true)]
    async fn due_after_delay() {
        let (tx, mut rx) = mpsc::unbounded();
        let mut scheduler = ResponseScheduler::new(tx);

        let ticket = scheduler.schedule(rule("a", 100), TransportKind::Serial);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(rx.try_next().is_err(), "Nothing due yet");

        assert_eq!(rx.next().await, Some(ticket));

        let pending = scheduler.take_due(ticket).unwrap();
        assert_eq!(pending.rule.id.as_str(), "a");
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_ticket_can_not_be_claimed() {
        let (tx, mut rx) = mpsc::unbounded();
        let mut scheduler = ResponseScheduler::new(tx);

        let ticket = scheduler.schedule(rule("a", 0), TransportKind::Ble);

        // The timer may well have fired already.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(scheduler.cancel(ticket));

        while let Ok(Some(due)) = rx.try_next() {
            assert!(scheduler.take_due(due).is_none());
        }
        assert!(!scheduler.cancel(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_by_rule_and_transport() {
        let (tx, _rx) = mpsc::unbounded();
        let mut scheduler = ResponseScheduler::new(tx);

        scheduler.schedule(rule("a", 100), TransportKind::Serial);
        scheduler.schedule(rule("a", 100), TransportKind::Http);
        scheduler.schedule(rule("b", 100), TransportKind::Serial);
        scheduler.schedule(rule("c", 100), TransportKind::Classic);

        assert_eq!(scheduler.cancel_rule(&"a".into()), 2);
        assert_eq!(scheduler.cancel_transport(TransportKind::Serial), 1);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.cancel_all(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_timers_never_announce() {
        let (tx, mut rx) = mpsc::unbounded();
        let mut scheduler = ResponseScheduler::new(tx);

        scheduler.schedule(rule("a", 100), TransportKind::Serial);
        scheduler.cancel_all();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_next().is_err());
    }
}
