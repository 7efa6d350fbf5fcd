//! Tool-call and approval state machine.
//!
//! Per conversation item id:
//! `Unseen -> ToolCallCompleted`, answered with one `response.create`, or
//! `Unseen -> ApprovalPending -> {Approved, Denied}`, answered with exactly one
//! approval response.
//!
//! Approval waits run as independent tasks so a slow human never blocks event
//! dispatch. Their outcomes come back through the decision receiver returned
//! by [`ToolCallCoordinator::new`] and are turned into events by
//! [`ToolCallCoordinator::resolve`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voicelink_core::events::{
    ApprovalDecision, ApprovalRequest, ConversationItem, DecisionSource, InboundEvent,
    OutboundEvent, ToolCall,
};

use crate::traits::ApprovalGate;

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub tool_calls_acknowledged: u64,
    pub approvals_granted: u64,
    pub approvals_denied: u64,
    pub protocol_violations: u64,
}

pub struct ToolCallCoordinator {
    gate: Arc<dyn ApprovalGate>,
    approval_timeout: Duration,
    /// Every approval id seen this session, settled or not. Kept for
    /// duplicate detection, so it grows with the session.
    approvals: HashMap<String, ApprovalState>,
    waits: HashMap<String, JoinHandle<()>>,
    /// Tool call ids already acknowledged; grows with the session like `approvals`.
    completed_calls: HashSet<String>,
    decisions_tx: mpsc::Sender<ApprovalDecision>,
    stats: CoordinatorStats,
}

impl ToolCallCoordinator {
    pub fn new(
        gate: Arc<dyn ApprovalGate>,
        approval_timeout: Duration,
    ) -> (Self, mpsc::Receiver<ApprovalDecision>) {
        let (decisions_tx, decisions_rx) = mpsc::channel(32);
        let coordinator = Self {
            gate,
            approval_timeout,
            approvals: HashMap::new(),
            waits: HashMap::new(),
            completed_calls: HashSet::new(),
            decisions_tx,
            stats: CoordinatorStats::default(),
        };
        (coordinator, decisions_rx)
    }

    /// Classify one inbound event and return the events to send, in order.
    ///
    /// Audio deltas and transcripts are not handled here.
    pub fn handle_event(&mut self, event: &InboundEvent) -> Vec<OutboundEvent> {
        match event {
            InboundEvent::ConversationItemDone { item } => self.handle_item(item),
            InboundEvent::ResponseDone { output } => {
                // Already acknowledged through conversation.item.done.
                for item in output {
                    if let ConversationItem::ToolCall(call) = item {
                        log::info!("MCP tool call {}({})", call.name, call.arguments);
                    }
                }
                Vec::new()
            }
            InboundEvent::Error { message } => {
                log::error!("Error: {message}");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn handle_item(&mut self, item: &ConversationItem) -> Vec<OutboundEvent> {
        match item {
            ConversationItem::ToolCall(call) => self.on_tool_call(call),
            ConversationItem::ApprovalRequest(req) => {
                self.on_approval_request(req);
                Vec::new()
            }
            ConversationItem::Other { item_type } => {
                log::info!("Conversation item of type {item_type} received");
                Vec::new()
            }
        }
    }

    fn on_tool_call(&mut self, call: &ToolCall) -> Vec<OutboundEvent> {
        if !self.completed_calls.insert(call.id.clone()) {
            self.stats.protocol_violations += 1;
            log::warn!(
                "Protocol violation: tool call {} completed twice; ignoring",
                call.id
            );
            return Vec::new();
        }

        log::info!(
            "MCP tool call {}({}) completed with output: {}",
            call.name,
            call.arguments,
            call.output.as_deref().unwrap_or("")
        );
        if let Some(err) = call.error.as_ref().filter(|e| !e.is_null()) {
            log::warn!("MCP tool call {} reported an error: {err}", call.name);
        }

        self.stats.tool_calls_acknowledged += 1;
        vec![OutboundEvent::ResponseCreate]
    }

    fn on_approval_request(&mut self, req: &ApprovalRequest) {
        if self.approvals.contains_key(&req.id) {
            self.stats.protocol_violations += 1;
            log::warn!(
                "Protocol violation: duplicate approval request {}; ignoring",
                req.id
            );
            return;
        }

        log::info!("Approval requested for {}({})", req.name, req.arguments);
        self.approvals.insert(req.id.clone(), ApprovalState::Pending);

        let wait = tokio::spawn(await_decision(
            self.gate.clone(),
            req.clone(),
            self.approval_timeout,
            self.decisions_tx.clone(),
        ));
        self.waits.insert(req.id.clone(), wait);
    }

    /// Settle a pending approval. Returns the response to send, or `None` if
    /// the request was already settled or never seen.
    pub fn resolve(&mut self, decision: ApprovalDecision) -> Option<OutboundEvent> {
        self.waits.remove(&decision.request_id);

        let state = self.approvals.get_mut(&decision.request_id)?;
        if *state != ApprovalState::Pending {
            log::warn!(
                "Approval {} already settled; ignoring late decision",
                decision.request_id
            );
            return None;
        }

        if decision.approve {
            *state = ApprovalState::Approved;
            self.stats.approvals_granted += 1;
        } else {
            *state = ApprovalState::Denied;
            self.stats.approvals_denied += 1;
        }
        log::info!(
            "Approval {} {} ({:?})",
            decision.request_id,
            if decision.approve { "granted" } else { "denied" },
            decision.source
        );

        Some(OutboundEvent::approval_response(&decision))
    }

    pub fn state_of(&self, request_id: &str) -> Option<ApprovalState> {
        self.approvals.get(request_id).copied()
    }

    pub fn pending_approvals(&self) -> usize {
        self.approvals
            .values()
            .filter(|s| **s == ApprovalState::Pending)
            .count()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Abandon outstanding waits. Their requests stay unanswered.
    pub fn shutdown(&mut self) {
        for (id, wait) in self.waits.drain() {
            log::info!("Abandoning approval wait for {id}");
            wait.abort();
        }
    }
}

impl Drop for ToolCallCoordinator {
    fn drop(&mut self) {
        for (_, wait) in self.waits.drain() {
            wait.abort();
        }
    }
}

async fn await_decision(
    gate: Arc<dyn ApprovalGate>,
    req: ApprovalRequest,
    timeout: Duration,
    decisions_tx: mpsc::Sender<ApprovalDecision>,
) {
    let prompt = req.prompt();
    let decision = match tokio::time::timeout(timeout, gate.ask(&prompt)).await {
        Ok(Ok(answer)) => ApprovalDecision::from_answer(req.id, &answer),
        Ok(Err(e)) => {
            log::warn!("Approval gate failed for {}: {e:#}; denying", req.id);
            ApprovalDecision::denied(req.id, DecisionSource::GateFailed)
        }
        Err(_) => {
            log::info!(
                "No answer for {} within {}s; denying",
                req.id,
                timeout.as_secs()
            );
            ApprovalDecision::denied(req.id, DecisionSource::Timeout)
        }
    };
    let _ = decisions_tx.send(decision).await;
}
