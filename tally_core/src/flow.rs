//! Flow contract and the per-user flow engine.
//!
//! A flow is one multi-turn conversational task. The engine owns the
//! delegation discipline: a flow may hand the conversation to a child
//! flow, children stack strictly (innermost speaks), and a finished or
//! cancelled child reports back to its parent exactly once. Flows never
//! hold references to each other; all bookkeeping lives in
//! [`FlowInstance`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::InboundEvent;

/// Delegation deeper than this is assumed to be a flow bug, not a plan.
const MAX_DELEGATION_DEPTH: usize = 8;

/// What a flow wants to happen after handling one event.
pub enum Turn {
    /// Send `reply` and wait for the user's next event.
    Reply(String),
    /// Send `reply` and finish. `value` is handed to a delegating parent;
    /// for a root flow it is discarded.
    Done { reply: String, value: Value },
    /// Send `reply` and end in the cancelled state. A delegating parent
    /// is told the child cancelled rather than completed.
    Cancel { reply: String },
    /// Push `child` onto the stack. The event that produced this turn is
    /// re-delivered as the child's first event, and the child's reply is
    /// what the user sees.
    Delegate(Box<dyn Flow>),
}

impl Turn {
    #[must_use]
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(text.into())
    }

    #[must_use]
    pub fn done(text: impl Into<String>) -> Self {
        Self::Done {
            reply: text.into(),
            value: Value::Null,
        }
    }

    #[must_use]
    pub fn done_with(text: impl Into<String>, value: Value) -> Self {
        Self::Done {
            reply: text.into(),
            value,
        }
    }

    #[must_use]
    pub fn cancel(text: impl Into<String>) -> Self {
        Self::Cancel { reply: text.into() }
    }

    #[must_use]
    pub fn delegate(child: impl Flow + 'static) -> Self {
        Self::Delegate(Box::new(child))
    }
}

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reply(reply) => f.debug_tuple("Reply").field(reply).finish(),
            Self::Done { reply, value } => f
                .debug_struct("Done")
                .field("reply", reply)
                .field("value", value)
                .finish(),
            Self::Cancel { reply } => f.debug_struct("Cancel").field("reply", reply).finish(),
            Self::Delegate(child) => f.debug_tuple("Delegate").field(&child.name()).finish(),
        }
    }
}

/// How a child left the stack, as reported to its parent.
#[derive(Debug, Clone)]
pub enum ChildOutcome {
    /// The child finished its job; `value` is whatever its final turn
    /// carried.
    Completed { flow: &'static str, value: Value },
    /// The child was cancelled, by itself or by the user. The parent
    /// decides whether to recover or abort too.
    Cancelled { flow: &'static str },
}

impl ChildOutcome {
    #[must_use]
    pub const fn flow(&self) -> &'static str {
        match self {
            Self::Completed { flow, .. } | Self::Cancelled { flow } => flow,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// One multi-turn conversational task.
///
/// Implementations hold their working state as plain fields; the engine
/// guarantees events arrive one at a time, so no internal locking is
/// needed.
#[async_trait]
pub trait Flow: Send + Sync {
    /// Stable name, used in status output and logs.
    fn name(&self) -> &'static str;

    /// Label for the step the flow is currently on, for status output.
    fn step(&self) -> &'static str {
        "active"
    }

    /// Handle one event addressed to this flow.
    async fn on_turn(&mut self, event: &InboundEvent) -> anyhow::Result<Turn>;

    /// Consume a finished or cancelled child's outcome and produce the
    /// next turn. The child's own final reply is suppressed in favor of
    /// this one.
    ///
    /// Only ever called on a flow that returned [`Turn::Delegate`], so the
    /// default is an error rather than invented behavior.
    async fn on_child_complete(&mut self, outcome: ChildOutcome) -> anyhow::Result<Turn> {
        anyhow::bail!(
            "flow `{}` received an outcome from `{}` but does not delegate",
            self.name(),
            outcome.flow()
        )
    }
}

/// Result of delivering one event to a [`FlowInstance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStatus {
    /// The flow replied and is waiting for the next event.
    Active { reply: String },
    /// The root flow finished or cancelled; the session slot can be
    /// released.
    Finished { reply: String },
}

impl FlowStatus {
    #[must_use]
    pub fn reply(&self) -> &str {
        match self {
            Self::Active { reply } | Self::Finished { reply } => reply,
        }
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Result of cancelling the innermost frame of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Only the root was active; the caller should drop the instance.
    Root { flow: &'static str },
    /// A delegated child was cancelled; its parent was notified and
    /// produced `status`.
    Child {
        cancelled: &'static str,
        status: FlowStatus,
    },
}

/// One entry of the delegation stack, read-only, for status output.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub flow: &'static str,
    pub step: &'static str,
    pub entered_at: DateTime<Utc>,
}

struct Frame {
    flow: Box<dyn Flow>,
    entered_at: DateTime<Utc>,
}

impl Frame {
    fn new(flow: Box<dyn Flow>) -> Self {
        Self {
            flow,
            entered_at: Utc::now(),
        }
    }

    fn info(&self) -> FrameInfo {
        FrameInfo {
            flow: self.flow.name(),
            step: self.flow.step(),
            entered_at: self.entered_at,
        }
    }
}

/// A running flow plus its stack of delegated children.
///
/// The stack is strict: only the innermost frame receives events, and a
/// parent resumes only when its child finishes or is cancelled.
pub struct FlowInstance {
    root: Frame,
    children: Vec<Frame>,
}

impl FlowInstance {
    #[must_use]
    pub fn new(root: Box<dyn Flow>) -> Self {
        Self {
            root: Frame::new(root),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn root_name(&self) -> &'static str {
        self.root.flow.name()
    }

    /// Name of the frame currently receiving events.
    #[must_use]
    pub fn active_name(&self) -> &'static str {
        self.children
            .last()
            .map_or_else(|| self.root.flow.name(), |frame| frame.flow.name())
    }

    /// Step label of the frame currently receiving events.
    #[must_use]
    pub fn active_step(&self) -> &'static str {
        self.children
            .last()
            .map_or_else(|| self.root.flow.step(), |frame| frame.flow.step())
    }

    /// Frames root-first, including the root.
    #[must_use]
    pub fn frames(&self) -> Vec<FrameInfo> {
        std::iter::once(self.root.info())
            .chain(self.children.iter().map(Frame::info))
            .collect()
    }

    /// Number of frames, root included.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.children.len()
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.root.entered_at
    }

    /// Deliver one event to the innermost frame and run the stack until
    /// it settles on a reply.
    ///
    /// Errors from any frame abort the whole delivery and leave the
    /// stack exactly as it was at the failing call, so the user can
    /// retry the same step.
    pub async fn deliver(&mut self, event: &InboundEvent) -> anyhow::Result<FlowStatus> {
        let turn = self.innermost_mut().flow.on_turn(event).await?;
        self.interpret(turn, event).await
    }

    /// Cancel the innermost frame.
    ///
    /// A cancelled child's parent is told via
    /// [`Flow::on_child_complete`] with a cancellation marker, so it can
    /// recover or abort itself; a lone root is simply popped and the
    /// caller drops the instance.
    pub async fn cancel_active(&mut self, event: &InboundEvent) -> anyhow::Result<CancelOutcome> {
        let Some(frame) = self.children.pop() else {
            let flow = self.root.flow.name();
            debug!(flow, "root flow cancelled");
            return Ok(CancelOutcome::Root { flow });
        };
        let cancelled = frame.flow.name();
        debug!(
            flow = cancelled,
            parent = self.active_name(),
            "delegated flow cancelled"
        );
        let turn = self
            .innermost_mut()
            .flow
            .on_child_complete(ChildOutcome::Cancelled { flow: cancelled })
            .await?;
        let status = self.interpret(turn, event).await?;
        Ok(CancelOutcome::Child { cancelled, status })
    }

    /// Run turns through the stack until one settles on a user-visible
    /// reply.
    ///
    /// A `Delegate` pushes the child and re-delivers `event` to it; a
    /// `Done` or `Cancel` pops the frame and hands the outcome to the
    /// parent, whose reply supersedes the child's final one.
    async fn interpret(
        &mut self,
        mut turn: Turn,
        event: &InboundEvent,
    ) -> anyhow::Result<FlowStatus> {
        loop {
            match turn {
                Turn::Reply(reply) => return Ok(FlowStatus::Active { reply }),
                Turn::Delegate(child) => {
                    if self.depth() >= MAX_DELEGATION_DEPTH {
                        anyhow::bail!(
                            "flow `{}` exceeded the delegation depth limit",
                            self.active_name()
                        );
                    }
                    debug!(
                        parent = self.active_name(),
                        child = child.name(),
                        "delegating"
                    );
                    self.children.push(Frame::new(child));
                    turn = self.innermost_mut().flow.on_turn(event).await?;
                }
                Turn::Done { reply, value } => {
                    let Some(finished) = self.children.pop() else {
                        return Ok(FlowStatus::Finished { reply });
                    };
                    let outcome = ChildOutcome::Completed {
                        flow: finished.flow.name(),
                        value,
                    };
                    debug!(
                        child = outcome.flow(),
                        parent = self.active_name(),
                        "delegated flow finished"
                    );
                    turn = self.innermost_mut().flow.on_child_complete(outcome).await?;
                }
                Turn::Cancel { reply } => {
                    let Some(cancelled) = self.children.pop() else {
                        return Ok(FlowStatus::Finished { reply });
                    };
                    let outcome = ChildOutcome::Cancelled {
                        flow: cancelled.flow.name(),
                    };
                    debug!(
                        child = outcome.flow(),
                        parent = self.active_name(),
                        "delegated flow cancelled itself"
                    );
                    turn = self.innermost_mut().flow.on_child_complete(outcome).await?;
                }
            }
        }
    }

    fn innermost_mut(&mut self) -> &mut Frame {
        let Self { root, children } = self;
        children.last_mut().unwrap_or(root)
    }
}
