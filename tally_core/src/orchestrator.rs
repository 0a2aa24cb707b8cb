//! Orchestrator: the single entry point transports talk to.
//!
//! Every inbound event goes through the per-user queue, then either into
//! the user's active flow or through the router. Global commands (reset,
//! cancel, status) act on the components directly and never touch the
//! router; reset and status are immediate, cancel runs inside the user's
//! lane because it drives flow hooks.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::StagedNamespace;
use crate::catalog::FlowCatalog;
use crate::flow::{CancelOutcome, FlowInstance, FlowStatus};
use crate::queue::{QueueError, SerialQueue};
use crate::router::{IntentRouter, RouteDecision};
use crate::session::{DEFAULT_SESSION_TIMEOUT, SessionManager, SessionSnapshot};
use crate::{InboundEvent, IntentClassifier, UserKey};

const DEFAULT_MISS_REPLY: &str = "Sorry, I didn't catch that. Send /help to see what I can do.";
const DEFAULT_FAILURE_REPLY: &str = "Something went wrong on my side. Please try that again.";

/// What a reset swept away, for the transport to phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    /// Root flow that was abandoned, if one was active.
    pub abandoned_flow: Option<&'static str>,
    /// Pending queue entries dropped before they ran.
    pub dropped_tasks: usize,
    /// Stage namespaces that actually held an entry for this user.
    pub purged_stages: Vec<&'static str>,
}

/// Result of a cancel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReport {
    /// Nothing was active.
    Idle,
    /// The root flow was cancelled outright.
    Root { flow: &'static str },
    /// A delegated child was cancelled; `reply` is what its notified
    /// parent had to say about it.
    Child {
        cancelled: &'static str,
        reply: String,
    },
}

/// Age of one staged entry, for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub namespace: &'static str,
    pub age: Duration,
}

/// Introspection snapshot for one user.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub session: Option<SessionSnapshot>,
    pub queue_depth: usize,
    pub stages: Vec<StageStatus>,
}

/// Everything a queued turn needs, detached from the orchestrator so the
/// task owns its context outright.
#[derive(Clone)]
struct TurnContext {
    sessions: SessionManager,
    router: Arc<IntentRouter>,
    miss_reply: Arc<str>,
    failure_reply: Arc<str>,
}

impl TurnContext {
    /// Run one ordinary turn: active flow first, router otherwise.
    async fn run(self, event: InboundEvent) -> String {
        let user = event.user.clone();
        let lease = self.sessions.check_out(&user);
        let epoch = lease.epoch;

        if let Some(mut instance) = lease.instance {
            let flow = instance.active_name();
            return match instance.deliver(&event).await {
                Ok(FlowStatus::Active { reply }) => {
                    let _ = self.sessions.check_in(&user, epoch, instance);
                    reply
                }
                Ok(FlowStatus::Finished { reply }) => {
                    let _ = self.sessions.release(&user, epoch);
                    reply
                }
                Err(err) => {
                    error!(user = %user, flow, "turn failed: {err:#}");
                    // the flow keeps its place so the user can retry the step
                    let _ = self.sessions.check_in(&user, epoch, instance);
                    self.failure_reply.to_string()
                }
            };
        }

        match self.router.route(&event).await {
            RouteDecision::Start {
                blueprint,
                seed,
                kind,
            } => {
                let flow = blueprint.name();
                info!(user = %user, flow, strategy = kind.as_str(), "starting flow");
                let mut instance = FlowInstance::new(blueprint.build(seed));
                match instance.deliver(&event).await {
                    Ok(FlowStatus::Active { reply }) => {
                        let _ = self.sessions.check_in(&user, epoch, instance);
                        reply
                    }
                    Ok(FlowStatus::Finished { reply }) => {
                        let _ = self.sessions.release(&user, epoch);
                        reply
                    }
                    Err(err) => {
                        error!(user = %user, flow, "flow failed on its opening turn: {err:#}");
                        // nothing was installed, so the next message routes fresh
                        self.failure_reply.to_string()
                    }
                }
            }
            RouteDecision::Miss => self.miss_reply.to_string(),
        }
    }

    /// Run a cancel command inside the user's lane.
    async fn run_cancel(self, user: UserKey) -> CancelReport {
        let lease = self.sessions.check_out(&user);
        let epoch = lease.epoch;
        let Some(mut instance) = lease.instance else {
            return CancelReport::Idle;
        };
        let root = instance.root_name();
        let event = InboundEvent::message(user.clone(), "/cancel");
        match instance.cancel_active(&event).await {
            Ok(CancelOutcome::Root { flow }) => {
                let _ = self.sessions.release(&user, epoch);
                info!(user = %user, flow, "flow cancelled");
                CancelReport::Root { flow }
            }
            Ok(CancelOutcome::Child { cancelled, status }) => {
                let reply = status.reply().to_string();
                if status.is_finished() {
                    let _ = self.sessions.release(&user, epoch);
                } else {
                    let _ = self.sessions.check_in(&user, epoch, instance);
                }
                CancelReport::Child { cancelled, reply }
            }
            Err(err) => {
                error!(user = %user, flow = root, "cancel handling failed: {err:#}");
                // the parent's hook failed with the child already popped;
                // dropping the whole chain is the only consistent exit
                let _ = self.sessions.release(&user, epoch);
                CancelReport::Root { flow: root }
            }
        }
    }
}

/// Wires the queue, session map, router, and stage caches together.
///
/// Owns nothing domain-specific: flows come from the catalog, the
/// classifier and stage namespaces are injected, and replies for routing
/// misses and flow failures are plain configurable text.
pub struct Orchestrator {
    queue: SerialQueue,
    sessions: SessionManager,
    catalog: Arc<FlowCatalog>,
    router: Arc<IntentRouter>,
    stages: Vec<Arc<dyn StagedNamespace>>,
    miss_reply: Arc<str>,
    failure_reply: Arc<str>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(catalog: Arc<FlowCatalog>) -> Self {
        Self {
            queue: SerialQueue::new(),
            sessions: SessionManager::new(DEFAULT_SESSION_TIMEOUT),
            router: Arc::new(IntentRouter::new(Arc::clone(&catalog))),
            catalog,
            stages: Vec::new(),
            miss_reply: Arc::from(DEFAULT_MISS_REPLY),
            failure_reply: Arc::from(DEFAULT_FAILURE_REPLY),
        }
    }

    /// Attach the intent classifier used as the router's last resort.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.router =
            Arc::new(IntentRouter::new(Arc::clone(&self.catalog)).with_classifier(classifier));
        self
    }

    /// Override the session inactivity timeout.
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.sessions = SessionManager::new(timeout);
        self
    }

    /// Register a stage cache so reset, status, and the sweeper see it.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn StagedNamespace>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Reply sent when no router strategy claims an event.
    #[must_use]
    pub fn with_miss_reply(mut self, text: impl Into<String>) -> Self {
        self.miss_reply = Arc::from(text.into());
        self
    }

    /// Reply sent when a flow fails at the turn boundary.
    #[must_use]
    pub fn with_failure_reply(mut self, text: impl Into<String>) -> Self {
        self.failure_reply = Arc::from(text.into());
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &FlowCatalog {
        &self.catalog
    }

    /// Feed one inbound event through the user's lane and produce the
    /// reply to send.
    ///
    /// Returns [`QueueError::Discarded`] when a reset dropped the event
    /// before it ran; transports should stay silent in that case.
    pub async fn handle(&self, event: InboundEvent) -> Result<String, QueueError> {
        let user = event.user.clone();
        let ctx = self.turn_context();
        self.queue.run(&user, ctx.run(event)).await
    }

    /// Cancel the innermost active flow for `user`.
    ///
    /// Queued like a turn: if a turn is running it finishes first, then
    /// the cancellation drives the parent's completion hook inside the
    /// same lane.
    pub async fn cancel(&self, user: &UserKey) -> Result<CancelReport, QueueError> {
        let ctx = self.turn_context();
        self.queue.run(user, ctx.run_cancel(user.clone())).await
    }

    /// Drop everything this user has: pending queue entries, the active
    /// flow chain, and every staged cache entry. Immediate; a turn
    /// already in flight completes but its state is discarded at
    /// check-in.
    #[must_use]
    pub fn reset(&self, user: &UserKey) -> ResetOutcome {
        let dropped_tasks = self.queue.clear(user);
        let abandoned_flow = self.sessions.clear(user);
        let purged_stages: Vec<_> = self
            .stages
            .iter()
            .filter(|stage| stage.purge(user))
            .map(|stage| stage.namespace())
            .collect();
        info!(
            user = %user,
            ?abandoned_flow,
            dropped_tasks,
            purged = purged_stages.len(),
            "reset"
        );
        ResetOutcome {
            abandoned_flow,
            dropped_tasks,
            purged_stages,
        }
    }

    /// Immediate introspection for one user.
    #[must_use]
    pub fn status(&self, user: &UserKey) -> StatusReport {
        StatusReport {
            session: self.sessions.snapshot(user),
            queue_depth: self.queue.depth(user),
            stages: self
                .stages
                .iter()
                .filter_map(|stage| {
                    stage.age_of(user).map(|age| StageStatus {
                        namespace: stage.namespace(),
                        age,
                    })
                })
                .collect(),
        }
    }

    /// Periodically reclaim memory held by expired sessions and staged
    /// entries. Correctness never depends on this; expiry stays lazy.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let stages = self.stages.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let swept_sessions = sessions.sweep();
                let swept_entries: usize =
                    stages.iter().map(|stage| stage.sweep_expired()).sum();
                if swept_sessions + swept_entries > 0 {
                    debug!(
                        sessions = swept_sessions,
                        stage_entries = swept_entries,
                        "sweep reclaimed expired state"
                    );
                }
            }
        })
    }

    fn turn_context(&self) -> TurnContext {
        TurnContext {
            sessions: self.sessions.clone(),
            router: Arc::clone(&self.router),
            miss_reply: Arc::clone(&self.miss_reply),
            failure_reply: Arc::clone(&self.failure_reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::cache::StageCache;
    use crate::catalog::{FlowBlueprint, Seed};
    use crate::flow::{ChildOutcome, Flow, Turn};
    use tokio::sync::Notify;

    fn user(raw: &str) -> UserKey {
        UserKey::from(raw)
    }

    fn message(raw: &str, text: &str) -> InboundEvent {
        InboundEvent::message(user(raw), text)
    }

    /// Collects words across turns; finishes on "done", cancels on
    /// "never mind", fails on "explode", delegates on "pick".
    #[derive(Default)]
    struct Scripted {
        words: Vec<String>,
    }

    #[async_trait]
    impl Flow for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn on_turn(&mut self, event: &InboundEvent) -> anyhow::Result<Turn> {
            match event.text.as_str() {
                "done" => Ok(Turn::done(format!("took {} words", self.words.len()))),
                "never mind" => Ok(Turn::cancel("dropped it")),
                "explode" => anyhow::bail!("collaborator blew up"),
                "pick" => Ok(Turn::delegate(Picker)),
                other => {
                    self.words.push(other.to_string());
                    Ok(Turn::reply(format!("got {other}")))
                }
            }
        }

        async fn on_child_complete(&mut self, outcome: ChildOutcome) -> anyhow::Result<Turn> {
            match outcome {
                ChildOutcome::Completed { value, .. } => {
                    Ok(Turn::reply(format!("picked {value}")))
                }
                ChildOutcome::Cancelled { .. } => Ok(Turn::reply("back to the main question")),
            }
        }
    }

    struct Picker;

    #[async_trait]
    impl Flow for Picker {
        fn name(&self) -> &'static str {
            "picker"
        }

        async fn on_turn(&mut self, event: &InboundEvent) -> anyhow::Result<Turn> {
            if event.text == "pick" {
                return Ok(Turn::reply("which one?"));
            }
            Ok(Turn::done_with("noted", event.text.clone().into()))
        }
    }

    struct ScriptedBlueprint;

    impl FlowBlueprint for ScriptedBlueprint {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn rule_matches(&self, text: &str) -> bool {
            text.starts_with("start")
        }

        fn build(&self, _seed: Seed) -> Box<dyn Flow> {
            Box::new(Scripted::default())
        }
    }

    /// Blocks its opening turn until released, to stage races.
    struct Gated {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Flow for Gated {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn on_turn(&mut self, _event: &InboundEvent) -> anyhow::Result<Turn> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(Turn::reply("finally"))
        }
    }

    struct GatedBlueprint {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl FlowBlueprint for GatedBlueprint {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn rule_matches(&self, text: &str) -> bool {
            text == "block"
        }

        fn build(&self, _seed: Seed) -> Box<dyn Flow> {
            Box::new(Gated {
                started: Arc::clone(&self.started),
                release: Arc::clone(&self.release),
            })
        }
    }

    fn orchestrator() -> Orchestrator {
        let mut catalog = FlowCatalog::new();
        catalog.register(Arc::new(ScriptedBlueprint));
        Orchestrator::new(Arc::new(catalog))
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn full_conversation_lifecycle() {
        let orch = orchestrator();
        let u = user("a");

        assert_eq!(orch.handle(message("a", "start now")).await.unwrap(), "got start now");
        assert_eq!(orch.status(&u).session.map(|s| s.root), Some("scripted"));

        // an active session swallows text that would otherwise rule-match
        assert_eq!(
            orch.handle(message("a", "start again")).await.unwrap(),
            "got start again"
        );

        assert_eq!(orch.handle(message("a", "done")).await.unwrap(), "took 2 words");
        assert!(orch.status(&u).session.is_none());

        // the next message is evaluated fresh and misses
        assert_eq!(
            orch.handle(message("a", "unrelated")).await.unwrap(),
            DEFAULT_MISS_REPLY
        );
        assert!(orch.status(&u).session.is_none());
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn miss_creates_no_state() {
        let orch = orchestrator().with_miss_reply("try /help");
        assert_eq!(orch.handle(message("a", "mumble")).await.unwrap(), "try /help");
        let report = orch.status(&user("a"));
        assert!(report.session.is_none());
        assert_eq!(report.queue_depth, 0);
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn flow_error_mid_conversation_keeps_the_session() {
        let orch = orchestrator().with_failure_reply("sorry, retry?");
        orch.handle(message("a", "start")).await.unwrap();

        assert_eq!(orch.handle(message("a", "explode")).await.unwrap(), "sorry, retry?");
        // still there, still on the same step
        assert_eq!(
            orch.status(&user("a")).session.map(|s| s.root),
            Some("scripted")
        );
        assert_eq!(orch.handle(message("a", "done")).await.unwrap(), "took 0 words");
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn flow_error_on_opening_turn_leaves_no_session() {
        struct Fragile;

        #[async_trait]
        impl Flow for Fragile {
            fn name(&self) -> &'static str {
                "fragile"
            }

            async fn on_turn(&mut self, _event: &InboundEvent) -> anyhow::Result<Turn> {
                anyhow::bail!("boom")
            }
        }

        struct FragileBlueprint;

        impl FlowBlueprint for FragileBlueprint {
            fn name(&self) -> &'static str {
                "fragile"
            }

            fn rule_matches(&self, text: &str) -> bool {
                text == "go"
            }

            fn build(&self, _seed: Seed) -> Box<dyn Flow> {
                Box::new(Fragile)
            }
        }

        let mut catalog = FlowCatalog::new();
        catalog.register(Arc::new(FragileBlueprint));
        let orch = Orchestrator::new(Arc::new(catalog));

        assert_eq!(orch.handle(message("a", "go")).await.unwrap(), DEFAULT_FAILURE_REPLY);
        assert!(orch.status(&user("a")).session.is_none());
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn self_cancel_ends_the_session() {
        let orch = orchestrator();
        orch.handle(message("a", "start")).await.unwrap();
        assert_eq!(
            orch.handle(message("a", "never mind")).await.unwrap(),
            "dropped it"
        );
        assert!(orch.status(&user("a")).session.is_none());
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn cancel_command_pops_child_then_root() {
        let orch = orchestrator();
        let u = user("a");
        orch.handle(message("a", "start")).await.unwrap();
        assert_eq!(orch.handle(message("a", "pick")).await.unwrap(), "which one?");
        assert_eq!(orch.status(&u).session.map(|s| s.active), Some("picker"));

        assert_eq!(
            orch.cancel(&u).await.unwrap(),
            CancelReport::Child {
                cancelled: "picker",
                reply: "back to the main question".into()
            }
        );
        assert_eq!(orch.status(&u).session.map(|s| s.active), Some("scripted"));

        assert_eq!(
            orch.cancel(&u).await.unwrap(),
            CancelReport::Root { flow: "scripted" }
        );
        assert!(orch.status(&u).session.is_none());

        assert_eq!(orch.cancel(&u).await.unwrap(), CancelReport::Idle);
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn reset_reports_everything_it_dropped() {
        let stage: Arc<StageCache<Vec<String>>> =
            Arc::new(StageCache::new("documents", Duration::from_secs(300)));
        let mut catalog = FlowCatalog::new();
        catalog.register(Arc::new(ScriptedBlueprint));
        let stage_ns: Arc<dyn StagedNamespace> = stage.clone();
        let orch = Orchestrator::new(Arc::new(catalog)).with_stage(stage_ns);

        let u = user("a");
        orch.handle(message("a", "start")).await.unwrap();
        stage.put(u.clone(), vec!["row".into()]);

        let outcome = orch.reset(&u);
        assert_eq!(outcome.abandoned_flow, Some("scripted"));
        assert_eq!(outcome.purged_stages, vec!["documents"]);
        assert!(orch.status(&u).session.is_none());
        assert!(stage.get(&u).is_none());

        // resetting again finds nothing
        let outcome = orch.reset(&u);
        assert_eq!(outcome.abandoned_flow, None);
        assert!(outcome.purged_stages.is_empty());
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn reset_during_inflight_turn_discards_its_state_but_keeps_the_reply() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut catalog = FlowCatalog::new();
        catalog.register(Arc::new(GatedBlueprint {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }));
        let orch = Arc::new(Orchestrator::new(Arc::new(catalog)));

        let task = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.handle(message("a", "block")).await })
        };
        started.notified().await;

        // reset lands while the opening turn is suspended
        let _ = orch.reset(&user("a"));
        release.notify_one();

        // the reply was computed honestly and still goes out
        assert_eq!(task.await.unwrap().unwrap(), "finally");
        // but the flow state was discarded at check-in
        assert!(orch.status(&user("a")).session.is_none());
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn reset_drops_queued_events_and_their_senders_learn_it() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut catalog = FlowCatalog::new();
        catalog.register(Arc::new(GatedBlueprint {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }));
        let orch = Arc::new(Orchestrator::new(Arc::new(catalog)));

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.handle(message("a", "block")).await })
        };
        started.notified().await;

        let second = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.handle(message("a", "queued up")).await })
        };
        // let the second event land in the lane before resetting
        tokio::time::sleep(Duration::from_millis(20)).await;

        let outcome = orch.reset(&user("a"));
        assert_eq!(outcome.dropped_tasks, 1);
        release.notify_one();

        assert!(first.await.unwrap().is_ok());
        assert_eq!(second.await.unwrap(), Err(QueueError::Discarded));
    }

    #[tokio::test]
    #[expect(clippy::unwrap_used, reason = "Test failure should panic with context")]
    async fn status_reports_queue_depth_and_stage_ages() {
        let stage: Arc<StageCache<String>> =
            Arc::new(StageCache::new("categorization", Duration::from_secs(1800)));
        let mut catalog = FlowCatalog::new();
        catalog.register(Arc::new(ScriptedBlueprint));
        let stage_ns: Arc<dyn StagedNamespace> = stage.clone();
        let orch = Orchestrator::new(Arc::new(catalog)).with_stage(stage_ns);

        let u = user("a");
        stage.put(u.clone(), "working set".into());
        orch.handle(message("a", "start")).await.unwrap();

        let report = orch.status(&u);
        let session = report.session.unwrap();
        assert_eq!(session.root, "scripted");
        assert_eq!(session.active_step, "active");
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.stages[0].namespace, "categorization");
    }
}
