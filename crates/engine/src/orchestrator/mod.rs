use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use deepresearch_common::api::{ProgressEvent, StatusResponse};
use deepresearch_common::config::Settings;
use deepresearch_common::types::{
    Phase, PrivacyMode, Report, ResearchSession, StopReason,
};
use deepresearch_common::{ResearchError, Result, SessionId};
use deepresearch_fetch::ContentFetcher;

use crate::export;
use crate::llm::LlmRouter;
use crate::memory::MemoryStore;
use crate::pipeline::{
    AnalyzeNode, ClarifyNode, CollectNode, EvaluateNode, NodeContext, NodeOutcome, PipelineNode,
    PlanNode, ProcessNode, SynthesizeNode, VerifyNode,
};
use crate::providers::ProviderFleet;

/// Progress events retained per session for pollers.
const EVENT_BUFFER_CAP: usize = 1_000;

/// Live state of one session as seen from outside the pipeline. The
/// authoritative session lives in the run loop; the snapshot is refreshed
/// between phase transitions only, so readers always see a consistent state.
pub struct SessionHandle {
    snapshot: RwLock<ResearchSession>,
    cancelled: Arc<AtomicBool>,
    approved: AtomicBool,
    progress: broadcast::Sender<ProgressEvent>,
    events: RwLock<Vec<ProgressEvent>>,
}

impl SessionHandle {
    fn new(session: &ResearchSession) -> Self {
        let (progress, _) = broadcast::channel(256);
        Self {
            snapshot: RwLock::new(session.clone()),
            cancelled: Arc::new(AtomicBool::new(false)),
            approved: AtomicBool::new(false),
            progress,
            events: RwLock::new(Vec::new()),
        }
    }

    async fn record_event(&self, event: ProgressEvent) {
        let mut events = self.events.write().await;
        if events.len() < EVENT_BUFFER_CAP {
            events.push(event);
        }
    }
}

/// Drives research sessions through the pipeline state machine. Owns every
/// phase transition; nodes only report outcomes. Emits progress events,
/// honors cooperative cancellation, and persists results at terminal phases.
pub struct Orchestrator {
    fleet: Arc<ProviderFleet>,
    fetcher: Arc<ContentFetcher>,
    router: Arc<LlmRouter>,
    memory: Arc<MemoryStore>,
    settings: Arc<Settings>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl Orchestrator {
    pub fn new(
        fleet: Arc<ProviderFleet>,
        fetcher: Arc<ContentFetcher>,
        router: Arc<LlmRouter>,
        memory: Arc<MemoryStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            fleet,
            fetcher,
            router,
            memory,
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a new research session; the lifecycle runs on a spawned task.
    pub async fn start_research(
        self: &Arc<Self>,
        query: &str,
        privacy: PrivacyMode,
    ) -> Result<SessionId> {
        if query.trim().is_empty() {
            return Err(ResearchError::Validation("query must not be empty".into()));
        }

        let session = ResearchSession::new(query, privacy);
        let id = session.id;
        let handle = Arc::new(SessionHandle::new(&session));

        self.memory.save_session(&session).await?;
        self.sessions.write().await.insert(id, Arc::clone(&handle));

        tracing::info!(session_id = %id, query = %query, "Research session created");
        metrics::counter!("sessions.created").increment(1);

        let orchestrator = Arc::clone(self);
        let run_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            orchestrator.run_session(run_handle, session).await;
        });

        Ok(id)
    }

    /// The state machine driver.
    async fn run_session(self: Arc<Self>, handle: Arc<SessionHandle>, mut session: ResearchSession) {
        let ctx = NodeContext {
            fleet: Arc::clone(&self.fleet),
            fetcher: Arc::clone(&self.fetcher),
            router: Arc::clone(&self.router),
            memory: Arc::clone(&self.memory),
            settings: Arc::clone(&self.settings),
            cancelled: Arc::clone(&handle.cancelled),
            progress: handle.progress.clone(),
        };

        // Mirror node-emitted events into the poll buffer.
        {
            let buffer_handle = Arc::clone(&handle);
            let mut rx = handle.progress.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    buffer_handle.record_event(event).await;
                }
            });
        }

        let clarify = ClarifyNode;
        let plan = PlanNode;
        let collect = CollectNode;
        let process = ProcessNode;
        let analyze = AnalyzeNode;
        let verify = VerifyNode;
        let evaluate = EvaluateNode;
        let synthesize = SynthesizeNode;

        self.transition(&handle, &mut session, Phase::Clarify).await;

        loop {
            if session.phase.is_terminal() {
                return;
            }

            if handle.cancelled.load(Ordering::Relaxed) {
                self.finalize_cancelled(&handle, &mut session).await;
                return;
            }

            let node: &dyn PipelineNode = match session.phase {
                Phase::Clarify => &clarify,
                Phase::AwaitingApproval => {
                    // Parked: poll for approval or cancellation.
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    if handle.approved.load(Ordering::Relaxed) {
                        session.refined_query = session.query.clone();
                        session.clarification = None;
                        self.transition(&handle, &mut session, Phase::Plan).await;
                    }
                    continue;
                }
                Phase::Plan => &plan,
                Phase::Collect => &collect,
                Phase::Process => &process,
                Phase::Analyze => &analyze,
                Phase::Verify => &verify,
                Phase::Evaluate => &evaluate,
                Phase::Synthesize => &synthesize,
                Phase::Export => {
                    self.finalize_complete(&handle, &mut session).await;
                    return;
                }
                other => {
                    tracing::error!(phase = other.as_str(), "Driver reached unexpected phase");
                    self.finalize_failed(&handle, &mut session, "invalid phase".into())
                        .await;
                    return;
                }
            };

            let outcome = node.run(&ctx, &mut session).await;

            let next = match outcome {
                Ok(outcome) => self.next_phase(&session, outcome),
                Err(ResearchError::Cancelled) => {
                    self.finalize_cancelled(&handle, &mut session).await;
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session.id,
                        node = node.name(),
                        error = %e,
                        "Node failed, session moving to failed"
                    );
                    self.finalize_failed(&handle, &mut session, e.to_string()).await;
                    return;
                }
            };

            self.transition(&handle, &mut session, next).await;
        }
    }

    /// The transition table. Nodes cannot self-transition; every edge of the
    /// state machine is written here.
    fn next_phase(&self, session: &ResearchSession, outcome: NodeOutcome) -> Phase {
        match (session.phase, outcome) {
            (Phase::Clarify, NodeOutcome::AwaitApproval) => Phase::AwaitingApproval,
            (Phase::Clarify, _) => Phase::Plan,
            (Phase::Plan, _) => Phase::Collect,
            (Phase::Collect, _) => Phase::Process,
            (Phase::Process, _) => Phase::Analyze,
            (Phase::Analyze, _) => {
                let verify_enabled = session
                    .plan
                    .as_ref()
                    .map(|p| p.verification.enabled)
                    .unwrap_or(false);
                if verify_enabled {
                    Phase::Verify
                } else {
                    Phase::Evaluate
                }
            }
            (Phase::Verify, _) => Phase::Evaluate,
            (Phase::Evaluate, NodeOutcome::LoopCollect) => Phase::Collect,
            (Phase::Evaluate, _) => Phase::Synthesize,
            (Phase::Synthesize, _) => Phase::Export,
            (phase, _) => phase,
        }
    }

    async fn transition(&self, handle: &SessionHandle, session: &mut ResearchSession, next: Phase) {
        session.phase = next;
        *handle.snapshot.write().await = session.clone();

        let event = ProgressEvent::Phase { phase: next };
        let _ = handle.progress.send(event);

        tracing::debug!(session_id = %session.id, phase = next.as_str(), "Phase transition");
        metrics::counter!("sessions.transitions", "phase" => next.as_str()).increment(1);
    }

    async fn finalize_complete(&self, handle: &SessionHandle, session: &mut ResearchSession) {
        if let Some(report) = &session.report {
            if let Err(e) = export::write_report_files(&self.settings.data_dir, report) {
                tracing::warn!(session_id = %session.id, error = %e, "Report export failed");
            }
        }

        self.learn_from_session(session).await;

        session.completed_at = Some(Utc::now());
        self.transition(handle, session, Phase::Complete).await;
        self.persist(session).await;

        let stop_reason = session
            .stop_reason
            .map(|r| r.as_str().to_string())
            .unwrap_or_default();
        let _ = handle.progress.send(ProgressEvent::Done { stop_reason });

        tracing::info!(session_id = %session.id, "Session complete");
        metrics::counter!("sessions.completed").increment(1);
    }

    async fn finalize_cancelled(&self, handle: &SessionHandle, session: &mut ResearchSession) {
        session.stop_reason = Some(StopReason::Cancelled);
        session.completed_at = Some(Utc::now());
        // Partial results already merged are preserved as-is.
        self.transition(handle, session, Phase::Complete).await;
        self.persist(session).await;

        let _ = handle.progress.send(ProgressEvent::Done {
            stop_reason: StopReason::Cancelled.as_str().to_string(),
        });

        tracing::info!(session_id = %session.id, "Session cancelled");
        metrics::counter!("sessions.cancelled").increment(1);
    }

    async fn finalize_failed(
        &self,
        handle: &SessionHandle,
        session: &mut ResearchSession,
        error: String,
    ) {
        session.stop_reason = Some(StopReason::FatalError);
        session.error = Some(error.clone());
        session.completed_at = Some(Utc::now());
        self.transition(handle, session, Phase::Failed).await;
        // Persist partial results even on failure.
        self.persist(session).await;

        let _ = handle.progress.send(ProgressEvent::Error {
            code: "fatal_error".into(),
            message: error,
        });
        let _ = handle.progress.send(ProgressEvent::Done {
            stop_reason: StopReason::FatalError.as_str().to_string(),
        });

        metrics::counter!("sessions.failed").increment(1);
    }

    async fn persist(&self, session: &ResearchSession) {
        if let Err(e) = self.memory.save_session(session).await {
            tracing::error!(session_id = %session.id, error = %e, "Failed to persist session");
        }
    }

    /// Post-run learning: fold per-provider contribution into the
    /// effectiveness table, once per session, only when a report exists.
    /// A provider observed 1.0 contributed at least one fact to the final
    /// report; 0.0 was queried without contributing.
    async fn learn_from_session(&self, session: &ResearchSession) {
        let Some(report) = &session.report else {
            return;
        };

        let provider_of: HashMap<&str, &str> = session
            .entities
            .iter()
            .map(|e| (e.url.as_str(), e.provider.as_str()))
            .collect();

        let contributing: std::collections::HashSet<&str> = report
            .findings
            .iter()
            .filter_map(|f| provider_of.get(f.source.as_str()).copied())
            .collect();

        let observations: Vec<(String, f64)> = session
            .providers_queried
            .iter()
            .map(|provider| {
                let observed = if contributing.contains(provider.as_str()) {
                    1.0
                } else {
                    0.0
                };
                (provider.clone(), observed)
            })
            .collect();

        if let Err(e) = self
            .memory
            .learn_effectiveness(session.domain, &observations)
            .await
        {
            tracing::warn!(session_id = %session.id, error = %e, "Effectiveness update failed");
        }
    }

    // --- External control surface -----------------------------------------

    async fn handle(&self, id: SessionId) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ResearchError::NotFound(format!("session {}", id)))
    }

    /// Approve a session parked in awaiting_approval.
    pub async fn approve(&self, id: SessionId) -> Result<()> {
        let handle = self.handle(id).await?;
        handle.approved.store(true, Ordering::Relaxed);
        tracing::info!(session_id = %id, "Session approved");
        Ok(())
    }

    /// Request cooperative cancellation.
    pub async fn stop(&self, id: SessionId) -> Result<()> {
        let handle = self.handle(id).await?;
        handle.cancelled.store(true, Ordering::Relaxed);
        tracing::info!(session_id = %id, "Session stop requested");
        Ok(())
    }

    /// Consistent status snapshot (refreshed between phase transitions).
    pub async fn status(&self, id: SessionId) -> Result<StatusResponse> {
        let handle = self.handle(id).await?;
        let session = handle.snapshot.read().await;

        let status = match session.phase {
            Phase::Complete => "complete",
            Phase::Failed => "failed",
            Phase::AwaitingApproval => "awaiting_approval",
            _ => "running",
        };

        Ok(StatusResponse {
            session_id: session.id,
            current_phase: session.phase,
            status: status.to_string(),
            cycle: session.cycle,
            entities_found: session.entities.len(),
            facts_extracted: session.facts.len(),
            sources_queried: session.providers_queried.clone(),
            saturation_metrics: session.saturation,
            stop_reason: session.stop_reason.map(|r| r.as_str().to_string()),
            clarification: session.clarification.clone(),
        })
    }

    /// The final report, from the live snapshot or the archive.
    pub async fn report(&self, id: SessionId) -> Result<Report> {
        if let Ok(handle) = self.handle(id).await {
            if let Some(report) = handle.snapshot.read().await.report.clone() {
                return Ok(report);
            }
        }

        match self.memory.load_report_json(&id.to_string()).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(ResearchError::NotFound(format!("report for session {}", id))),
        }
    }

    /// Subscribe to a session's live progress stream.
    pub async fn subscribe(&self, id: SessionId) -> Result<broadcast::Receiver<ProgressEvent>> {
        Ok(self.handle(id).await?.progress.subscribe())
    }

    /// Buffered progress events from `since`, for HTTP polling.
    pub async fn events_since(
        &self,
        id: SessionId,
        since: usize,
    ) -> Result<(Vec<ProgressEvent>, usize)> {
        let handle = self.handle(id).await?;
        let events = handle.events.read().await;
        let slice: Vec<ProgressEvent> = events.iter().skip(since).cloned().collect();
        Ok((slice, events.len()))
    }

    pub async fn active_sessions(&self) -> usize {
        let sessions = self.sessions.read().await;
        let mut active = 0;
        for handle in sessions.values() {
            if !handle.snapshot.read().await.phase.is_terminal() {
                active += 1;
            }
        }
        active
    }
}
