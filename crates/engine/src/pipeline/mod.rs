mod analyze;
mod clarify;
mod collect;
mod evaluate;
mod plan;
mod process;
mod synthesize;
pub mod text;
mod verify;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use deepresearch_common::api::ProgressEvent;
use deepresearch_common::config::Settings;
use deepresearch_common::types::ResearchSession;
use deepresearch_common::Result;
use deepresearch_fetch::ContentFetcher;

use crate::llm::LlmRouter;
use crate::memory::MemoryStore;
use crate::providers::ProviderFleet;

pub use analyze::AnalyzeNode;
pub use clarify::ClarifyNode;
pub use collect::CollectNode;
pub use evaluate::EvaluateNode;
pub use plan::PlanNode;
pub use process::ProcessNode;
pub use synthesize::SynthesizeNode;
pub use verify::VerifyNode;

/// Collaborators a node may touch. Side effects happen only through these.
pub struct NodeContext {
    pub fleet: Arc<ProviderFleet>,
    pub fetcher: Arc<ContentFetcher>,
    pub router: Arc<LlmRouter>,
    pub memory: Arc<MemoryStore>,
    pub settings: Arc<Settings>,
    pub cancelled: Arc<AtomicBool>,
    pub progress: broadcast::Sender<ProgressEvent>,
}

impl NodeContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn emit(&self, event: ProgressEvent) {
        // No subscribers is fine; events are best-effort.
        let _ = self.progress.send(event);
    }
}

/// What a node reports back. The orchestrator owns the phase transition this
/// maps to — nodes never set `session.phase` themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Proceed along the regular edge.
    Advance,
    /// Clarify only: park the session until the user approves.
    AwaitApproval,
    /// Evaluate only: another collect cycle is warranted.
    LoopCollect,
    /// Evaluate only: stop collecting and synthesize.
    StopAndSynthesize,
}

/// Uniform pipeline node capability: read the session, apply a delta, report
/// an outcome.
pub trait PipelineNode: Send + Sync {
    fn name(&self) -> &'static str;

    fn run<'a>(
        &'a self,
        ctx: &'a NodeContext,
        session: &'a mut ResearchSession,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>>;
}
