mod domain;
mod entity;
mod fact;
mod report;
mod saturation;
mod session;

pub use domain::{DomainConfiguration, ResearchDomain, SaturationWeights, VerificationPolicy};
pub use entity::{normalize_url, Entity};
pub use fact::{Contradiction, ContradictionKind, Fact, FactGroup};
pub use report::{Finding, Methodology, Report, ReportSource};
pub use saturation::SaturationMetrics;
pub use session::{Phase, PrivacyMode, ResearchPlan, ResearchSession, StopReason};
