mod classifier;
mod config;

pub use classifier::{classify, classify_by_keywords};
pub use config::{ensure_default_playbooks, load_domain_config};
