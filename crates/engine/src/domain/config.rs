use std::path::Path;

use deepresearch_common::types::{DomainConfiguration, ResearchDomain};
use deepresearch_common::{ResearchError, Result};

use crate::memory::MemoryStore;

/// Materialize the default playbooks for any domain missing its JSON file.
/// Run once at startup so operators always have files to edit.
pub fn ensure_default_playbooks(data_dir: &Path) -> Result<()> {
    let dir = data_dir.join("domain_configs");
    std::fs::create_dir_all(&dir)
        .map_err(|e| ResearchError::Config(format!("cannot create {}: {}", dir.display(), e)))?;

    for domain in ResearchDomain::all() {
        let path = dir.join(format!("{}.json", domain.as_str()));
        if path.exists() {
            continue;
        }
        let config = DomainConfiguration::default_for(domain);
        let json = serde_json::to_string_pretty(&config)?;
        std::fs::write(&path, json)
            .map_err(|e| ResearchError::Config(format!("cannot write {}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "Wrote default domain playbook");
    }

    Ok(())
}

/// Load a domain's playbook: JSON file if present (falling back to built-in
/// defaults), then overlay the persisted override from memory. The merge is
/// shallow — top-level fields only, last write wins.
pub async fn load_domain_config(
    data_dir: &Path,
    domain: ResearchDomain,
    memory: &MemoryStore,
) -> DomainConfiguration {
    let path = data_dir
        .join("domain_configs")
        .join(format!("{}.json", domain.as_str()));

    let base = match std::fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str::<DomainConfiguration>(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Malformed playbook, using defaults");
                DomainConfiguration::default_for(domain)
            }
        },
        Err(_) => DomainConfiguration::default_for(domain),
    };

    let override_value = match memory.domain_override(domain).await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Could not load domain override");
            None
        }
    };

    match override_value {
        Some(override_value) => merge_shallow(base, override_value, domain),
        None => base,
    }
}

fn merge_shallow(
    base: DomainConfiguration,
    override_value: serde_json::Value,
    domain: ResearchDomain,
) -> DomainConfiguration {
    let mut merged = match serde_json::to_value(&base) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => return base,
    };

    if let serde_json::Value::Object(overrides) = override_value {
        for (key, value) in overrides {
            merged.insert(key, value);
        }
    }

    match serde_json::from_value(serde_json::Value::Object(merged)) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(domain = domain.as_str(), error = %e, "Override merge produced invalid config, using base");
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_override_merge_is_shallow_last_write_wins() {
        let memory = MemoryStore::in_memory().await.unwrap();
        memory
            .set_domain_override(
                ResearchDomain::General,
                &serde_json::json!({
                    "saturation_threshold": 0.7,
                    "preferred_providers": ["exa"]
                }),
            )
            .await
            .unwrap();

        let config = load_domain_config(
            Path::new("/nonexistent"),
            ResearchDomain::General,
            &memory,
        )
        .await;

        assert_eq!(config.saturation_threshold, 0.7);
        assert_eq!(config.preferred_providers, vec!["exa".to_string()]);
        // Fields not named in the override keep their base values.
        assert_eq!(
            config.min_cycles,
            DomainConfiguration::default_for(ResearchDomain::General).min_cycles
        );
    }

    #[tokio::test]
    async fn test_missing_playbook_uses_defaults() {
        let memory = MemoryStore::in_memory().await.unwrap();
        let config = load_domain_config(
            Path::new("/nonexistent"),
            ResearchDomain::Medical,
            &memory,
        )
        .await;
        assert!(config.verification.enabled);
    }
}
