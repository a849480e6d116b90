use serde::Serialize;

use deepresearch_common::config::Settings;

use crate::domain::ensure_default_playbooks;
use crate::llm::OllamaClient;
use crate::providers::ProviderFleet;

/// State of one feature in the startup matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureState {
    Enabled,
    Degraded,
    Disabled,
}

#[derive(Clone, Debug, Serialize)]
pub struct FeatureStatus {
    pub name: String,
    pub state: FeatureState,
    pub detail: String,
}

/// Result of the boot-time dependency probe. `pass == false` means the
/// process must refuse to serve.
#[derive(Clone, Debug, Serialize)]
pub struct StartupReport {
    pub pass: bool,
    pub features: Vec<FeatureStatus>,
}

impl StartupReport {
    pub fn feature(&self, name: &str) -> Option<&FeatureStatus> {
        self.features.iter().find(|f| f.name == name)
    }
}

/// Probe dependencies, validate credentials (format only — no live billing
/// calls), verify the data directory, and assemble the feature matrix.
/// Missing optional providers degrade; a missing LLM backend fails startup.
pub async fn run_startup_checks(
    settings: &Settings,
    ollama: Option<&OllamaClient>,
    fleet: &ProviderFleet,
) -> StartupReport {
    let mut features = Vec::new();

    // Data directory must be writable.
    let data_dir_ok = check_data_dir(settings);
    features.push(FeatureStatus {
        name: "data_dir".into(),
        state: if data_dir_ok {
            FeatureState::Enabled
        } else {
            FeatureState::Disabled
        },
        detail: settings.data_dir.display().to_string(),
    });

    // Domain playbooks materialize on first boot.
    let playbooks_ok = ensure_default_playbooks(&settings.data_dir).is_ok();
    features.push(FeatureStatus {
        name: "domain_configs".into(),
        state: if playbooks_ok {
            FeatureState::Enabled
        } else {
            FeatureState::Disabled
        },
        detail: "domain_configs/".into(),
    });

    // Local inference.
    let local_ok = match ollama {
        Some(client) => match client.probe().await {
            Ok(models) => {
                features.push(FeatureStatus {
                    name: "ollama".into(),
                    state: FeatureState::Enabled,
                    detail: format!("{} model(s) installed", models.len()),
                });
                true
            }
            Err(e) => {
                features.push(FeatureStatus {
                    name: "ollama".into(),
                    state: FeatureState::Disabled,
                    detail: format!("unreachable: {}", e),
                });
                false
            }
        },
        None => {
            features.push(FeatureStatus {
                name: "ollama".into(),
                state: FeatureState::Disabled,
                detail: "not configured".into(),
            });
            false
        }
    };

    // Cloud key: format check only, no live call.
    let cloud_ok = match settings.anthropic_api_key.as_deref() {
        Some(key) if key.starts_with("sk-ant-") => {
            features.push(FeatureStatus {
                name: "anthropic".into(),
                state: FeatureState::Enabled,
                detail: "key present".into(),
            });
            true
        }
        Some(_) => {
            features.push(FeatureStatus {
                name: "anthropic".into(),
                state: FeatureState::Degraded,
                detail: "key has unexpected format".into(),
            });
            true
        }
        None => {
            features.push(FeatureStatus {
                name: "anthropic".into(),
                state: FeatureState::Disabled,
                detail: "ANTHROPIC_API_KEY not set".into(),
            });
            false
        }
    };

    // Provider enumeration: optional, degrade only.
    let available = fleet.available_names();
    for name in [
        "tavily",
        "brave",
        "exa",
        "semantic_scholar",
        "pubmed",
        "arxiv",
        "unpaywall",
        "crawler",
    ] {
        let enabled = available.contains(&name);
        features.push(FeatureStatus {
            name: format!("provider:{}", name),
            state: if enabled {
                FeatureState::Enabled
            } else {
                FeatureState::Disabled
            },
            detail: if enabled {
                "available".into()
            } else {
                "credentials missing".into()
            },
        });
    }

    // Gate: storage must work and at least one LLM backend must exist.
    let pass = data_dir_ok && playbooks_ok && (local_ok || cloud_ok);

    if !pass {
        tracing::error!("Startup validation failed — refusing to serve");
    } else {
        let degraded = features
            .iter()
            .filter(|f| f.state != FeatureState::Enabled)
            .count();
        tracing::info!(
            features = features.len(),
            degraded,
            "Startup validation passed"
        );
    }

    StartupReport { pass, features }
}

fn check_data_dir(settings: &Settings) -> bool {
    if std::fs::create_dir_all(&settings.data_dir).is_err() {
        return false;
    }
    let probe = settings.data_dir.join(".write_probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
