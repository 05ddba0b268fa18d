//! Resolved monitoring configuration loaded from JSON
//!
//! The inventory is already flattened: no templates, no inheritance. Loading
//! it registers every entity, adds the implicit service-to-host and
//! host-parent dependencies, then compiles business rules once every entity
//! they may reference exists.
//!
//! ```json
//! {
//!   "windows": { "office": { "kind": "daily", "start": 28800, "end": 64800 } },
//!   "hosts": [
//!     { "name": "router", "check_command": "check_ping $HOSTNAME$" },
//!     { "name": "web1", "parents": ["router"], "groups": ["web"] }
//!   ],
//!   "services": [
//!     { "host": "web1", "description": "http", "check_command": "check_http" }
//!   ],
//!   "contacts": [ { "name": "ops", "command": "notify-ops" } ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineError};
use crate::graph::{DependencyEdge, DependencyPurpose, FailureCriteria, GraphError};
use crate::model::{CheckSettings, EntityId, EntityKind, Status, WindowSpec};
use crate::notify::{Contact, Escalation};
use crate::rules::RuleError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub windows: BTreeMap<String, WindowSpec>,
    pub hosts: Vec<HostSpec>,
    pub services: Vec<ServiceSpec>,
    pub dependencies: Vec<DependencySpec>,
    pub contacts: Vec<Contact>,
    pub escalations: Vec<Escalation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    /// Network parents; the host is unreachable when all of them are down
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_vars: HashMap<String, String>,
    #[serde(default)]
    pub business_rule: Option<String>,
    #[serde(default)]
    pub rebuild_each_check: bool,
    #[serde(flatten)]
    pub settings: CheckSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub host: String,
    pub description: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_vars: HashMap<String, String>,
    #[serde(default)]
    pub business_rule: Option<String>,
    #[serde(default)]
    pub rebuild_each_check: bool,
    #[serde(flatten)]
    pub settings: CheckSettings,
}

/// Explicit dependency between two entities named `host` or `host/service`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    pub parent: String,
    pub dependent: String,
    /// Letters of the parent states that fail the dependency, e.g. `"w,c"`.
    /// Defaults to DOWN/UNREACHABLE for host parents and CRITICAL/UNKNOWN
    /// for service parents.
    #[serde(default)]
    pub failure_criteria: Option<String>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub inherits_parent: bool,
    #[serde(default = "both_purposes")]
    pub purposes: Vec<DependencyPurpose>,
}

fn both_purposes() -> Vec<DependencyPurpose> {
    vec![DependencyPurpose::Check, DependencyPurpose::Action]
}

/// Business rule configuration problem, kept next to the rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDiagnostic {
    pub entity: String,
    pub error: RuleError,
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Failed to read inventory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid inventory: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Inventory {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InventoryError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, InventoryError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Register everything into a fresh engine. Rule diagnostics do not
    /// fail the build; they are returned alongside the engine.
    pub fn build(&self, config: EngineConfig) -> Result<(Engine, Vec<RuleDiagnostic>), InventoryError> {
        let mut engine = Engine::new(config);

        for (name, spec) in &self.windows {
            engine.add_window(name.clone(), spec.build());
        }
        for contact in &self.contacts {
            engine.add_contact(contact.clone());
        }
        for escalation in &self.escalations {
            engine.add_escalation(escalation.clone());
        }

        let mut rules: Vec<(EntityId, &str, bool)> = Vec::new();
        for spec in &self.hosts {
            let id = engine.add_host(&spec.name, spec.settings.clone());
            let entity = engine.entity_mut(id)?;
            entity.groups = spec.groups.clone();
            entity.labels = spec.labels.clone();
            entity.tags = spec.tags.clone();
            entity.custom_vars = spec.custom_vars.clone();
            if let Some(rule) = &spec.business_rule {
                rules.push((id, rule.as_str(), spec.rebuild_each_check));
            }
        }
        for spec in &self.services {
            let host = engine
                .registry()
                .host_id(&spec.host)
                .ok_or_else(|| InventoryError::UnknownHost(spec.host.clone()))?;
            let id = engine.add_service(host, &spec.description, spec.settings.clone())?;
            let entity = engine.entity_mut(id)?;
            entity.groups = spec.groups.clone();
            entity.labels = spec.labels.clone();
            entity.tags = spec.tags.clone();
            entity.custom_vars = spec.custom_vars.clone();
            if let Some(rule) = &spec.business_rule {
                rules.push((id, rule.as_str(), spec.rebuild_each_check));
            }

            for purpose in [DependencyPurpose::Check, DependencyPurpose::Action] {
                engine.add_dependency(implicit_edge(host, id, purpose, false))?;
            }
        }

        for spec in &self.hosts {
            let Some(child) = engine.registry().host_id(&spec.name) else {
                continue;
            };
            for parent in &spec.parents {
                let parent = engine
                    .registry()
                    .host_id(parent)
                    .ok_or_else(|| InventoryError::UnknownHost(parent.clone()))?;
                for purpose in [DependencyPurpose::Check, DependencyPurpose::Action] {
                    engine.add_dependency(implicit_edge(parent, child, purpose, true))?;
                }
            }
        }

        for spec in &self.dependencies {
            let from = resolve(&engine, &spec.parent)?;
            let to = resolve(&engine, &spec.dependent)?;
            let kind = engine.entity(from)?.kind;
            let criteria = match (&spec.failure_criteria, kind) {
                (Some(text), _) => FailureCriteria::parse(text, kind)?,
                (None, EntityKind::Host) => FailureCriteria::down_or_unreachable(),
                (None, EntityKind::Service) => {
                    FailureCriteria::new([Status::Critical, Status::Unknown])
                }
            };
            for purpose in &spec.purposes {
                engine.add_dependency(DependencyEdge {
                    from,
                    to,
                    criteria: criteria.clone(),
                    window: spec.window.clone(),
                    inherits_parent: spec.inherits_parent,
                    purpose: *purpose,
                    network: false,
                })?;
            }
        }

        let mut diagnostics = Vec::new();
        for (id, expression, rebuild) in rules {
            let name = engine.entity(id)?.full_name();
            for error in engine.set_business_rule(id, expression, rebuild)? {
                diagnostics.push(RuleDiagnostic {
                    entity: name.clone(),
                    error,
                });
            }
        }

        for (name, reference) in self.window_references() {
            if !engine.windows().contains(reference) {
                tracing::warn!(entity = %name, window = %reference, "Unknown time window, treated as always valid");
            }
        }

        tracing::info!(
            hosts = self.hosts.len(),
            services = self.services.len(),
            dependencies = engine.graph().edges().len(),
            diagnostics = diagnostics.len(),
            "Inventory loaded"
        );
        Ok((engine, diagnostics))
    }

    fn window_references(&self) -> impl Iterator<Item = (String, &str)> {
        let hosts = self.hosts.iter().map(|h| (h.name.clone(), &h.settings));
        let services = self
            .services
            .iter()
            .map(|s| (format!("{}/{}", s.host, s.description), &s.settings));
        hosts.chain(services).flat_map(|(name, settings)| {
            [
                settings.check_window.as_deref(),
                settings.notification_window.as_deref(),
            ]
            .into_iter()
            .flatten()
            .map(move |window| (name.clone(), window))
        })
    }
}

fn implicit_edge(
    from: EntityId,
    to: EntityId,
    purpose: DependencyPurpose,
    network: bool,
) -> DependencyEdge {
    DependencyEdge {
        from,
        to,
        criteria: FailureCriteria::down_or_unreachable(),
        window: None,
        inherits_parent: false,
        purpose,
        network,
    }
}

fn resolve(engine: &Engine, name: &str) -> Result<EntityId, InventoryError> {
    engine
        .registry()
        .lookup(name)
        .ok_or_else(|| InventoryError::UnknownEntity(name.to_string()))
}
