//! Monitoring engine: the single writer over entities, dependency graph and
//! notification state
//!
//! Every operation takes an explicit `now` (unix seconds). Work that must
//! run outside the engine (checks, notifications, event handlers) is queued
//! as [`Action`]s and fed back through [`Engine::consume_result`] and
//! [`Engine::notification_completed`].

pub mod ack;
pub mod audit;
pub mod flapping;
pub mod scheduling;
pub mod sequence;
pub mod transition;

pub use audit::{AuditLog, LogCategory, LogEntry};
pub use flapping::{FlapHistory, FlapTransition};
pub use sequence::{AtomicSequence, SequenceGenerator};
pub use transition::{Effect, Verdict};

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::graph::{DependencyEdge, DependencyGraph, GraphError};
use crate::model::{
    Action, ActionKind, CheckSettings, CheckableEntity, EntityId, Registry, Status, TimeWindow,
    TimeWindows,
};
use crate::notify::{
    Contact, Escalation, NotificationKind, NotificationScheduler, NotificationStatus,
};
use crate::rules::{evaluate, BusinessRule, BusinessRuleParser, RuleError};

/// Non-OK result waiting for its dependencies to be re-checked
#[derive(Debug, Clone)]
pub(crate) struct WaitingResult {
    pub since: i64,
    pub dependencies: BTreeSet<EntityId>,
}

/// What one [`Engine::tick`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub checks_launched: usize,
    pub notifications: usize,
    pub stale: usize,
    pub expired_acknowledgements: usize,
}

pub struct Engine {
    pub(crate) registry: Registry,
    pub(crate) graph: DependencyGraph,
    pub(crate) windows: TimeWindows,
    pub(crate) notifier: NotificationScheduler,
    pub(crate) sequence: Arc<dyn SequenceGenerator>,
    pub(crate) rng: StdRng,
    pub(crate) actions: VecDeque<Action>,
    pub(crate) audit: AuditLog,
    pub(crate) config: EngineConfig,
    pub(crate) waiting: HashMap<EntityId, WaitingResult>,
    pub(crate) started_at: Option<i64>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let mut notifier =
            NotificationScheduler::new(config.interval_length, config.notification_timeout);
        notifier.enabled = config.enable_notifications;

        Self {
            registry: Registry::new(),
            graph: DependencyGraph::new(config.impact_policy()),
            windows: TimeWindows::new(),
            notifier,
            sequence: Arc::new(AtomicSequence::new()),
            rng: StdRng::from_entropy(),
            actions: VecDeque::new(),
            audit: AuditLog::new(config.audit_capacity),
            config,
            waiting: HashMap::new(),
            started_at: None,
        }
    }

    pub fn with_sequence(mut self, sequence: Arc<dyn SequenceGenerator>) -> Self {
        self.sequence = sequence;
        self
    }

    /// Deterministic check spreading
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn add_window(&mut self, name: impl Into<String>, window: Arc<dyn TimeWindow>) {
        self.windows.insert(name, window);
    }

    pub fn add_host(&mut self, name: &str, settings: CheckSettings) -> EntityId {
        self.registry.add_host(name, settings)
    }

    pub fn add_service(
        &mut self,
        host: EntityId,
        description: &str,
        settings: CheckSettings,
    ) -> Result<EntityId, EngineError> {
        self.registry
            .add_service(host, description, settings)
            .ok_or(EngineError::UnknownEntityId(host))
    }

    pub fn add_dependency(&mut self, edge: DependencyEdge) -> Result<(), EngineError> {
        self.graph.link(edge, &self.registry)?;
        Ok(())
    }

    pub fn add_contact(&mut self, contact: Contact) {
        self.notifier.add_contact(contact);
    }

    pub fn add_escalation(&mut self, escalation: Escalation) {
        self.notifier.add_escalation(escalation);
    }

    /// Make the entity's check the given business rule. Returns the
    /// configuration diagnostics; the rule is attached even when there are
    /// some.
    pub fn set_business_rule(
        &mut self,
        id: EntityId,
        expression: &str,
        rebuild_each_check: bool,
    ) -> Result<Vec<RuleError>, EngineError> {
        let entity = self.entity(id)?;
        let rule = BusinessRule::compile(
            expression,
            &entity.custom_vars,
            &self.registry,
            rebuild_each_check,
        );
        let diagnostics = rule.diagnostics.clone();
        self.entity_mut(id)?.business_rule = Some(rule);
        Ok(diagnostics)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn windows(&self) -> &TimeWindows {
        &self.windows
    }

    pub fn notifier(&self) -> &NotificationScheduler {
        &self.notifier
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn entity(&self, id: EntityId) -> Result<&CheckableEntity, EngineError> {
        self.registry.get(id).ok_or(EngineError::UnknownEntityId(id))
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Result<&mut CheckableEntity, EngineError> {
        self.registry
            .get_mut(id)
            .ok_or(EngineError::UnknownEntityId(id))
    }

    /// Resolve `host` or `host/service`
    pub fn lookup(&self, name: &str) -> Result<EntityId, EngineError> {
        self.registry
            .lookup(name)
            .ok_or_else(|| EngineError::UnknownEntity(name.to_string()))
    }

    pub fn pending_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Hand every queued action to the caller
    pub fn drain_actions(&mut self) -> Vec<Action> {
        self.actions.drain(..).collect()
    }

    /// Evaluate an ad-hoc rule against current hard states
    pub fn evaluate_rule(&self, expression: &str) -> Result<Status, RuleError> {
        let root = BusinessRuleParser::new(&self.registry).parse_strict(expression)?;
        Ok(evaluate(&root, &self.registry))
    }

    /// One scheduling step: expire acknowledgements, synthesize stale
    /// passive results, release long-parked results, launch due checks and
    /// scatter due notifications.
    pub fn tick(&mut self, now: i64) -> TickReport {
        self.started_at.get_or_insert(now);

        let expired_acknowledgements = self.expire_acknowledgements(now);
        let stale = self.check_freshness(now);
        self.release_stale_waiting(now);
        self.refresh_business_impacts(now);
        let checks_launched = self.launch_due_checks(now);
        let notifications = self.send_due_notifications(now);

        TickReport {
            checks_launched,
            notifications,
            stale,
            expired_acknowledgements,
        }
    }

    fn send_due_notifications(&mut self, now: i64) -> usize {
        let actions = self.notifier.process_due(
            &mut self.registry,
            &self.windows,
            self.sequence.as_ref(),
            now,
        );
        let count = actions.len();
        for action in actions {
            if let Some(entity) = self.registry.get(action.target) {
                let kind = action.notification.unwrap_or(NotificationKind::Problem);
                let state = entity.state.label(entity.kind);
                let what = match kind {
                    NotificationKind::Problem | NotificationKind::Recovery => state.to_string(),
                    other => format!("{} ({})", other, state),
                };
                let message = format!(
                    "{};{};{};{}",
                    action.contact.as_deref().unwrap_or_default(),
                    what,
                    action.command,
                    entity.output
                );
                let name = entity.full_name();
                self.audit
                    .emit(now, LogCategory::Notification, name, message);
            }
            self.actions.push_back(action);
        }
        count
    }

    fn refresh_business_impacts(&mut self, now: i64) {
        let modulated: Vec<EntityId> = self
            .registry
            .iter()
            .filter(|e| !e.settings.business_impact_modulations.is_empty())
            .map(|e| e.id)
            .collect();
        for id in modulated {
            self.graph
                .recompute_business_impact(&mut self.registry, &self.windows, id, now);
        }
    }

    /// A worker finished delivering a notification
    pub fn notification_completed(
        &mut self,
        id: EntityId,
        notification_id: u64,
        exit_code: i32,
        output: &str,
        now: i64,
    ) -> Result<(), EngineError> {
        let entity = self.entity_mut(id)?;
        let name = entity.full_name();
        let notification = NotificationScheduler::complete(entity, notification_id).ok_or(
            EngineError::UnknownNotification {
                entity: name.clone(),
                id: notification_id,
            },
        )?;

        if exit_code != 0 {
            tracing::warn!(
                entity = %name,
                notification = notification_id,
                exit_code,
                "Notification command failed"
            );
        }
        let message = format!(
            "{};{};exit={};{}",
            notification.contact.unwrap_or_default(),
            notification.kind,
            exit_code,
            output
        );
        self.audit
            .emit(now, LogCategory::Notification, name, message);
        Ok(())
    }

    pub(crate) fn enqueue(&mut self, action: Action) {
        tracing::debug!(
            action = action.id,
            kind = ?action.kind,
            target = %action.target,
            "Queued action"
        );
        self.actions.push_back(action);
    }

    pub(crate) fn log(&mut self, now: i64, category: LogCategory, id: EntityId, message: String) {
        let name = self
            .registry
            .get(id)
            .map(|e| e.full_name())
            .unwrap_or_else(|| id.to_string());
        self.audit.emit(now, category, name, message);
    }

    pub(crate) fn raise_notification(&mut self, id: EntityId, kind: NotificationKind, now: i64) {
        let created = self.notifier.create(
            &mut self.registry,
            &self.windows,
            self.sequence.as_ref(),
            id,
            kind,
            now,
        );
        if let Some(notification) = created {
            tracing::debug!(entity = %id, notification, kind = %kind, "Notification created");
        }
    }

    /// Soft-cancel every in-flight notification of the entity
    pub(crate) fn zombie_notifications(&mut self, id: EntityId) {
        let Some(entity) = self.registry.get_mut(id) else {
            return;
        };
        let zombies = NotificationScheduler::zombie_all(entity);
        self.drop_queued_notifications(id, &zombies);
    }

    /// Soft-cancel only the per-contact notifications not yet delivered;
    /// masters stay and are blocked while the cause lasts.
    pub(crate) fn zombie_pending_children(&mut self, id: EntityId) {
        let Some(entity) = self.registry.get_mut(id) else {
            return;
        };
        let children: Vec<u64> = entity
            .notifications_in_progress
            .values()
            .filter(|n| !n.is_master())
            .map(|n| n.id)
            .collect();
        for child in &children {
            if let Some(mut notification) = entity.notifications_in_progress.remove(child) {
                notification.status = NotificationStatus::Zombie;
            }
        }
        self.drop_queued_notifications(id, &children);
    }

    fn drop_queued_notifications(&mut self, id: EntityId, notification_ids: &[u64]) {
        if notification_ids.is_empty() {
            return;
        }
        self.actions.retain(|action| {
            !(action.kind == ActionKind::Notification
                && action.target == id
                && action
                    .notification_id
                    .map_or(false, |n| notification_ids.contains(&n)))
        });
    }

    pub(crate) fn run_event_handler(&mut self, id: EntityId, now: i64) {
        if !self.config.enable_event_handlers {
            return;
        }
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        if !entity.settings.event_handler_enabled {
            return;
        }
        let Some(template) = entity.settings.event_handler.as_deref() else {
            return;
        };

        let command = render_command(template, entity);
        let message = format!(
            "{};{};{};{}",
            entity.state.label(entity.kind),
            entity.state_type,
            entity.attempt,
            command
        );
        let action = Action::event_handler(
            self.sequence.next_action_id(),
            id,
            command,
            self.config.event_handler_timeout,
            now,
        );
        self.log(now, LogCategory::EventHandler, id, message);
        self.enqueue(action);
    }
}

/// Substitute `$HOSTNAME$`, `$SERVICEDESC$`, `$STATE$`, `$STATETYPE$`,
/// `$ATTEMPT$`, `$OUTPUT$` and custom variables into a command line.
/// Unresolvable macros leave the template untouched.
pub(crate) fn render_command(template: &str, entity: &CheckableEntity) -> String {
    let mut vars = entity.custom_vars.clone();
    vars.insert("HOSTNAME".to_string(), entity.host_name.clone());
    vars.insert(
        "SERVICEDESC".to_string(),
        entity.service_description.clone().unwrap_or_default(),
    );
    vars.insert("STATE".to_string(), entity.state_label().to_string());
    vars.insert("STATETYPE".to_string(), entity.state_type.to_string());
    vars.insert("ATTEMPT".to_string(), entity.attempt.to_string());
    vars.insert("OUTPUT".to_string(), entity.output.clone());

    match crate::rules::expand_macros(template, &vars) {
        Ok(command) => command,
        Err(error) => {
            tracing::warn!(entity = %entity.full_name(), %error, "Command left unexpanded");
            template.to_string()
        }
    }
}

/// Engine operation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown entity id: {0}")]
    UnknownEntityId(EntityId),

    #[error("Passive checks are disabled for {0}")]
    PassiveChecksDisabled(String),

    #[error("{0} has no problem to acknowledge")]
    NothingToAcknowledge(String),

    #[error("{0} is not in downtime")]
    NotInDowntime(String),

    #[error("Unknown notification {id} on {entity}")]
    UnknownNotification { entity: String, id: u64 },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Rule(#[from] RuleError),
}
