//! Alert state machine: turns a check result into state, attempt and
//! state-type changes plus the side effects they call for

use super::flapping::FlapTransition;
use super::{Engine, EngineError, LogCategory, SequenceGenerator, WaitingResult};
use crate::model::{
    modulate_exit_code, CheckResult, CheckableEntity, EntityId, EntityKind, StateType, Status,
};
use crate::notify::NotificationKind;

/// Side effect requested by a transition, applied in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    AlertLog,
    EventHandler,
    ZombieNotifications,
    Notify(NotificationKind),
    RegisterProblem,
    UnregisterProblem,
}

/// Facts about the incoming result the transition table branches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Exit code 0 after modulation
    pub ok: bool,
    /// The entity had never been checked
    pub was_pending: bool,
    /// Result of a check launched for a dependent entity
    pub dependency_check: bool,
    /// A failed dependency explains the problem; no notification, no
    /// problem registration
    pub no_action: bool,
}

/// Apply the transition table to an entity whose `state` and `last_state`
/// are already set from the new result.
pub fn transition(entity: &mut CheckableEntity, verdict: Verdict) -> Vec<Effect> {
    use Effect::*;

    let mut effects = Vec::new();
    let problem = |effects: &mut Vec<Effect>| {
        effects.push(AlertLog);
        effects.push(ZombieNotifications);
        if !verdict.no_action {
            effects.push(Notify(NotificationKind::Problem));
        }
        effects.push(EventHandler);
        if !verdict.no_action {
            effects.push(RegisterProblem);
        }
    };
    let last_ok = verdict.was_pending || entity.last_state.is_ok();

    if verdict.ok && last_ok {
        entity.acknowledgement = None;
        if entity.state_type == StateType::Soft && !verdict.was_pending {
            entity.add_attempt();
            if entity.is_max_attempts() {
                entity.state_type = StateType::Hard;
                entity.attempt = 1;
            }
        } else {
            entity.attempt = 1;
            entity.state_type = StateType::Hard;
        }
    } else if verdict.ok {
        entity.acknowledgement = None;
        match entity.state_type {
            StateType::Soft => {
                if !verdict.dependency_check {
                    entity.add_attempt();
                }
                effects.extend([AlertLog, EventHandler]);
                if entity.is_max_attempts() {
                    entity.state_type = StateType::Hard;
                    entity.attempt = 1;
                }
            }
            StateType::Hard => {
                effects.extend([
                    AlertLog,
                    ZombieNotifications,
                    Notify(NotificationKind::Recovery),
                    EventHandler,
                ]);
                entity.attempt = 1;
                effects.push(UnregisterProblem);
            }
        }
    } else if entity.kind == EntityKind::Service && entity.settings.is_volatile {
        entity.attempt = 1;
        entity.state_type = StateType::Hard;
        problem(&mut effects);
    } else if last_ok {
        entity.attempt = 1;
        if entity.is_max_attempts() {
            entity.state_type = StateType::Hard;
            problem(&mut effects);
        } else {
            entity.state_type = StateType::Soft;
            effects.extend([AlertLog, EventHandler]);
        }
    } else {
        match entity.state_type {
            StateType::Soft => {
                if !verdict.dependency_check {
                    entity.add_attempt();
                }
                if entity.state != entity.last_state {
                    unacknowledge_if_not_sticky(entity);
                }
                if entity.is_max_attempts() {
                    entity.state_type = StateType::Hard;
                    problem(&mut effects);
                } else {
                    effects.extend([AlertLog, EventHandler]);
                }
            }
            StateType::Hard => {
                if entity.state != entity.last_state {
                    // HARD CRITICAL -> UNKNOWN -> CRITICAL must not re-notify
                    update_hard_unknown_phase(entity);
                    let phase = entity.hard_unknown_phase;
                    if !phase.active && !phase.was_active {
                        unacknowledge_if_not_sticky(entity);
                        effects.extend([AlertLog, ZombieNotifications]);
                        if !verdict.no_action {
                            effects.push(Notify(NotificationKind::Problem));
                        }
                    }
                } else if entity.downtime_just_ended || !has_been_notified(entity) {
                    effects.push(ZombieNotifications);
                    if !verdict.no_action {
                        effects.push(Notify(NotificationKind::Problem));
                    }
                }
                if !verdict.no_action {
                    effects.push(RegisterProblem);
                }
            }
        }
    }

    update_hard_unknown_phase(entity);
    effects
}

fn unacknowledge_if_not_sticky(entity: &mut CheckableEntity) {
    if entity
        .acknowledgement
        .as_ref()
        .map_or(false, |ack| !ack.sticky)
    {
        entity.acknowledgement = None;
    }
}

/// A problem notification went out or is still pending for this episode
fn has_been_notified(entity: &CheckableEntity) -> bool {
    entity.current_notification_number > 0
        || entity
            .notifications_in_progress
            .values()
            .any(|n| n.is_master() && n.kind == NotificationKind::Problem)
}

/// Track stretches of HARD UNKNOWN/UNREACHABLE. Leaving the phase with the
/// state it was entered from counts as never having been in it.
pub fn update_hard_unknown_phase(entity: &mut CheckableEntity) {
    let phase = &mut entity.hard_unknown_phase;
    phase.was_active = phase.active;

    if entity.state_type != StateType::Hard || entity.last_state_type != StateType::Hard {
        phase.active = false;
    }

    if !phase.active {
        let entering = (entity.state == Status::Unknown && entity.last_state != Status::Unknown)
            || (entity.state == Status::Unreachable && entity.last_state != Status::Unreachable);
        if entering {
            phase.active = true;
            phase.state_before = Some(entity.last_state);
            return;
        }
    } else if !entity.state.is_unknown_like() {
        phase.active = false;
    }

    if !phase.active && phase.was_active && Some(entity.state) != phase.state_before {
        phase.was_active = false;
    }
}

/// Event ids move on every state change; problem ids are allocated on
/// entering a problem, kept across problem states and zeroed on OK.
pub fn update_event_and_problem_id(
    entity: &mut CheckableEntity,
    was_pending: bool,
    sequence: &dyn SequenceGenerator,
) {
    let ok = entity.state.is_ok();
    let changed =
        (entity.state != entity.last_state && !was_pending) || (!ok && was_pending);
    if !changed {
        return;
    }

    entity.last_event_id = entity.current_event_id;
    entity.current_event_id = sequence.next_event_id();

    if ok {
        entity.last_problem_id = entity.current_problem_id;
        entity.current_problem_id = 0;
    } else if was_pending || entity.last_state.is_ok() {
        entity.last_problem_id = entity.current_problem_id;
        entity.current_problem_id = sequence.next_problem_id();
    }
}

impl Engine {
    /// Consume a check result for an entity.
    ///
    /// A non-OK result whose check dependencies are stale is parked and
    /// dependency checks are queued instead; it is applied once they land.
    pub fn consume_result(
        &mut self,
        id: EntityId,
        result: CheckResult,
        now: i64,
    ) -> Result<(), EngineError> {
        let entity = self.entity(id)?;
        if result.passive && !result.freshness_expired && !entity.settings.passive_checks_enabled {
            return Err(EngineError::PassiveChecksDisabled(entity.full_name()));
        }

        let code = modulate_exit_code(
            &entity.settings.result_modulations,
            result.exit_code,
            &self.windows,
            now,
        );
        if code != 0 && !self.waiting.contains_key(&id) {
            let dependencies = self.graph.unchecked_critical_dependencies(
                id,
                &self.registry,
                &self.windows,
                self.config.cached_check_horizon,
                now,
            );
            if !dependencies.is_empty() {
                self.park(id, result, dependencies, now);
                return Ok(());
            }
        }

        self.apply_result(id, result, now);
        Ok(())
    }

    fn park(&mut self, id: EntityId, result: CheckResult, dependencies: Vec<EntityId>, now: i64) {
        let mut names = Vec::with_capacity(dependencies.len());
        for dependency in &dependencies {
            let Some(parent) = self.registry.get_mut(*dependency) else {
                continue;
            };
            parent.in_checking = true;
            names.push(parent.full_name());
            let command = parent.settings.check_command.clone().unwrap_or_default();
            let command = super::render_command(&command, parent);

            let mut action = crate::model::Action::check(
                self.sequence.next_action_id(),
                *dependency,
                command,
                self.config.check_timeout,
                now,
            );
            action.dependency_check = true;
            self.enqueue(action);
        }

        if let Some(entity) = self.registry.get_mut(id) {
            entity.parked_result = Some(result);
            entity.in_checking = true;
        }
        self.waiting.insert(
            id,
            WaitingResult {
                since: now,
                dependencies: dependencies.into_iter().collect(),
            },
        );
        self.log(
            now,
            LogCategory::Dependency,
            id,
            format!("Waiting for dependency checks on {}", names.join(", ")),
        );
    }

    /// Replay parked results whose dependencies never answered
    pub(crate) fn release_stale_waiting(&mut self, now: i64) {
        let limit = self.config.check_timeout as i64 + self.config.cached_check_horizon;
        let stale: Vec<EntityId> = self
            .waiting
            .iter()
            .filter(|(_, waiting)| now - waiting.since > limit)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.waiting.remove(&id);
            tracing::warn!(entity = %id, "Dependency checks timed out, applying parked result");
            self.replay_parked(id, now);
        }
    }

    fn replay_parked(&mut self, id: EntityId, now: i64) {
        let parked = self
            .registry
            .get_mut(id)
            .and_then(|e| e.parked_result.take());
        if let Some(result) = parked {
            self.apply_result(id, result, now);
        }
    }

    /// A result landed for `id`: release dependents waiting only on it
    fn release_waiting(&mut self, id: EntityId, now: i64) {
        let mut ready = Vec::new();
        for (dependent, waiting) in self.waiting.iter_mut() {
            if waiting.dependencies.remove(&id) && waiting.dependencies.is_empty() {
                ready.push(*dependent);
            }
        }
        for dependent in ready {
            self.waiting.remove(&dependent);
            self.replay_parked(dependent, now);
        }
    }

    pub(crate) fn apply_result(&mut self, id: EntityId, result: CheckResult, now: i64) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        let kind = entity.kind;
        let code = modulate_exit_code(
            &entity.settings.result_modulations,
            result.exit_code,
            &self.windows,
            now,
        );
        let ok = code == 0;
        let no_action = !ok && self.graph.is_action_suppressed(id, &self.registry, &self.windows, now);
        let unreachable = !ok && kind == EntityKind::Host && self.graph.is_unreachable(id, &self.registry);
        let impact_states = self.config.enable_impact_state_change;

        let Some(entity) = self.registry.get_mut(id) else {
            return;
        };
        let was_pending = !entity.has_been_checked;
        entity.has_been_checked = true;
        entity.in_checking = false;
        entity.parked_result = None;

        let completed = if result.completion_time > 0 {
            result.completion_time
        } else {
            now
        };
        entity.last_check = completed;
        entity.latency = result.scheduled_time.map_or(0.0, |scheduled| {
            (completed as f64 - result.execution_time - scheduled as f64).max(0.0)
        });
        entity.execution_time = result.execution_time;
        entity.output = result.output;
        entity.long_output = result.long_output;
        entity.perf_data = result.perf_data;

        entity.freshness_expired = result.freshness_expired;
        if !result.freshness_expired {
            entity.last_state_update = now;
        }

        entity.last_state_type = entity.state_type;
        entity.last_state = if impact_states && entity.is_impact && !entity.state_changed_since_impact {
            entity.state_before_impact.unwrap_or(entity.state)
        } else {
            entity.state
        };
        entity.state = if unreachable {
            Status::Unreachable
        } else {
            Status::from_exit_code(kind, code)
        };
        if entity.state != entity.last_state {
            entity.last_state_change = now;
        }
        if entity.is_impact {
            entity.state_changed_since_impact = true;
        }

        let effects = transition(
            entity,
            Verdict {
                ok,
                was_pending,
                dependency_check: result.dependency_check,
                no_action,
            },
        );
        debug_assert!(entity.attempt >= 1 && entity.attempt <= entity.settings.max_check_attempts.max(1));

        if entity.state_type == StateType::Hard {
            if entity.last_state_type == StateType::Soft || entity.last_hard_state != entity.state {
                entity.last_hard_state_change = now;
            }
            entity.last_hard_state = entity.state;
        }
        update_event_and_problem_id(entity, was_pending, self.sequence.as_ref());
        let changed = entity.state != entity.last_state;
        entity.downtime_just_ended = false;

        for effect in effects {
            self.apply_effect(id, effect, now);
        }
        self.record_flap_sample(id, changed, now);

        tracing::debug!(
            entity = %id,
            state = ?self.registry.get(id).map(|e| e.state),
            "Result applied"
        );

        self.schedule(id, now, false);
        self.release_waiting(id, now);
    }

    fn apply_effect(&mut self, id: EntityId, effect: Effect, now: i64) {
        match effect {
            Effect::AlertLog => {
                if let Some(entity) = self.registry.get(id) {
                    let message = format!(
                        "{};{};{};{}",
                        entity.state.label(entity.kind),
                        entity.state_type,
                        entity.attempt,
                        entity.output
                    );
                    self.log(now, LogCategory::Alert, id, message);
                }
            }
            Effect::EventHandler => self.run_event_handler(id, now),
            Effect::ZombieNotifications => self.zombie_notifications(id),
            Effect::Notify(kind) => self.raise_notification(id, kind, now),
            Effect::RegisterProblem => {
                self.graph
                    .register_problem(&mut self.registry, &self.windows, id, now);
            }
            Effect::UnregisterProblem => {
                self.graph
                    .unregister_problem(&mut self.registry, &self.windows, id, now);
            }
        }
    }

    fn record_flap_sample(&mut self, id: EntityId, changed: bool, now: i64) {
        if !self.config.enable_flap_detection {
            return;
        }
        let (history, default_low, default_high) = (
            self.config.flap_history,
            self.config.low_flap_threshold,
            self.config.high_flap_threshold,
        );
        let Some(entity) = self.registry.get_mut(id) else {
            return;
        };
        if !entity.settings.flap_detection_enabled {
            return;
        }
        let low = entity.settings.low_flap_threshold.unwrap_or(default_low);
        let high = entity.settings.high_flap_threshold.unwrap_or(default_high);

        let Some(flap) = entity.flap.record(changed, history, low, high) else {
            return;
        };
        let percent = entity.flap.percent();
        let (message, kind) = match flap {
            FlapTransition::Started => (
                format!("STARTED; {:.1}% state change >= {:.1}% threshold", percent, high),
                NotificationKind::FlappingStart,
            ),
            FlapTransition::Stopped => (
                format!("STOPPED; {:.1}% state change < {:.1}% threshold", percent, low),
                NotificationKind::FlappingStop,
            ),
        };
        self.log(now, LogCategory::Flapping, id, message);
        self.zombie_notifications(id);
        self.raise_notification(id, kind, now);
    }
}
