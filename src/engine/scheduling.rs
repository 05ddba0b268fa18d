//! Check scheduling, launching and passive freshness

use rand::Rng;

use super::{render_command, Engine, EngineError, LogCategory};
use crate::model::{Action, ActionKind, CheckResult, EntityId, EntityKind, StateType};

/// Interval used for hosts configured with a zero check interval
const DEFAULT_HOST_INTERVAL_SECS: i64 = 300;

impl Engine {
    /// Compute the entity's next check time.
    ///
    /// The first schedule is spread randomly over the interval (capped at
    /// the configured spread); later ones add the interval to the previous
    /// check time and snap it into the check window. A result still in the
    /// past is spread again from `now`. Returns `None` when nothing is
    /// scheduled.
    pub fn schedule(&mut self, id: EntityId, now: i64, force: bool) -> Option<i64> {
        let il = self.config.interval_length.max(1);
        let spread = self.config.max_check_spread;
        let execute = self.config.execute_checks;

        let entity = self.registry.get_mut(id)?;
        if entity.in_checking && !force {
            return None;
        }
        if force {
            entity.next_check = now;
            return Some(now);
        }
        if !entity.settings.active_checks_enabled || !execute {
            return None;
        }

        let settings = &entity.settings;
        let interval = if entity.state_type == StateType::Soft && settings.retry_interval != 0 {
            settings.retry_interval as i64 * il
        } else if settings.check_interval != 0 {
            settings.check_interval as i64 * il
        } else {
            match entity.kind {
                EntityKind::Service => return None,
                EntityKind::Host => DEFAULT_HOST_INTERVAL_SECS,
            }
        };

        let window = settings.check_window.clone();
        let spread_window = interval.min(spread).max(0);
        let candidate = if entity.next_check == 0 {
            now + (spread_window as f64 * self.rng.gen::<f64>()) as i64
        } else if entity.next_check <= now {
            entity.next_check + interval
        } else {
            return Some(entity.next_check);
        };

        let mut next = self.windows.next_valid_time(window.as_deref(), candidate);
        if next.map_or(false, |t| t < now) {
            let respread = now + (spread_window as f64 * self.rng.gen::<f64>()) as i64;
            next = self.windows.next_valid_time(window.as_deref(), respread);
        }

        entity.next_check = next.unwrap_or(i64::MAX);
        if next.is_none() {
            tracing::debug!(entity = %entity.full_name(), "Check window never opens again");
        }
        next
    }

    /// Launch every active check whose time has come. Returns the number of
    /// checks launched, internal business-rule checks included.
    pub fn launch_due_checks(&mut self, now: i64) -> usize {
        if !self.config.execute_checks {
            return 0;
        }

        let unscheduled: Vec<EntityId> = self
            .registry
            .iter()
            .filter(|e| e.next_check == 0 && !e.in_checking && e.settings.active_checks_enabled)
            .map(|e| e.id)
            .collect();
        for id in unscheduled {
            self.schedule(id, now, false);
        }

        let due: Vec<EntityId> = self
            .registry
            .iter()
            .filter(|e| {
                !e.in_checking
                    && e.settings.active_checks_enabled
                    && e.next_check != 0
                    && e.next_check <= now
            })
            .map(|e| e.id)
            .collect();

        due.into_iter()
            .filter(|id| self.launch_check(*id, now))
            .count()
    }

    /// Start one check. Business rules are evaluated in place and their
    /// result consumed right away; everything else becomes a check action.
    fn launch_check(&mut self, id: EntityId, now: i64) -> bool {
        let Some(entity) = self.registry.get(id) else {
            return false;
        };
        if !self
            .windows
            .is_valid(entity.settings.check_window.as_deref(), now)
        {
            self.schedule(id, now, false);
            return false;
        }
        let scheduled = entity.next_check;

        let internal = if let Some(rule) = &entity.business_rule {
            let mut result = match rule.evaluate_cycle(&entity.custom_vars, &self.registry) {
                Ok(status) => CheckResult::new(
                    status.ordinal() as i32,
                    format!("Business rule state: {}", status.label(entity.kind)),
                ),
                Err(error) => CheckResult::new(3, error.to_string()),
            };
            result.scheduled_time = Some(scheduled);
            Some(result)
        } else if entity.settings.check_command.is_none() {
            match entity.kind {
                EntityKind::Host => {
                    let mut result = CheckResult::new(0, "Host assumed UP, no check command");
                    result.scheduled_time = Some(scheduled);
                    Some(result)
                }
                EntityKind::Service => {
                    tracing::warn!(entity = %entity.full_name(), "Service has no check command");
                    self.schedule(id, now, false);
                    return false;
                }
            }
        } else {
            None
        };

        if let Some(result) = internal {
            if let Err(error) = self.consume_result(id, result.at(now), now) {
                tracing::warn!(entity = %id, %error, "Internal check result rejected");
            }
            return true;
        }

        let template = entity.settings.check_command.as_deref().unwrap_or_default();
        let command = render_command(template, entity);
        let action = Action::check(
            self.sequence.next_action_id(),
            id,
            command,
            self.config.check_timeout,
            scheduled,
        );
        if let Some(entity) = self.registry.get_mut(id) {
            entity.in_checking = true;
        }
        self.enqueue(action);
        true
    }

    /// Check the entity now, even if a check is already in flight
    pub fn force_check(&mut self, id: EntityId, now: i64) -> Result<bool, EngineError> {
        self.entity(id)?;
        self.actions.retain(|action| {
            !(action.kind == ActionKind::Check && action.target == id && !action.dependency_check)
        });

        let entity = self.entity_mut(id)?;
        entity.in_checking = false;
        self.schedule(id, now, true);
        tracing::info!(entity = %id, "Forced check");
        Ok(self.launch_check(id, now))
    }

    /// Synthesize a result for every passive-only entity whose results went
    /// stale. Each expiry produces a single synthetic result; the next real
    /// result re-arms the check. Returns how many entities went stale.
    pub fn check_freshness(&mut self, now: i64) -> usize {
        if !self.config.check_freshness {
            return 0;
        }
        let il = self.config.interval_length;
        let latency = self.config.additional_freshness_latency;
        let started_at = self.started_at;

        let stale: Vec<(EntityId, i64, i64)> = self
            .registry
            .iter()
            .filter(|e| {
                e.settings.check_freshness
                    && !e.settings.active_checks_enabled
                    && !e.in_checking
                    && !e.freshness_expired
            })
            .filter(|e| self.windows.is_valid(e.settings.check_window.as_deref(), now))
            .filter_map(|e| {
                let threshold =
                    e.settings.check_interval as i64 * il + e.settings.freshness_threshold + latency;
                let last = started_at.map_or(e.last_state_update, |t| e.last_state_update.max(t));
                let age = now - last;
                (age > threshold).then_some((e.id, age - threshold, threshold))
            })
            .collect();

        for (id, late, threshold) in &stale {
            let Some(entity) = self.registry.get(*id) else {
                continue;
            };
            let code = entity.settings.freshness_state.ordinal() as i32;
            self.log(
                now,
                LogCategory::Freshness,
                *id,
                format!(
                    "The results are stale by {} seconds (threshold={} seconds). Forcing an immediate check",
                    late, threshold
                ),
            );

            let mut result = CheckResult::new(code, "Freshness period expired").at(now).passive();
            result.freshness_expired = true;
            if let Err(error) = self.consume_result(*id, result, now) {
                tracing::warn!(entity = %id, %error, "Freshness result rejected");
            }
        }
        stale.len()
    }
}
