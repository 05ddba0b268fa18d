//! Notification scheduling
//!
//! The state machine creates *master* notifications on an entity. Once due,
//! a master is scattered into one child per eligible contact; children are
//! handed out as actions, and problem masters are rescheduled for the next
//! repeat until the problem clears.

use std::collections::HashMap;

use super::{Contact, Escalation, Notification, NotificationKind, NotificationStatus};
use crate::engine::sequence::SequenceGenerator;
use crate::model::{
    Action, ActionKind, CheckableEntity, EntityId, Registry, StateType, TimeWindows,
};

#[derive(Debug)]
pub struct NotificationScheduler {
    contacts: Vec<Contact>,
    contact_index: HashMap<String, usize>,
    escalations: HashMap<String, Escalation>,
    /// Seconds per interval unit
    interval_length: i64,
    /// Seconds granted to a notification command
    timeout: u64,
    /// Global notification switch
    pub enabled: bool,
}

impl NotificationScheduler {
    pub fn new(interval_length: i64, timeout: u64) -> Self {
        Self {
            contacts: Vec::new(),
            contact_index: HashMap::new(),
            escalations: HashMap::new(),
            interval_length,
            timeout,
            enabled: true,
        }
    }

    pub fn add_contact(&mut self, contact: Contact) {
        match self.contact_index.get(&contact.name) {
            Some(index) => self.contacts[*index] = contact,
            None => {
                self.contact_index
                    .insert(contact.name.clone(), self.contacts.len());
                self.contacts.push(contact);
            }
        }
    }

    pub fn add_escalation(&mut self, escalation: Escalation) {
        self.escalations.insert(escalation.name.clone(), escalation);
    }

    pub fn contact(&self, name: &str) -> Option<&Contact> {
        self.contact_index.get(name).map(|i| &self.contacts[*i])
    }

    pub fn escalation(&self, name: &str) -> Option<&Escalation> {
        self.escalations.get(name)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    /// Create a master notification on `id`.
    ///
    /// The first PROBLEM of an episode is delayed by the entity's first
    /// notification delay; the wished time is then snapped into the
    /// notification window. RECOVERY resets the notification counter.
    pub fn create(
        &self,
        registry: &mut Registry,
        windows: &TimeWindows,
        sequence: &dyn SequenceGenerator,
        id: EntityId,
        kind: NotificationKind,
        now: i64,
    ) -> Option<u64> {
        let entity = registry.get(id)?;
        let settings = &entity.settings;
        let wished = if kind == NotificationKind::Problem && entity.current_notification_number == 0
        {
            now + settings.first_notification_delay as i64 * self.interval_length
        } else {
            now
        };

        let repeats = settings.first_notification_delay != 0 || settings.notification_interval != 0;
        if !repeats && self.is_blocked_by_item(registry, windows, id, kind, wished) {
            tracing::debug!(entity = %entity.full_name(), kind = %kind, "Notification dropped");
            return None;
        }
        let t_to_go = windows.next_valid_time(settings.notification_window.as_deref(), wished)?;

        let entity = registry.get_mut(id)?;
        let notif_nb = match kind {
            NotificationKind::Problem => entity.current_notification_number + 1,
            NotificationKind::Recovery => {
                entity.current_notification_number = 0;
                0
            }
            _ => entity.current_notification_number,
        };

        let notification = Notification {
            id: sequence.next_action_id(),
            kind,
            status: NotificationStatus::Scheduled,
            t_to_go,
            creation_time: now,
            notif_nb,
            state: entity.state,
            contact: None,
            escalated: false,
        };
        let notification_id = notification.id;
        entity
            .notifications_in_progress
            .insert(notification_id, notification);
        Some(notification_id)
    }

    /// Whether the entity's own condition forbids sending `kind` at `t`
    pub fn is_blocked_by_item(
        &self,
        registry: &Registry,
        windows: &TimeWindows,
        id: EntityId,
        kind: NotificationKind,
        t: i64,
    ) -> bool {
        let Some(entity) = registry.get(id) else {
            return true;
        };
        let settings = &entity.settings;
        let options = &settings.notification_options;

        if !self.enabled || !settings.notifications_enabled || options.is_none() {
            return true;
        }
        if !windows.is_valid(settings.notification_window.as_deref(), t) {
            return true;
        }
        if matches!(kind, NotificationKind::Problem | NotificationKind::Recovery)
            && !options.allows_state(entity.state)
        {
            return true;
        }
        if (kind.is_flapping() && !options.flapping) || (kind.is_downtime() && !options.downtime) {
            return true;
        }
        if kind == NotificationKind::Acknowledgement && entity.state.is_ok() {
            return true;
        }

        // Nested downtimes only let the end through
        if entity.downtime_depth > 1 && kind != NotificationKind::DowntimeEnd {
            return true;
        }
        if entity.in_downtime()
            && (matches!(kind, NotificationKind::Problem | NotificationKind::Recovery)
                || kind.is_flapping())
        {
            return true;
        }
        if entity.state_type == StateType::Soft && kind == NotificationKind::Problem {
            return true;
        }
        if entity.is_acknowledged() && kind != NotificationKind::Acknowledgement {
            return true;
        }
        if entity.flap.is_flapping() && !kind.is_flapping() {
            return true;
        }

        if let Some(host) = entity.host.and_then(|h| registry.get(h)) {
            if host.in_downtime() || (host.has_been_checked && !host.state.is_ok()) {
                return true;
            }
        }
        false
    }

    /// Scatter every due master notification. Returns the per-contact
    /// notification actions to execute.
    pub fn process_due(
        &self,
        registry: &mut Registry,
        windows: &TimeWindows,
        sequence: &dyn SequenceGenerator,
        now: i64,
    ) -> Vec<Action> {
        let due: Vec<(EntityId, u64)> = registry
            .iter()
            .flat_map(|entity| {
                entity
                    .notifications_in_progress
                    .values()
                    .filter(|n| n.is_master())
                    .filter(|n| n.status == NotificationStatus::Scheduled && n.t_to_go <= now)
                    .map(move |n| (entity.id, n.id))
            })
            .collect();

        let mut actions = Vec::new();
        for (id, notification_id) in due {
            let Some(master) = registry
                .get(id)
                .and_then(|e| e.notifications_in_progress.get(&notification_id))
                .cloned()
            else {
                continue;
            };

            let blocked = self.is_blocked_by_item(registry, windows, id, master.kind, now);
            let Some(entity) = registry.get_mut(id) else {
                continue;
            };
            let children = if blocked {
                Vec::new()
            } else {
                self.scatter(entity, &master, windows, sequence, now)
            };

            if master.kind == NotificationKind::Problem {
                if !children.is_empty() {
                    entity.current_notification_number = master.notif_nb;
                    entity.last_notification = now;
                }
                if entity.settings.notification_interval != 0 {
                    let next = self.next_notification_time(entity, &master, windows, now);
                    let notif_nb = entity.current_notification_number + 1;
                    if let Some(pending) = entity.notifications_in_progress.get_mut(&notification_id) {
                        pending.t_to_go = next;
                        pending.notif_nb = notif_nb;
                    }
                } else {
                    entity.notifications_in_progress.remove(&notification_id);
                }
            } else {
                entity.notifications_in_progress.remove(&notification_id);
            }

            for child in children {
                let Some(contact) = child.contact.as_deref().and_then(|c| self.contact(c)) else {
                    continue;
                };
                actions.push(Action {
                    id: child.id,
                    kind: ActionKind::Notification,
                    target: id,
                    command: contact.command.clone(),
                    timeout: self.timeout,
                    run_at: child.t_to_go,
                    dependency_check: false,
                    contact: Some(contact.name.clone()),
                    notification: Some(child.kind),
                    notification_id: Some(child.id),
                });
            }
        }
        actions
    }

    /// One child per contact that wants it. Recoveries go only to contacts
    /// that were told about the problem, and nowhere if the problem
    /// recovered before its first notification was sent.
    fn scatter(
        &self,
        entity: &mut CheckableEntity,
        master: &Notification,
        windows: &TimeWindows,
        sequence: &dyn SequenceGenerator,
        now: i64,
    ) -> Vec<Notification> {
        let mut escalated = false;
        let contacts: Vec<String> = if master.kind == NotificationKind::Recovery {
            let contacts = if entity.settings.first_notification_delay != 0
                && entity.notified_contacts.is_empty()
            {
                Vec::new()
            } else {
                entity.notified_contacts.iter().cloned().collect()
            };
            entity.notified_contacts.clear();
            contacts
        } else {
            let escalation_contacts = self.escalable_contacts(entity, master, windows, now);
            if escalation_contacts.is_empty() {
                entity.settings.contacts.clone()
            } else {
                escalated = true;
                escalation_contacts
            }
        };

        let mut children = Vec::new();
        for name in contacts {
            if master.kind == NotificationKind::Problem
                && entity.settings.notification_interval == 0
                && entity.notified_contacts.contains(&name)
            {
                continue;
            }
            let Some(contact) = self.contact(&name) else {
                tracing::warn!(contact = %name, entity = %entity.full_name(), "Unknown contact");
                continue;
            };
            if !contact.wants(
                entity.kind,
                master.kind,
                entity.state,
                entity.business_impact,
                windows,
                now,
            ) {
                continue;
            }

            let child = Notification {
                id: sequence.next_action_id(),
                kind: master.kind,
                status: NotificationStatus::Sent,
                t_to_go: master.t_to_go,
                creation_time: now,
                notif_nb: master.notif_nb,
                state: entity.state,
                contact: Some(name.clone()),
                escalated,
            };
            entity.notifications_in_progress.insert(child.id, child.clone());
            if master.kind == NotificationKind::Problem {
                entity.notified_contacts.insert(name);
            }
            children.push(child);
        }
        children
    }

    fn eligible_escalations<'a>(
        &'a self,
        entity: &'a CheckableEntity,
        master: &'a Notification,
        windows: &'a TimeWindows,
        now: i64,
    ) -> impl Iterator<Item = &'a Escalation> + 'a {
        let elapsed = now - master.creation_time;
        entity
            .settings
            .escalations
            .iter()
            .filter_map(|name| self.escalations.get(name))
            .filter(move |escalation| {
                escalation.is_eligible(
                    master.t_to_go,
                    master.kind,
                    entity.state,
                    master.notif_nb,
                    elapsed,
                    self.interval_length,
                    windows,
                )
            })
    }

    /// Union of the contacts of every eligible escalation, in declaration
    /// order without duplicates
    fn escalable_contacts(
        &self,
        entity: &CheckableEntity,
        master: &Notification,
        windows: &TimeWindows,
        now: i64,
    ) -> Vec<String> {
        let mut contacts: Vec<String> = Vec::new();
        for escalation in self.eligible_escalations(entity, master, windows, now) {
            for contact in &escalation.contacts {
                if !contacts.contains(contact) {
                    contacts.push(contact.clone());
                }
            }
        }
        contacts
    }

    /// Next repeat of a problem master: the shortest interval among the
    /// entity's and its eligible escalations', pulled earlier when a
    /// time-based escalation starts before then.
    pub fn next_notification_time(
        &self,
        entity: &CheckableEntity,
        master: &Notification,
        windows: &TimeWindows,
        now: i64,
    ) -> i64 {
        let interval = self
            .eligible_escalations(entity, master, windows, now)
            .filter_map(|e| e.notification_interval)
            .map(|i| i.max(1))
            .fold(entity.settings.notification_interval, u64::min);

        let mut next = master.t_to_go + interval as i64 * self.interval_length;
        for escalation in entity
            .settings
            .escalations
            .iter()
            .filter_map(|name| self.escalations.get(name))
        {
            if let Some(start) = escalation.start_time(master.creation_time, self.interval_length) {
                if start > now && start < next {
                    next = start;
                }
            }
        }
        next
    }

    /// Soft-cancel every in-flight notification of the entity; returns the
    /// ids so queued actions can be dropped.
    pub fn zombie_all(entity: &mut CheckableEntity) -> Vec<u64> {
        std::mem::take(&mut entity.notifications_in_progress)
            .into_values()
            .map(|mut n| {
                n.status = NotificationStatus::Zombie;
                n.id
            })
            .collect()
    }

    /// Retire a delivered child notification
    pub fn complete(entity: &mut CheckableEntity, notification_id: u64) -> Option<Notification> {
        match entity.notifications_in_progress.get(&notification_id) {
            Some(n) if !n.is_master() => entity.notifications_in_progress.remove(&notification_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sequence::AtomicSequence;
    use crate::model::{Acknowledgement, CheckSettings, Ranges, Status};
    use std::sync::Arc;

    const L: i64 = 60;

    fn setup(settings: CheckSettings) -> (Registry, EntityId, EntityId, NotificationScheduler) {
        let mut registry = Registry::new();
        let host = registry.add_host("web1", CheckSettings::default());
        let svc = registry.add_service(host, "http", settings).unwrap();
        {
            let host = registry.get_mut(host).unwrap();
            host.has_been_checked = true;
        }
        {
            let entity = registry.get_mut(svc).unwrap();
            entity.has_been_checked = true;
            entity.state = Status::Critical;
            entity.state_type = StateType::Hard;
        }

        let mut scheduler = NotificationScheduler::new(L, 30);
        scheduler.add_contact(Contact::new("ops", "mail-ops"));
        scheduler.add_contact(Contact::new("oncall", "page-oncall"));
        scheduler.add_contact(Contact::new("boss", "page-boss"));
        (registry, host, svc, scheduler)
    }

    fn settings() -> CheckSettings {
        CheckSettings {
            contacts: vec!["ops".to_string()],
            ..Default::default()
        }
    }

    fn contacts_of(actions: &[Action]) -> Vec<String> {
        actions.iter().filter_map(|a| a.contact.clone()).collect()
    }

    #[test]
    fn test_problem_is_scattered_and_repeated() {
        let (mut registry, _, svc, scheduler) = setup(settings());
        let windows = TimeWindows::new();
        let sequence = AtomicSequence::new();

        let id = scheduler
            .create(&mut registry, &windows, &sequence, svc, NotificationKind::Problem, 1000)
            .unwrap();
        let actions = scheduler.process_due(&mut registry, &windows, &sequence, 1000);
        assert_eq!(contacts_of(&actions), vec!["ops"]);
        assert_eq!(actions[0].command, "mail-ops");
        assert_eq!(actions[0].notification, Some(NotificationKind::Problem));

        let entity = registry.get(svc).unwrap();
        assert_eq!(entity.current_notification_number, 1);
        let master = &entity.notifications_in_progress[&id];
        assert_eq!(master.t_to_go, 1000 + 60 * L);
        assert_eq!(master.notif_nb, 2);

        // nothing due before the repeat
        assert!(scheduler.process_due(&mut registry, &windows, &sequence, 2000).is_empty());
        let actions = scheduler.process_due(&mut registry, &windows, &sequence, 1000 + 60 * L);
        assert_eq!(actions.len(), 1);
        assert_eq!(registry.get(svc).unwrap().current_notification_number, 2);
    }

    #[test]
    fn test_first_notification_delay() {
        let (mut registry, _, svc, scheduler) = setup(CheckSettings {
            first_notification_delay: 5,
            ..settings()
        });
        let windows = TimeWindows::new();
        let sequence = AtomicSequence::new();

        let id = scheduler
            .create(&mut registry, &windows, &sequence, svc, NotificationKind::Problem, 1000)
            .unwrap();
        assert_eq!(
            registry.get(svc).unwrap().notifications_in_progress[&id].t_to_go,
            1000 + 5 * L
        );
        assert!(scheduler.process_due(&mut registry, &windows, &sequence, 1200).is_empty());

        // recovered during the delay: the recovery is silent
        let entity = registry.get_mut(svc).unwrap();
        NotificationScheduler::zombie_all(entity);
        entity.state = Status::Ok;
        scheduler
            .create(&mut registry, &windows, &sequence, svc, NotificationKind::Recovery, 1250)
            .unwrap();
        assert!(scheduler.process_due(&mut registry, &windows, &sequence, 1250).is_empty());
        assert!(registry.get(svc).unwrap().notifications_in_progress.is_empty());
    }

    #[test]
    fn test_recovery_goes_to_notified_contacts() {
        let (mut registry, _, svc, scheduler) = setup(settings());
        let windows = TimeWindows::new();
        let sequence = AtomicSequence::new();

        scheduler.create(&mut registry, &windows, &sequence, svc, NotificationKind::Problem, 0);
        scheduler.process_due(&mut registry, &windows, &sequence, 0);

        let entity = registry.get_mut(svc).unwrap();
        NotificationScheduler::zombie_all(entity);
        entity.state = Status::Ok;
        entity.settings.contacts.push("oncall".to_string());

        scheduler.create(&mut registry, &windows, &sequence, svc, NotificationKind::Recovery, 100);
        let actions = scheduler.process_due(&mut registry, &windows, &sequence, 100);
        assert_eq!(contacts_of(&actions), vec!["ops"]);

        let entity = registry.get(svc).unwrap();
        assert_eq!(entity.current_notification_number, 0);
        assert!(entity.notified_contacts.is_empty());
    }

    #[test]
    fn test_one_shot_contacts_are_not_renotified() {
        let (mut registry, _, svc, scheduler) = setup(CheckSettings {
            notification_interval: 0,
            ..settings()
        });
        let windows = TimeWindows::new();
        let sequence = AtomicSequence::new();

        scheduler.create(&mut registry, &windows, &sequence, svc, NotificationKind::Problem, 0);
        assert_eq!(scheduler.process_due(&mut registry, &windows, &sequence, 0).len(), 1);
        // the master is gone after a single send
        assert!(registry
            .get(svc)
            .unwrap()
            .notifications_in_progress
            .values()
            .all(|n| !n.is_master()));

        scheduler.create(&mut registry, &windows, &sequence, svc, NotificationKind::Problem, 50);
        assert!(scheduler.process_due(&mut registry, &windows, &sequence, 50).is_empty());
    }

    #[test]
    fn test_escalation_replaces_contacts_and_interval() {
        let (mut registry, _, svc, mut scheduler) = setup(CheckSettings {
            escalations: vec!["second".to_string(), "third".to_string()],
            ..settings()
        });
        scheduler.add_escalation(
            Escalation::by_number("second", 2, 0)
                .with_contacts(["oncall", "ops"])
                .with_interval(10),
        );
        scheduler.add_escalation(Escalation::by_number("third", 3, 0).with_contacts(["boss", "oncall"]));
        let windows = TimeWindows::new();
        let sequence = AtomicSequence::new();

        let id = scheduler
            .create(&mut registry, &windows, &sequence, svc, NotificationKind::Problem, 0)
            .unwrap();
        let first = scheduler.process_due(&mut registry, &windows, &sequence, 0);
        assert_eq!(contacts_of(&first), vec!["ops"]);
        let next = registry.get(svc).unwrap().notifications_in_progress[&id].t_to_go;
        assert_eq!(next, 60 * L);

        let second = scheduler.process_due(&mut registry, &windows, &sequence, next);
        assert_eq!(contacts_of(&second), vec!["oncall", "ops"]);
        // once "second" applies its shorter interval takes over
        let next = registry.get(svc).unwrap().notifications_in_progress[&id].t_to_go;
        assert_eq!(next, 70 * L);

        let third = scheduler.process_due(&mut registry, &windows, &sequence, next);
        assert_eq!(contacts_of(&third), vec!["oncall", "ops", "boss"]);
        assert!(registry
            .get(svc)
            .unwrap()
            .notifications_in_progress
            .values()
            .any(|n| n.escalated));
    }

    #[test]
    fn test_blocking_rules() {
        let (mut registry, host, svc, scheduler) = setup(settings());
        let windows = TimeWindows::new();
        let blocked = |registry: &Registry, kind| scheduler.is_blocked_by_item(registry, &windows, svc, kind, 0);

        assert!(!blocked(&registry, NotificationKind::Problem));

        registry.get_mut(svc).unwrap().state_type = StateType::Soft;
        assert!(blocked(&registry, NotificationKind::Problem));
        registry.get_mut(svc).unwrap().state_type = StateType::Hard;

        registry.get_mut(svc).unwrap().acknowledgement = Some(Acknowledgement {
            sticky: false,
            author: "admin".to_string(),
            comment: "on it".to_string(),
            expiry: None,
            notify: true,
        });
        assert!(blocked(&registry, NotificationKind::Problem));
        assert!(!blocked(&registry, NotificationKind::Acknowledgement));
        registry.get_mut(svc).unwrap().acknowledgement = None;

        registry.get_mut(svc).unwrap().downtime_depth = 1;
        assert!(blocked(&registry, NotificationKind::Problem));
        assert!(!blocked(&registry, NotificationKind::DowntimeStart));
        registry.get_mut(svc).unwrap().downtime_depth = 0;

        registry.get_mut(host).unwrap().state = Status::Critical;
        assert!(blocked(&registry, NotificationKind::Problem));
    }

    #[test]
    fn test_window_snaps_notification_time() {
        let (mut registry, _, svc, scheduler) = setup(CheckSettings {
            notification_window: Some("office".to_string()),
            first_notification_delay: 1,
            ..settings()
        });
        let mut windows = TimeWindows::new();
        windows.insert("office", Arc::new(Ranges::new(vec![(5000, 9000)])));
        let sequence = AtomicSequence::new();

        let id = scheduler
            .create(&mut registry, &windows, &sequence, svc, NotificationKind::Problem, 1000)
            .unwrap();
        assert_eq!(registry.get(svc).unwrap().notifications_in_progress[&id].t_to_go, 5000);
    }

    #[test]
    fn test_complete_retires_children_only() {
        let (mut registry, _, svc, scheduler) = setup(settings());
        let windows = TimeWindows::new();
        let sequence = AtomicSequence::new();

        let master = scheduler
            .create(&mut registry, &windows, &sequence, svc, NotificationKind::Problem, 0)
            .unwrap();
        let actions = scheduler.process_due(&mut registry, &windows, &sequence, 0);
        let child = actions[0].notification_id.unwrap();

        let entity = registry.get_mut(svc).unwrap();
        assert!(NotificationScheduler::complete(entity, master).is_none());
        assert_eq!(NotificationScheduler::complete(entity, child).map(|n| n.id), Some(child));
        assert_eq!(NotificationScheduler::zombie_all(entity), vec![master]);
    }
}
