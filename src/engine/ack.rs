//! Acknowledgements and downtimes

use super::{Engine, EngineError, LogCategory};
use crate::model::{Acknowledgement, EntityId};
use crate::notify::NotificationKind;

impl Engine {
    /// Acknowledge the entity's current problem.
    ///
    /// Undelivered notifications are dropped; the problem master stays and
    /// is blocked for as long as the acknowledgement holds.
    pub fn acknowledge(
        &mut self,
        id: EntityId,
        acknowledgement: Acknowledgement,
        now: i64,
    ) -> Result<(), EngineError> {
        let entity = self.entity(id)?;
        if entity.state.is_ok() {
            return Err(EngineError::NothingToAcknowledge(entity.full_name()));
        }

        let message = format!(
            "STARTED;{};{}",
            acknowledgement.author, acknowledgement.comment
        );
        let notify = acknowledgement.notify;
        self.zombie_pending_children(id);
        self.entity_mut(id)?.acknowledgement = Some(acknowledgement);
        if notify {
            self.raise_notification(id, NotificationKind::Acknowledgement, now);
        }
        self.log(now, LogCategory::Acknowledge, id, message);
        Ok(())
    }

    /// Returns whether there was an acknowledgement to remove
    pub fn remove_acknowledgement(&mut self, id: EntityId, now: i64) -> Result<bool, EngineError> {
        let Some(acknowledgement) = self.entity_mut(id)?.acknowledgement.take() else {
            return Ok(false);
        };
        self.log(
            now,
            LogCategory::Acknowledge,
            id,
            format!("CANCELLED;{};{}", acknowledgement.author, acknowledgement.comment),
        );
        Ok(true)
    }

    /// Drop acknowledgements past their expiry
    pub fn expire_acknowledgements(&mut self, now: i64) -> usize {
        let expired: Vec<EntityId> = self
            .registry
            .iter()
            .filter(|e| {
                e.acknowledgement
                    .as_ref()
                    .and_then(|ack| ack.expiry)
                    .map_or(false, |expiry| expiry <= now)
            })
            .map(|e| e.id)
            .collect();

        for id in &expired {
            let taken = self
                .registry
                .get_mut(*id)
                .and_then(|e| e.acknowledgement.take());
            if let Some(acknowledgement) = taken {
                self.log(
                    now,
                    LogCategory::Acknowledge,
                    *id,
                    format!("EXPIRED;{};{}", acknowledgement.author, acknowledgement.comment),
                );
            }
        }
        expired.len()
    }

    /// Enter a (possibly nested) downtime. Returns the new depth.
    pub fn start_downtime(
        &mut self,
        id: EntityId,
        now: i64,
        author: &str,
        comment: &str,
    ) -> Result<u32, EngineError> {
        if self.entity(id)?.downtime_depth == 0 {
            self.log(
                now,
                LogCategory::Downtime,
                id,
                format!("STARTED;{};{}", author, comment),
            );
            self.zombie_pending_children(id);
            self.raise_notification(id, NotificationKind::DowntimeStart, now);
        }

        let entity = self.entity_mut(id)?;
        entity.downtime_depth += 1;
        Ok(entity.downtime_depth)
    }

    /// Leave one downtime level. Leaving the last one arms a re-notification
    /// of a persisting HARD problem on the next result.
    pub fn end_downtime(&mut self, id: EntityId, now: i64) -> Result<u32, EngineError> {
        let entity = self.entity_mut(id)?;
        if entity.downtime_depth == 0 {
            return Err(EngineError::NotInDowntime(entity.full_name()));
        }
        entity.downtime_depth -= 1;
        let depth = entity.downtime_depth;

        if depth == 0 {
            entity.downtime_just_ended = true;
            self.log(now, LogCategory::Downtime, id, "STOPPED".to_string());
            self.raise_notification(id, NotificationKind::DowntimeEnd, now);
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{engine, notification_kinds, settings};
    use crate::model::{ActionKind, CheckResult, Status};

    fn ack(sticky: bool, expiry: Option<i64>, notify: bool) -> Acknowledgement {
        Acknowledgement {
            sticky,
            author: "alice".to_string(),
            comment: "on it".to_string(),
            expiry,
            notify,
        }
    }

    fn failing(engine: &mut Engine, name: &str) -> EntityId {
        let id = engine.add_host(name, settings(1));
        engine.consume_result(id, CheckResult::new(2, "down"), 0).unwrap();
        id
    }

    #[test]
    fn test_acknowledge_requires_a_problem() {
        let mut engine = engine();
        let host = engine.add_host("web1", settings(1));
        assert!(matches!(
            engine.acknowledge(host, ack(false, None, false), 0),
            Err(EngineError::NothingToAcknowledge(_))
        ));
    }

    #[test]
    fn test_acknowledge_blocks_problem_and_notifies() {
        let mut engine = engine();
        let host = failing(&mut engine, "web1");

        engine.acknowledge(host, ack(true, None, true), 10).unwrap();
        let kinds = notification_kinds(&engine, host);
        assert!(kinds.contains(&NotificationKind::Problem));
        assert!(kinds.contains(&NotificationKind::Acknowledgement));
        assert_eq!(engine.audit().by_category(LogCategory::Acknowledge).count(), 1);

        engine.drain_actions();
        engine.tick(10);
        let sent: Vec<_> = engine
            .drain_actions()
            .into_iter()
            .filter(|a| a.kind == ActionKind::Notification)
            .map(|a| a.notification)
            .collect();
        assert_eq!(sent, vec![Some(NotificationKind::Acknowledgement)]);
    }

    #[test]
    fn test_acknowledged_leaf_is_ok_in_or_rule() {
        let mut engine = engine();
        let db1 = failing(&mut engine, "db1");
        let db2 = failing(&mut engine, "db2");
        assert_eq!(engine.evaluate_rule("db1 | db2").unwrap(), Status::Critical);

        engine.acknowledge(db1, ack(false, None, false), 10).unwrap();
        assert_eq!(engine.evaluate_rule("db1 | db2").unwrap(), Status::Ok);

        engine.start_downtime(db2, 10, "bob", "maintenance").unwrap();
        engine.remove_acknowledgement(db1, 20).unwrap();
        assert_eq!(engine.evaluate_rule("db1 | db2").unwrap(), Status::Ok);
        assert_eq!(engine.evaluate_rule("db1 & db2").unwrap(), Status::Critical);
    }

    #[test]
    fn test_acknowledgement_expires() {
        let mut engine = engine();
        let host = failing(&mut engine, "web1");
        engine.acknowledge(host, ack(false, Some(100), false), 10).unwrap();

        assert_eq!(engine.expire_acknowledgements(99), 0);
        assert_eq!(engine.expire_acknowledgements(100), 1);
        assert!(!engine.entity(host).unwrap().is_acknowledged());
        assert!(!engine.remove_acknowledgement(host, 101).unwrap());
        let last = engine.audit().recent(1);
        assert!(last[0].message.starts_with("EXPIRED"));
    }

    #[test]
    fn test_nested_downtime() {
        let mut engine = engine();
        let host = engine.add_host("web1", settings(1));

        assert_eq!(engine.start_downtime(host, 0, "bob", "patching").unwrap(), 1);
        assert_eq!(engine.start_downtime(host, 5, "bob", "again").unwrap(), 2);
        assert_eq!(
            notification_kinds(&engine, host),
            vec![NotificationKind::DowntimeStart]
        );

        assert_eq!(engine.end_downtime(host, 10).unwrap(), 1);
        assert!(!engine.entity(host).unwrap().downtime_just_ended);
        assert_eq!(engine.end_downtime(host, 20).unwrap(), 0);
        assert!(engine.entity(host).unwrap().downtime_just_ended);
        assert!(matches!(
            engine.end_downtime(host, 30),
            Err(EngineError::NotInDowntime(_))
        ));
        assert_eq!(engine.audit().by_category(LogCategory::Downtime).count(), 2);
    }

    #[test]
    fn test_problem_renotified_after_downtime() {
        let mut engine = engine();
        let host = engine.add_host("web1", settings(1));
        engine.start_downtime(host, 0, "bob", "patching").unwrap();
        engine.consume_result(host, CheckResult::new(2, "down"), 10).unwrap();

        // sent while in downtime: the problem is blocked
        engine.drain_actions();
        engine.tick(10);
        assert!(engine
            .drain_actions()
            .iter()
            .all(|a| a.notification != Some(NotificationKind::Problem)));

        engine.end_downtime(host, 20).unwrap();
        engine.consume_result(host, CheckResult::new(2, "down"), 30).unwrap();
        assert!(!engine.entity(host).unwrap().downtime_just_ended);
        let problems = notification_kinds(&engine, host)
            .into_iter()
            .filter(|k| *k == NotificationKind::Problem)
            .count();
        assert_eq!(problems, 1);

        engine.drain_actions();
        engine.tick(30);
        assert!(engine
            .drain_actions()
            .iter()
            .any(|a| a.notification == Some(NotificationKind::Problem)));
    }
}
