//! Checkable entity: the unit the state machine works on

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::check::CheckResult;
use super::modulation::{BusinessImpactModulation, ResultModulation};
use super::state::{EntityKind, StateType, Status};
use crate::engine::flapping::FlapHistory;
use crate::notify::{Notification, NotifyOptions};
use crate::rules::BusinessRule;

/// Stable arena index of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub usize);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static, already-resolved per-entity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSettings {
    pub check_command: Option<String>,
    pub max_check_attempts: u32,
    /// In interval units
    pub check_interval: u64,
    /// In interval units; 0 means "use check_interval"
    pub retry_interval: u64,
    pub active_checks_enabled: bool,
    pub passive_checks_enabled: bool,
    pub check_window: Option<String>,
    pub is_volatile: bool,

    pub flap_detection_enabled: bool,
    pub low_flap_threshold: Option<f64>,
    pub high_flap_threshold: Option<f64>,

    pub check_freshness: bool,
    /// Seconds
    pub freshness_threshold: i64,
    pub freshness_state: Status,

    pub event_handler: Option<String>,
    pub event_handler_enabled: bool,

    pub notifications_enabled: bool,
    pub notification_window: Option<String>,
    /// In interval units; 0 means notify once
    pub notification_interval: u64,
    /// In interval units
    pub first_notification_delay: u64,
    pub notification_options: NotifyOptions,
    pub contacts: Vec<String>,
    pub escalations: Vec<String>,

    pub business_impact: u8,
    pub business_impact_modulations: Vec<BusinessImpactModulation>,
    pub result_modulations: Vec<ResultModulation>,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            check_command: None,
            max_check_attempts: 3,
            check_interval: 5,
            retry_interval: 1,
            active_checks_enabled: true,
            passive_checks_enabled: true,
            check_window: None,
            is_volatile: false,
            flap_detection_enabled: true,
            low_flap_threshold: None,
            high_flap_threshold: None,
            check_freshness: false,
            freshness_threshold: 0,
            freshness_state: Status::Unknown,
            event_handler: None,
            event_handler_enabled: true,
            notifications_enabled: true,
            notification_window: None,
            notification_interval: 60,
            first_notification_delay: 0,
            notification_options: NotifyOptions::all(),
            contacts: Vec::new(),
            escalations: Vec::new(),
            business_impact: 2,
            business_impact_modulations: Vec::new(),
            result_modulations: Vec::new(),
        }
    }
}

/// Operator acknowledgement of a problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Survives changes between non-OK states
    pub sticky: bool,
    pub author: String,
    pub comment: String,
    /// Unix seconds after which the acknowledgement lapses
    #[serde(default)]
    pub expiry: Option<i64>,
    /// Raise an ACKNOWLEDGEMENT notification
    #[serde(default)]
    pub notify: bool,
}

/// Tracks HARD UNKNOWN/UNREACHABLE stretches so that e.g. a HARD
/// CRITICAL -> UNKNOWN -> CRITICAL sequence does not re-notify.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardUnknownPhase {
    pub active: bool,
    pub was_active: bool,
    pub state_before: Option<Status>,
}

/// Host or service under monitoring
#[derive(Debug, Clone)]
pub struct CheckableEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub host_name: String,
    pub service_description: Option<String>,
    /// Owning host, for services
    pub host: Option<EntityId>,
    pub groups: Vec<String>,
    pub labels: Vec<String>,
    pub tags: Vec<String>,
    pub custom_vars: HashMap<String, String>,
    pub settings: CheckSettings,

    // Alert state
    pub state: Status,
    pub state_type: StateType,
    pub attempt: u32,
    pub last_state: Status,
    pub last_state_type: StateType,
    pub last_hard_state: Status,
    pub has_been_checked: bool,
    pub last_state_change: i64,
    pub last_hard_state_change: i64,
    /// Last time a real (non-synthetic) result landed
    pub last_state_update: i64,
    pub hard_unknown_phase: HardUnknownPhase,

    // Last result
    pub last_check: i64,
    pub latency: f64,
    pub execution_time: f64,
    pub output: String,
    pub long_output: String,
    pub perf_data: String,

    // Scheduling
    pub next_check: i64,
    pub in_checking: bool,
    pub freshness_expired: bool,
    /// Non-OK result waiting for dependency checks
    pub parked_result: Option<CheckResult>,

    // Flapping
    pub flap: FlapHistory,

    // Acknowledgement and downtime
    pub acknowledgement: Option<Acknowledgement>,
    pub downtime_depth: u32,
    pub downtime_just_ended: bool,

    // Dependency graph membership, maintained by the graph only
    pub impacts: BTreeSet<EntityId>,
    pub source_problems: BTreeSet<EntityId>,
    pub is_problem: bool,
    pub is_impact: bool,
    pub state_before_impact: Option<Status>,
    pub state_changed_since_impact: bool,
    pub business_impact: u8,
    pub own_business_impact: u8,

    pub business_rule: Option<BusinessRule>,

    // Event and problem ids
    pub current_event_id: u64,
    pub last_event_id: u64,
    pub current_problem_id: u64,
    pub last_problem_id: u64,

    // Notification bookkeeping
    pub current_notification_number: u32,
    pub notified_contacts: BTreeSet<String>,
    pub notifications_in_progress: BTreeMap<u64, Notification>,
    pub last_notification: i64,
}

impl CheckableEntity {
    pub fn host(id: EntityId, name: impl Into<String>, settings: CheckSettings) -> Self {
        Self::new(id, EntityKind::Host, name.into(), None, None, settings)
    }

    pub fn service(
        id: EntityId,
        host: EntityId,
        host_name: impl Into<String>,
        description: impl Into<String>,
        settings: CheckSettings,
    ) -> Self {
        Self::new(
            id,
            EntityKind::Service,
            host_name.into(),
            Some(description.into()),
            Some(host),
            settings,
        )
    }

    fn new(
        id: EntityId,
        kind: EntityKind,
        host_name: String,
        service_description: Option<String>,
        host: Option<EntityId>,
        settings: CheckSettings,
    ) -> Self {
        let business_impact = settings.business_impact;
        Self {
            id,
            kind,
            host_name,
            service_description,
            host,
            groups: Vec::new(),
            labels: Vec::new(),
            tags: Vec::new(),
            custom_vars: HashMap::new(),
            settings,
            state: Status::Ok,
            state_type: StateType::Hard,
            attempt: 1,
            last_state: Status::Ok,
            last_state_type: StateType::Hard,
            last_hard_state: Status::Ok,
            has_been_checked: false,
            last_state_change: 0,
            last_hard_state_change: 0,
            last_state_update: 0,
            hard_unknown_phase: HardUnknownPhase::default(),
            last_check: 0,
            latency: 0.0,
            execution_time: 0.0,
            output: String::new(),
            long_output: String::new(),
            perf_data: String::new(),
            next_check: 0,
            in_checking: false,
            freshness_expired: false,
            parked_result: None,
            flap: FlapHistory::default(),
            acknowledgement: None,
            downtime_depth: 0,
            downtime_just_ended: false,
            impacts: BTreeSet::new(),
            source_problems: BTreeSet::new(),
            is_problem: false,
            is_impact: false,
            state_before_impact: None,
            state_changed_since_impact: false,
            business_impact,
            own_business_impact: business_impact,
            business_rule: None,
            current_event_id: 0,
            last_event_id: 0,
            current_problem_id: 0,
            last_problem_id: 0,
            current_notification_number: 0,
            notified_contacts: BTreeSet::new(),
            notifications_in_progress: BTreeMap::new(),
            last_notification: 0,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// `host` or `host/service`
    pub fn full_name(&self) -> String {
        match &self.service_description {
            Some(description) => format!("{}/{}", self.host_name, description),
            None => self.host_name.clone(),
        }
    }

    pub fn state_label(&self) -> &'static str {
        if !self.has_been_checked {
            return "PENDING";
        }
        self.state.label(self.kind)
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledgement.is_some()
    }

    pub fn in_downtime(&self) -> bool {
        self.downtime_depth > 0
    }

    pub fn is_max_attempts(&self) -> bool {
        self.attempt >= self.settings.max_check_attempts.max(1)
    }

    /// Bump the attempt counter, never past the configured maximum
    pub fn add_attempt(&mut self) {
        self.attempt = (self.attempt + 1).min(self.settings.max_check_attempts.max(1));
    }

    pub fn is_business_rule(&self) -> bool {
        self.business_rule.is_some()
    }
}
