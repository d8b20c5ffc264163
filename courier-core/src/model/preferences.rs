use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{Channel, NotificationType, Priority};

/// A time-of-day window. `start > end` wraps around midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Membership in `[start, end)`.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// Membership in `[start, end]`.
    pub fn contains_inclusive(&self, t: NaiveTime) -> bool {
        self.contains(t) || t == self.end
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Per-user delivery preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: String,
    #[serde(default)]
    pub channels_by_type: BTreeMap<NotificationType, Vec<Channel>>,
    pub enabled_channels: Vec<Channel>,
    #[serde(default)]
    pub business_hours_only: bool,
    pub business_hours: TimeWindow,
    #[serde(default)]
    pub do_not_disturb: bool,
    #[serde(default)]
    pub do_not_disturb_window: Option<TimeWindow>,
    /// ISO weekdays, Monday = 1.
    pub enabled_weekdays: BTreeSet<u8>,
    pub group_notifications: bool,
    pub group_interval_minutes: i32,
    #[serde(default)]
    pub disabled_types: BTreeSet<NotificationType>,
    pub min_priority: Priority,
    #[serde(default)]
    pub alternate_email: Option<String>,
    #[serde(default)]
    pub alternate_phone: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    /// Preferences created on first access: email and in-app, weekdays only.
    pub fn defaults(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channels_by_type: BTreeMap::new(),
            enabled_channels: vec![Channel::Email, Channel::System],
            business_hours_only: false,
            business_hours: TimeWindow::new(hm(8, 0), hm(18, 0)),
            do_not_disturb: false,
            do_not_disturb_window: None,
            enabled_weekdays: (1..=5).collect(),
            group_notifications: true,
            group_interval_minutes: 30,
            disabled_types: BTreeSet::new(),
            min_priority: Priority::Low,
            alternate_email: None,
            alternate_phone: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_type_disabled(&self, notification_type: NotificationType) -> bool {
        self.disabled_types.contains(&notification_type)
    }

    /// Equal priority passes.
    pub fn meets_priority(&self, priority: Priority) -> bool {
        priority >= self.min_priority
    }

    pub fn in_do_not_disturb(&self, t: NaiveTime) -> bool {
        self.do_not_disturb
            && self
                .do_not_disturb_window
                .map_or(false, |window| window.contains(t))
    }

    pub fn outside_business_hours(&self, t: NaiveTime) -> bool {
        self.business_hours_only && !self.business_hours.contains_inclusive(t)
    }

    pub fn is_weekday_enabled(&self, now: NaiveDateTime) -> bool {
        let weekday = now.weekday().number_from_monday() as u8;
        self.enabled_weekdays.contains(&weekday)
    }

    /// Time gates in precedence order: do-not-disturb, business hours, weekday.
    pub fn should_notify_now(&self, now: NaiveDateTime) -> bool {
        let t = now.time();
        if self.in_do_not_disturb(t) {
            return false;
        }
        if self.outside_business_hours(t) {
            return false;
        }
        self.is_weekday_enabled(now)
    }
}
