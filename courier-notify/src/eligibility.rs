//! Decides whether a request is delivered and over which channels.

use chrono::NaiveDateTime;
use courier_core::model::{Channel, NotificationPreferences, NotificationRequest};
use std::fmt;

/// Why a request was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    DoNotDisturb,
    OutsideBusinessHours,
    WeekdayDisabled,
    TypeDisabled,
    BelowMinimumPriority,
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SuppressReason::DoNotDisturb => "do not disturb is active",
            SuppressReason::OutsideBusinessHours => "outside business hours",
            SuppressReason::WeekdayDisabled => "weekday disabled",
            SuppressReason::TypeDisabled => "notification type disabled",
            SuppressReason::BelowMinimumPriority => "priority below minimum",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Persist and deliver. The list may be empty.
    Deliver { channels: Vec<Channel> },
    Suppress(SuppressReason),
}

impl Decision {
    pub fn eligible(&self) -> bool {
        matches!(self, Decision::Deliver { .. })
    }

    pub fn channels(&self) -> &[Channel] {
        match self {
            Decision::Deliver { channels } => channels,
            Decision::Suppress(_) => &[],
        }
    }
}

type Gate = fn(&NotificationRequest, &NotificationPreferences, NaiveDateTime) -> Option<SuppressReason>;

fn do_not_disturb(_: &NotificationRequest, prefs: &NotificationPreferences, now: NaiveDateTime) -> Option<SuppressReason> {
    prefs
        .in_do_not_disturb(now.time())
        .then_some(SuppressReason::DoNotDisturb)
}

fn business_hours(_: &NotificationRequest, prefs: &NotificationPreferences, now: NaiveDateTime) -> Option<SuppressReason> {
    prefs
        .outside_business_hours(now.time())
        .then_some(SuppressReason::OutsideBusinessHours)
}

fn weekday(_: &NotificationRequest, prefs: &NotificationPreferences, now: NaiveDateTime) -> Option<SuppressReason> {
    (!prefs.is_weekday_enabled(now)).then_some(SuppressReason::WeekdayDisabled)
}

fn type_disabled(req: &NotificationRequest, prefs: &NotificationPreferences, _: NaiveDateTime) -> Option<SuppressReason> {
    prefs
        .is_type_disabled(req.notification_type)
        .then_some(SuppressReason::TypeDisabled)
}

fn priority(req: &NotificationRequest, prefs: &NotificationPreferences, _: NaiveDateTime) -> Option<SuppressReason> {
    (!prefs.meets_priority(req.priority)).then_some(SuppressReason::BelowMinimumPriority)
}

/// Evaluated in order; the first failing gate decides.
const GATES: [Gate; 5] = [do_not_disturb, business_hours, weekday, type_disabled, priority];

pub fn evaluate(request: &NotificationRequest, prefs: &NotificationPreferences, now: NaiveDateTime) -> Decision {
    if let Some(reason) = GATES.iter().find_map(|gate| gate(request, prefs, now)) {
        return Decision::Suppress(reason);
    }
    Decision::Deliver {
        channels: resolve_channels(request, prefs),
    }
}

/// Explicit channels narrowed to the enabled ones, else the per-type
/// mapping, else the enabled defaults.
fn resolve_channels(request: &NotificationRequest, prefs: &NotificationPreferences) -> Vec<Channel> {
    let candidates: Vec<Channel> = match &request.channels {
        Some(explicit) => explicit
            .iter()
            .copied()
            .filter(|c| prefs.enabled_channels.contains(c))
            .collect(),
        None => prefs
            .channels_by_type
            .get(&request.notification_type)
            .cloned()
            .unwrap_or_else(|| prefs.enabled_channels.clone()),
    };

    let mut channels = Vec::with_capacity(candidates.len());
    for channel in candidates {
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    channels
}
