//! Domain types of the notification engine.

mod device;
mod notification;
mod preferences;
mod settings;

pub use device::Device;
pub use notification::{
    ChannelOutcome, Notification, NotificationRequest, NotificationSummary, Page, Recipient,
    RelatedEntity,
};
pub use preferences::{NotificationPreferences, TimeWindow};
pub use settings::{NotificationSettings, SmtpSettings};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Push,
    System,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Push, Channel::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Push => "PUSH",
            Channel::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification priority. Ordering follows the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn level(&self) -> i16 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }

    pub fn from_level(level: i16) -> Option<Self> {
        match level {
            1 => Some(Priority::Low),
            2 => Some(Priority::Normal),
            3 => Some(Priority::High),
            4 => Some(Priority::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a persisted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Read,
    Error,
    Expired,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Read => "READ",
            NotificationStatus::Error => "ERROR",
            NotificationStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(NotificationStatus::Pending),
            "SENT" => Ok(NotificationStatus::Sent),
            "READ" => Ok(NotificationStatus::Read),
            "ERROR" => Ok(NotificationStatus::Error),
            "EXPIRED" => Ok(NotificationStatus::Expired),
            other => Err(format!("unknown notification status: {}", other)),
        }
    }
}

/// Workflow event kinds that produce notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    // Routing between sectors
    RoutingReceived,
    RoutingDeadlineNear,
    RoutingDeadlineExpired,
    // Technical opinions
    OpinionRequested,
    OpinionIssued,
    OpinionApproved,
    OpinionRejected,
    OpinionDeadlineNear,
    OpinionDeadlineExpired,
    // Position statements from external bodies
    PositionRequested,
    PositionReceived,
    PositionDeadlineNear,
    PositionDeadlineExpired,
    // Process lifecycle
    ProcessCreated,
    ProcessUpdated,
    ProcessFinished,
    ProcessAssigned,
    // Document visibility
    PermissionGranted,
    PermissionRevoked,
    // System
    SystemUpdate,
    AdministrationMessage,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::RoutingReceived => "ROUTING_RECEIVED",
            NotificationType::RoutingDeadlineNear => "ROUTING_DEADLINE_NEAR",
            NotificationType::RoutingDeadlineExpired => "ROUTING_DEADLINE_EXPIRED",
            NotificationType::OpinionRequested => "OPINION_REQUESTED",
            NotificationType::OpinionIssued => "OPINION_ISSUED",
            NotificationType::OpinionApproved => "OPINION_APPROVED",
            NotificationType::OpinionRejected => "OPINION_REJECTED",
            NotificationType::OpinionDeadlineNear => "OPINION_DEADLINE_NEAR",
            NotificationType::OpinionDeadlineExpired => "OPINION_DEADLINE_EXPIRED",
            NotificationType::PositionRequested => "POSITION_REQUESTED",
            NotificationType::PositionReceived => "POSITION_RECEIVED",
            NotificationType::PositionDeadlineNear => "POSITION_DEADLINE_NEAR",
            NotificationType::PositionDeadlineExpired => "POSITION_DEADLINE_EXPIRED",
            NotificationType::ProcessCreated => "PROCESS_CREATED",
            NotificationType::ProcessUpdated => "PROCESS_UPDATED",
            NotificationType::ProcessFinished => "PROCESS_FINISHED",
            NotificationType::ProcessAssigned => "PROCESS_ASSIGNED",
            NotificationType::PermissionGranted => "PERMISSION_GRANTED",
            NotificationType::PermissionRevoked => "PERMISSION_REVOKED",
            NotificationType::SystemUpdate => "SYSTEM_UPDATE",
            NotificationType::AdministrationMessage => "ADMINISTRATION_MESSAGE",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown notification type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_by_level() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Urgent > Priority::High);
        for p in [Priority::Low, Priority::Normal, Priority::High, Priority::Urgent] {
            assert_eq!(Priority::from_level(p.level()), Some(p));
        }
        assert_eq!(Priority::from_level(9), None);
    }

    #[test]
    fn notification_type_string_forms_agree_with_serde() {
        let ty = NotificationType::OpinionDeadlineExpired;
        let json = serde_json::to_value(ty).unwrap();
        assert_eq!(json, serde_json::json!(ty.as_str()));
        assert_eq!(ty.as_str().parse::<NotificationType>(), Ok(ty));
        assert!("NOT_A_TYPE".parse::<NotificationType>().is_err());
    }
}
