pub mod consumer;
pub mod eligibility;
pub mod service;

pub use consumer::NotificationJobHandler;
pub use eligibility::{evaluate, Decision, SuppressReason};
pub use service::{Clock, NotificationService};
