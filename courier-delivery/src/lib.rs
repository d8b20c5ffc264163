pub mod apns;
pub mod channels;
pub mod devices;
pub mod dispatcher;
pub mod email;
pub mod fcm;
pub mod jobs;
pub mod providers;

pub use channels::{ChannelError, ChannelSender};
pub use devices::DeviceRegistry;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use jobs::{BrokerJobs, DeliveryJobs, InlineJobs, NotificationJob};
