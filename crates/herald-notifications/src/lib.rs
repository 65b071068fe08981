pub mod adapters;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod scheduler;
pub mod service;
pub mod sweep;
pub mod templates;
pub mod types;

pub use adapters::{
    EmailAdapter, EmailSender, EmailTransport, FcmCredentials, FcmPushAdapter, LogEmailSender,
    LogPushSender, PushSender, ServiceAccountKey, ServiceAccountTokenProvider,
};
pub use directory::RecipientDirectory;
pub use dispatcher::{DEFAULT_PUSH_BATCH_SIZE, DispatcherConfig, FanoutDispatcher, partition};
pub use error::NotificationError;
pub use memory::InMemoryDirectory;
pub use scheduler::{NotificationScheduler, ScheduledJob, SchedulerConfig};
pub use service::{NotificationHub, NotificationService};
pub use sweep::{DEFAULT_RETENTION, RetentionSweep};
pub use templates::{Template, TemplateRenderer};
pub use types::*;
