//! Data models for hookcord.
//!
//! Tenant setups, inbound event kinds and outbound notifications.

mod event;
mod notification;
mod setup;

pub use event::{EventKind, GITHUB_EVENT_HEADER, GITLAB_EVENT_HEADER};
pub use notification::{MAX_MESSAGE_CHARS, Notification, NotificationKind};
pub use setup::{
    DEFAULT_BRANCH, DEFAULT_GITLAB_URL, DeliveryToken, FullSetup, GitLabCredentials, NewSetup,
    Platform, PublicSetupInfo, SECRET_FIELDS, SetupId, SetupUpdate, ValidatedSetup,
};
