//! Conference-info (COIN) documents and notifications

pub mod info;
pub mod notifier;

pub use info::{ConferenceInfo, DocumentState, EndpointInfo, EndpointStatus, MediaInfo, ReceivedConference, UserInfo};
pub use notifier::ConferenceNotifier;
