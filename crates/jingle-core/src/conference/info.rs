//! Conference-info documents (XEP-0298), their diff and their merge

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::jingle::{Direction, MediaType};
use crate::peer::PeerState;

/// `state` attribute of a document or a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    #[default]
    Full,
    Partial,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointStatus {
    Pending,
    DialingOut,
    DialingIn,
    Alerting,
    OnHold,
    Connected,
    Disconnected,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DialingOut => "dialing-out",
            Self::DialingIn => "dialing-in",
            Self::Alerting => "alerting",
            Self::OnHold => "on-hold",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PeerState> for EndpointStatus {
    fn from(state: PeerState) -> Self {
        match state {
            PeerState::AlertingRemoteSide => Self::Alerting,
            PeerState::Idle | PeerState::Connecting => Self::Pending,
            PeerState::Disconnected | PeerState::Failed | PeerState::Busy => Self::Disconnected,
            PeerState::IncomingCall => Self::DialingIn,
            PeerState::InitiatingCall => Self::DialingOut,
            PeerState::OnHold => Self::OnHold,
            PeerState::Connected => Self::Connected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub media_type: MediaType,
    pub src_id: Option<u32>,
    pub status: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub entity: String,
    pub status: Option<EndpointStatus>,
    pub media: Vec<MediaInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub entity: String,
    #[serde(default)]
    pub state: DocumentState,
    pub display_text: Option<String>,
    pub endpoints: Vec<EndpointInfo>,
}

impl UserInfo {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            state: DocumentState::Full,
            display_text: None,
            endpoints: Vec::new(),
        }
    }

    /// Marker telling the receiver to drop this user
    pub fn deleted(entity: impl Into<String>) -> Self {
        Self {
            state: DocumentState::Deleted,
            ..Self::new(entity)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceInfo {
    pub version: u64,
    pub state: DocumentState,
    pub entity: String,
    pub user_count: usize,
    pub users: Vec<UserInfo>,
}

impl ConferenceInfo {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            version: 0,
            state: DocumentState::Full,
            entity: entity.into(),
            user_count: 0,
            users: Vec::new(),
        }
    }

    pub fn user(&self, entity: &str) -> Option<&UserInfo> {
        self.users.iter().find(|u| u.entity == entity)
    }

    /// Same content, ignoring version and document state
    pub fn same_view(&self, other: &ConferenceInfo) -> bool {
        self.entity == other.entity && self.user_count == other.user_count && self.users == other.users
    }

    /// What has to be sent to move a receiver from `previous` to `current`,
    /// or `None` when nothing changed. Unchanged users are left out, which
    /// makes the result partial.
    pub fn diff(previous: &ConferenceInfo, current: &ConferenceInfo) -> Option<ConferenceInfo> {
        let mut changed = previous.entity != current.entity || previous.user_count != current.user_count;
        let mut has_unchanged_user = false;

        let mut diff = ConferenceInfo {
            version: current.version,
            state: DocumentState::Full,
            entity: current.entity.clone(),
            user_count: current.user_count,
            users: Vec::new(),
        };

        for user in &current.users {
            if previous.user(&user.entity) == Some(user) {
                has_unchanged_user = true;
            } else {
                diff.users.push(user.clone());
                changed = true;
            }
        }

        for user in &previous.users {
            if current.user(&user.entity).is_none() {
                diff.users.push(UserInfo::deleted(user.entity.clone()));
                changed = true;
            }
        }

        if !changed {
            return None;
        }
        if has_unchanged_user {
            diff.state = DocumentState::Partial;
        }
        Some(diff)
    }

    /// Apply a partial document on top of `self`
    fn merge(&mut self, partial: &ConferenceInfo) {
        for user in &partial.users {
            let position = self.users.iter().position(|u| u.entity == user.entity);
            match (user.state, position) {
                (DocumentState::Deleted, Some(index)) => {
                    self.users.remove(index);
                }
                (DocumentState::Deleted, None) => {}
                (_, Some(index)) => self.users[index] = user.clone(),
                (_, None) => self.users.push(user.clone()),
            }
        }
        self.entity = partial.entity.clone();
        self.user_count = partial.user_count;
        self.version = partial.version;
    }
}

/// The view a focus has told us about, kept up to date from its
/// notifications
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceivedConference {
    current: Option<ConferenceInfo>,
}

impl ReceivedConference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&ConferenceInfo> {
        self.current.as_ref()
    }

    pub fn version(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.version)
    }

    /// Apply a received document; returns whether the view changed.
    /// The first document must be full, older versions are ignored and a
    /// partial document only applies on top of the version right before it.
    pub fn apply(&mut self, document: ConferenceInfo) -> bool {
        let Some(current) = self.current.as_mut() else {
            if document.state == DocumentState::Full {
                self.current = Some(document);
                return true;
            }
            debug!("Ignoring partial conference-info v{} without a full one", document.version);
            return false;
        };

        if document.version <= current.version {
            debug!("Ignoring stale conference-info v{} (have v{})", document.version, current.version);
            return false;
        }

        match document.state {
            DocumentState::Full => {
                *current = document;
                true
            }
            DocumentState::Partial if document.version == current.version + 1 => {
                current.merge(&document);
                true
            }
            DocumentState::Partial => {
                debug!(
                    "Ignoring conference-info v{}: expected v{}",
                    document.version,
                    current.version + 1
                );
                false
            }
            DocumentState::Deleted => {
                self.current = None;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn user(entity: &str, status: EndpointStatus) -> UserInfo {
        UserInfo {
            endpoints: vec![EndpointInfo {
                entity: entity.to_string(),
                status: Some(status),
                media: vec![MediaInfo {
                    id: "audio".to_string(),
                    media_type: MediaType::Audio,
                    src_id: None,
                    status: Direction::SendRecv,
                }],
            }],
            ..UserInfo::new(entity)
        }
    }

    fn view(users: Vec<UserInfo>) -> ConferenceInfo {
        ConferenceInfo {
            user_count: users.len(),
            users,
            ..ConferenceInfo::new("focus@example.org/res")
        }
    }

    #[test]
    fn identical_views_have_no_diff() {
        let a = view(vec![user("a@x/1", EndpointStatus::Connected)]);
        assert_eq!(ConferenceInfo::diff(&a, &a.clone()), None);
    }

    #[test]
    fn changed_user_makes_partial_diff() {
        let before = view(vec![
            user("a@x/1", EndpointStatus::Connected),
            user("b@x/1", EndpointStatus::Alerting),
        ]);
        let after = view(vec![
            user("a@x/1", EndpointStatus::Connected),
            user("b@x/1", EndpointStatus::Connected),
        ]);

        let diff = ConferenceInfo::diff(&before, &after).unwrap();
        assert_eq!(diff.state, DocumentState::Partial);
        assert_eq!(diff.users, vec![user("b@x/1", EndpointStatus::Connected)]);
    }

    #[test]
    fn removed_user_is_sent_as_deleted() {
        let before = view(vec![user("a@x/1", EndpointStatus::Connected)]);
        let after = view(vec![]);

        let diff = ConferenceInfo::diff(&before, &after).unwrap();
        assert_eq!(diff.state, DocumentState::Full);
        assert_eq!(diff.user_count, 0);
        assert_eq!(diff.users, vec![UserInfo::deleted("a@x/1")]);
    }

    #[test]
    fn received_partial_needs_consecutive_version() {
        let mut received = ReceivedConference::new();

        let mut partial = view(vec![user("b@x/1", EndpointStatus::Connected)]);
        partial.state = DocumentState::Partial;
        partial.version = 1;
        assert!(!received.apply(partial.clone()));

        let mut full = view(vec![user("a@x/1", EndpointStatus::Connected)]);
        full.version = 1;
        assert!(received.apply(full));

        partial.version = 3;
        assert!(!received.apply(partial.clone()));

        partial.version = 2;
        assert!(received.apply(partial.clone()));
        assert!(!received.apply(partial));

        let current = received.current().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.users.len(), 2);
    }

    #[test]
    fn received_deleted_user_is_dropped() {
        let mut received = ReceivedConference::new();
        let mut full = view(vec![
            user("a@x/1", EndpointStatus::Connected),
            user("b@x/1", EndpointStatus::Connected),
        ]);
        full.version = 5;
        received.apply(full);

        let mut partial = view(vec![UserInfo::deleted("b@x/1")]);
        partial.state = DocumentState::Partial;
        partial.user_count = 1;
        partial.version = 6;
        assert!(received.apply(partial));

        let current = received.current().unwrap();
        assert_eq!(current.user_count, 1);
        assert!(current.user("b@x/1").is_none());
    }

    #[test]
    fn endpoint_status_follows_peer_state() {
        assert_eq!(EndpointStatus::from(PeerState::IncomingCall), EndpointStatus::DialingIn);
        assert_eq!(EndpointStatus::from(PeerState::InitiatingCall), EndpointStatus::DialingOut);
        assert_eq!(EndpointStatus::from(PeerState::Busy), EndpointStatus::Disconnected);
        assert_eq!(EndpointStatus::from(PeerState::OnHold).as_str(), "on-hold");
    }
}
