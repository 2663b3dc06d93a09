//! Content-add requests parked until their candidates arrive

use std::collections::HashMap;

use tracing::debug;

use crate::jingle::{JingleMessage, SessionId};

/// Deferred content-adds keyed by (session, content name). A request naming
/// several contents is released by the first transport-info that covers
/// any of them.
#[derive(Debug, Default)]
pub struct DeferredContentQueue {
    pending: HashMap<(SessionId, String), u64>,
    requests: HashMap<u64, JingleMessage>,
    next_id: u64,
}

impl DeferredContentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, message: JingleMessage) {
        let id = self.next_id;
        self.next_id += 1;

        for content in &message.contents {
            debug!("Deferring content-add of {} in session {}", content.name, message.sid);
            self.pending.insert((message.sid.clone(), content.name.clone()), id);
        }
        self.requests.insert(id, message);
    }

    /// Requests released by candidates for `contents`, in arrival order
    pub fn release<'a, I>(&mut self, sid: &SessionId, contents: I) -> Vec<JingleMessage>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ids: Vec<u64> = contents
            .into_iter()
            .filter_map(|name| self.pending.get(&(sid.clone(), name.to_string())).copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        self.pending.retain(|_, id| !ids.contains(id));
        ids.into_iter().filter_map(|id| self.requests.remove(&id)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.requests.clear();
    }
}
