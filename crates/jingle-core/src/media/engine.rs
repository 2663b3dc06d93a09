//! Contract of the external media engine

use std::fmt;

use async_trait::async_trait;
use rvoip_jingle_transport::{StreamConnector, StreamTarget};
use serde::{Deserialize, Serialize};

use crate::jingle::{Direction, MediaType, PayloadType, SessionId};

/// Capture/playback device of one media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDevice {
    pub media: MediaType,
    /// What the device can do: capture only devices are `SendOnly`
    pub direction: Direction,
    /// Supported formats in preference order
    pub formats: Vec<PayloadType>,
}

impl MediaDevice {
    pub fn new(media: MediaType, direction: Direction, formats: Vec<PayloadType>) -> Self {
        Self { media, direction, formats }
    }

    pub fn is_active(&self) -> bool {
        self.direction != Direction::Inactive && !self.formats.is_empty()
    }
}

/// Engine-assigned stream handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to start one RTP stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub owner: SessionId,
    pub content: String,
    pub media: MediaType,
    pub connector: Option<StreamConnector>,
    pub target: StreamTarget,
    pub format: PayloadType,
    pub direction: Direction,
    /// Audio drives synchronisation when both media are present
    pub master: bool,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// The device used for `media`, if any
    fn default_device(&self, media: MediaType) -> Option<MediaDevice>;

    async fn open_device(&self, media: MediaType) -> anyhow::Result<()>;

    async fn close_device(&self, media: MediaType) -> anyhow::Result<()>;

    async fn start_stream(&self, params: StreamParams) -> anyhow::Result<StreamId>;

    /// Point a running stream at a new remote/local socket pair
    async fn update_target(
        &self,
        stream: &StreamId,
        target: StreamTarget,
        connector: Option<StreamConnector>,
    ) -> anyhow::Result<()>;

    async fn set_direction(&self, stream: &StreamId, direction: Direction) -> anyhow::Result<()>;

    async fn set_mute(&self, stream: &StreamId, mute: bool) -> anyhow::Result<()>;

    async fn stop_stream(&self, stream: &StreamId) -> anyhow::Result<()>;

    /// The running stream of `owner` for `media`
    fn active_stream(&self, owner: &SessionId, media: MediaType) -> Option<StreamId>;

    /// SSRC the stream sends with
    fn local_source_id(&self, stream: &StreamId) -> Option<u32>;
}
