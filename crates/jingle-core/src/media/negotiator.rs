//! Offer/answer negotiation for the contents of one session.
//!
//! The negotiator owns the local and remote content maps and the streams
//! negotiated from them. It never looks at other peers directly: whatever
//! it needs to know about the rest of the call arrives as a [`FocusContext`]
//! snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use rvoip_jingle_transport::{extract_default_target, StreamTarget, TransportDescription, TransportHarvester};
use tracing::{debug, info, warn};

use super::engine::{MediaDevice, MediaEngine, StreamId, StreamParams};
use crate::config::MediaConfig;
use crate::error::{JingleError, Result};
use crate::jingle::{
    Content, Creator, Direction, EncryptionHints, MediaType, PayloadType, RtpDescription, Senders, SessionId,
};

/// What the rest of the call looks like, as far as one peer is concerned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusContext {
    /// The local side is the conference focus of the call
    pub is_focus: bool,
    /// The focus translates RTP between members
    pub rtp_translation: bool,
    /// Media some other peer of the call currently receives from us
    pub others_receiving: HashSet<MediaType>,
    /// Media some peer of the call is allowed to send to us
    pub peers_sending: HashSet<MediaType>,
}

impl FocusContext {
    pub fn others_receive(&self, media: MediaType) -> bool {
        self.others_receiving.contains(&media)
    }

    pub fn any_peer_sends(&self, media: MediaType) -> bool {
        self.peers_sending.contains(&media)
    }
}

/// A stream negotiated for one content
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedStream {
    pub content: String,
    pub media: MediaType,
    pub format: PayloadType,
    pub direction: Direction,
    /// Unknown until the remote candidates arrive
    pub target: Option<StreamTarget>,
    pub master: bool,
    /// Set once the engine runs the stream
    pub id: Option<StreamId>,
    pub muted: bool,
}

/// Only emit a content-modify when the senders value actually changed
pub fn reconcile_senders_change(old: Option<Senders>, new: Senders) -> Option<Senders> {
    if old.unwrap_or(Senders::Both) == new {
        None
    } else {
        Some(new)
    }
}

/// Senders of the video content after the local user allows or forbids
/// sending video
pub fn adjust_video_senders(current: Option<Senders>, allowed: bool, local_is_initiator: bool) -> Senders {
    let (local, remote) = if local_is_initiator {
        (Senders::Initiator, Senders::Responder)
    } else {
        (Senders::Responder, Senders::Initiator)
    };

    match (allowed, current.unwrap_or(Senders::Both)) {
        (true, Senders::None) => local,
        (true, _) => Senders::Both,
        (false, Senders::Both) => remote,
        (false, _) => Senders::None,
    }
}

/// Local formats that the remote side also lists, in local preference
/// order, carrying the remote payload type numbers
fn intersect_formats(remote: &[PayloadType], local: &[PayloadType]) -> Vec<PayloadType> {
    local
        .iter()
        .filter_map(|l| {
            remote.iter().find(|r| r.same_format(l)).map(|r| PayloadType {
                id: r.id,
                ..l.clone()
            })
        })
        .collect()
}

pub struct MediaNegotiator {
    engine: Arc<dyn MediaEngine>,
    config: MediaConfig,
    local_is_initiator: bool,
    owner: Option<SessionId>,
    local: IndexMap<String, Content>,
    remote: IndexMap<String, Content>,
    streams: IndexMap<MediaType, NegotiatedStream>,
    locally_on_hold: bool,
    remotely_on_hold: bool,
    local_video_allowed: bool,
}

impl MediaNegotiator {
    pub fn new(engine: Arc<dyn MediaEngine>, config: MediaConfig) -> Self {
        let local_video_allowed = config.local_video_allowed;
        Self {
            engine,
            config,
            local_is_initiator: false,
            owner: None,
            local: IndexMap::new(),
            remote: IndexMap::new(),
            streams: IndexMap::new(),
            locally_on_hold: false,
            remotely_on_hold: false,
            local_video_allowed,
        }
    }

    pub fn local_is_initiator(&self) -> bool {
        self.local_is_initiator
    }

    pub fn set_local_is_initiator(&mut self, initiator: bool) {
        self.local_is_initiator = initiator;
    }

    pub fn set_owner(&mut self, sid: SessionId) {
        self.owner = Some(sid);
    }

    pub fn local_content(&self, name: &str) -> Option<&Content> {
        self.local.get(name)
    }

    pub fn remote_content(&self, name: &str) -> Option<&Content> {
        self.remote.get(name)
    }

    pub fn local_contents(&self) -> impl Iterator<Item = &Content> {
        self.local.values()
    }

    pub fn local_content_names(&self) -> Vec<String> {
        self.local.keys().cloned().collect()
    }

    pub fn remote_content_for(&self, media: MediaType) -> Option<&Content> {
        self.remote.values().find(|c| c.media_type() == Some(media))
    }

    pub fn stream(&self, media: MediaType) -> Option<&NegotiatedStream> {
        self.streams.get(&media)
    }

    pub fn stream_direction(&self, media: MediaType) -> Option<Direction> {
        self.streams.get(&media).map(|s| s.direction)
    }

    /// Senders of the last description received for `media`
    pub fn senders(&self, media: MediaType) -> Option<Senders> {
        self.remote_content_for(media)
            .or_else(|| self.local.values().find(|c| c.media_type() == Some(media)))
            .and_then(|c| c.senders)
    }

    pub fn is_locally_on_hold(&self) -> bool {
        self.locally_on_hold
    }

    pub fn is_remotely_on_hold(&self) -> bool {
        self.remotely_on_hold
    }

    pub fn local_video_allowed(&self) -> bool {
        self.local_video_allowed
    }

    pub fn set_local_video_allowed(&mut self, allowed: bool) {
        self.local_video_allowed = allowed;
    }

    /// SSRC of our running stream for `media`
    pub fn local_source_id(&self, media: MediaType) -> Option<u32> {
        let id = self.streams.get(&media)?.id.as_ref()?;
        self.engine.local_source_id(id)
    }

    /// SSRC the remote side announced for `media`
    pub fn remote_source_id(&self, media: MediaType) -> Option<u32> {
        self.remote_content_for(media)?.description.as_ref()?.ssrc
    }

    /// What the user wants for `media`: video is receive-only unless
    /// local video is allowed
    pub fn direction_preference(&self, media: MediaType) -> Direction {
        match media {
            MediaType::Audio => Direction::SendRecv,
            MediaType::Video if self.local_video_allowed => Direction::SendRecv,
            MediaType::Video => Direction::RecvOnly,
        }
    }

    fn device(&self, media: MediaType) -> Option<MediaDevice> {
        self.engine.default_device(media).filter(|d| d.is_active())
    }

    fn device_direction(&self, media: MediaType) -> Direction {
        self.device(media).map(|d| d.direction).unwrap_or(Direction::Inactive)
    }

    /// Direction advertised for `media` towards this peer. A focus that
    /// translates RTP also sends whenever another member receives it.
    pub fn direction(&self, media: MediaType, focus: &FocusContext) -> Direction {
        let mut direction = self.device_direction(media);

        if !(media == MediaType::Video && focus.rtp_translation) {
            direction = direction.and(self.direction_preference(media));
        }
        if focus.is_focus && focus.others_receive(media) {
            direction = direction.or(Direction::SendOnly);
        }
        if self.locally_on_hold {
            direction = direction.and(Direction::SendOnly);
        }
        direction
    }

    fn offer_content(&mut self, device: &MediaDevice, direction: Direction) -> Content {
        let mut description = RtpDescription::new(device.media, device.formats.clone());
        if !self.config.supported_crypto_suites.is_empty() {
            description.encryption = Some(EncryptionHints {
                required: false,
                crypto_suites: self.config.supported_crypto_suites.clone(),
            });
        }

        let content = Content::new(device.media.as_str(), Creator::local(self.local_is_initiator))
            .with_senders(Senders::from_direction(direction, self.local_is_initiator))
            .with_description(description);
        self.local.insert(content.name.clone(), content.clone());
        content
    }

    /// Contents of a session-initiate: one per active device
    pub fn create_content_list(&mut self, focus: &FocusContext) -> Result<Vec<Content>> {
        let mut contents = Vec::new();

        for media in MediaType::ALL {
            let Some(device) = self.device(media) else {
                continue;
            };

            let mut direction = device.direction;
            if !(media == MediaType::Video && focus.rtp_translation) {
                direction = direction.and(self.direction_preference(media));
            }
            if self.locally_on_hold {
                direction = direction.and(Direction::SendOnly);
            }

            // Offering to only receive is announced as not offering at all
            if direction == Direction::RecvOnly {
                direction = Direction::Inactive;
            }
            if direction == Direction::Inactive {
                debug!("Not offering {}: direction is inactive", media);
                continue;
            }

            contents.push(self.offer_content(&device, direction));
        }

        if contents.is_empty() {
            return Err(JingleError::NoActiveDevice);
        }
        Ok(contents)
    }

    /// Content offered in a content-add for `media`
    pub fn create_content(&mut self, media: MediaType, focus: &FocusContext) -> Result<Content> {
        let device = self.device(media).ok_or(JingleError::NoActiveDevice)?;
        let direction = self.direction(media, focus);
        if direction == Direction::Inactive {
            return Err(JingleError::NoActiveDevice);
        }
        Ok(self.offer_content(&device, direction))
    }

    /// Compute the answer to `offer`. Contents we cannot use are left out;
    /// an offer with no usable content at all is an error.
    pub async fn compute_answer(&mut self, offer: &[Content], focus: &FocusContext) -> Result<Vec<Content>> {
        let mut answer = Vec::with_capacity(offer.len());

        for content in offer {
            self.remote.insert(content.name.clone(), content.clone());

            let Some(media) = content.media_type() else {
                warn!("Skipping content {} with unknown media", content.name);
                continue;
            };
            let remote_formats = content
                .description
                .as_ref()
                .map(|d| d.payload_types.as_slice())
                .unwrap_or_default();

            let device = self.device(media);
            let device_direction = device
                .as_ref()
                .map(|d| d.direction)
                .unwrap_or(Direction::Inactive)
                .and(self.direction_preference(media));

            let remote_direction = Senders::direction_of(content.senders, !self.local_is_initiator);
            let mut direction = device_direction.direction_for_answer(remote_direction);
            if focus.is_focus && focus.others_receive(media) && device_direction != Direction::Inactive {
                direction = direction.or(Direction::SendOnly);
            }

            let formats = device
                .as_ref()
                .map(|d| intersect_formats(remote_formats, &d.formats))
                .unwrap_or_default();

            // An empty transport means the candidates follow in transport-info
            let target_usable = match content.transport.as_ref() {
                None => false,
                Some(transport) => !extract_default_target(transport).is_some_and(|t| t.is_null()),
            };

            let encryption = content.description.as_ref().and_then(|d| d.encryption.as_ref());
            let common_suites = encryption
                .map(|e| e.common_suites(&self.config.supported_crypto_suites))
                .unwrap_or_default();
            let encryption_usable = !encryption.is_some_and(|e| e.required && common_suites.is_empty());

            if formats.is_empty() || device_direction == Direction::Inactive || !target_usable || !encryption_usable {
                debug!(
                    "Skipping content {}: formats={}, device={}, target usable={}, encryption usable={}",
                    content.name,
                    formats.len(),
                    device_direction,
                    target_usable,
                    encryption_usable
                );
                self.close_stream(media).await;
                continue;
            }

            let mut description = RtpDescription::new(media, formats);
            if let Some(hints) = encryption {
                if !common_suites.is_empty() {
                    description.encryption = Some(EncryptionHints {
                        required: hints.required,
                        crypto_suites: common_suites,
                    });
                }
            }

            let ours = Content::new(content.name.clone(), content.creator)
                .with_senders(Senders::from_direction(direction, self.local_is_initiator))
                .with_description(description);
            debug!("Answering {} with senders={:?}", ours.name, ours.senders);

            self.local.insert(ours.name.clone(), ours.clone());
            answer.push(ours);
        }

        if answer.is_empty() {
            return Err(JingleError::incompatible(
                "Offer contained no media formats or no valid media descriptions",
            ));
        }
        Ok(answer)
    }

    /// Build the accepted contents named in `names`, attach `transports`
    /// (our wrapped-up local transports) and plan their streams
    pub async fn generate_accept(
        &mut self,
        names: &[String],
        harvester: &dyn TransportHarvester,
        transports: &[TransportDescription],
        focus: &FocusContext,
    ) -> Result<Vec<Content>> {
        let mut accepted = Vec::with_capacity(names.len());
        let mut master_set = false;

        for name in names {
            let Some(mut content) = self.local.get(name).cloned() else {
                continue;
            };
            let Some(media) = content.media_type() else {
                continue;
            };
            let Some(device) = self.device(media) else {
                continue;
            };

            let mut direction = Senders::direction_of(content.senders, self.local_is_initiator);
            if media == MediaType::Video
                && (self.local_video_allowed || focus.rtp_translation)
                && device.direction.allows_sending()
            {
                direction = Direction::SendRecv;
                content.senders = Some(Senders::Both);
            }

            let remote = self.remote.get(name);
            let format = remote
                .and_then(|r| r.description.as_ref())
                .and_then(|d| {
                    d.payload_types
                        .iter()
                        .find(|p| device.formats.iter().any(|l| l.same_format(p)))
                })
                .cloned()
                .ok_or_else(|| JingleError::incompatible("No matching codec."))?;

            let target = match harvester.stream_target(name).await {
                Some(target) => Some(target),
                None => remote.and_then(|r| r.transport.as_ref()).and_then(extract_default_target),
            };

            let master = !master_set && (names.len() == 1 || media == MediaType::Audio);
            master_set |= master;

            self.configure_stream(NegotiatedStream {
                content: name.clone(),
                media,
                format,
                direction,
                target,
                master,
                id: None,
                muted: false,
            })
            .await?;

            if let Some(transport) = transports.iter().find(|t| &t.content == name) {
                content.transport = Some(transport.clone());
            }
            self.local.insert(name.clone(), content.clone());
            accepted.push(content);
        }

        if accepted.is_empty() {
            return Err(JingleError::incompatible("Nothing left to accept"));
        }
        Ok(accepted)
    }

    /// Apply a session-accept or content-accept. Local contents the answer
    /// leaves out are removed and their streams torn down.
    pub async fn process_answer(
        &mut self,
        answer: &[Content],
        harvester: &dyn TransportHarvester,
        focus: &FocusContext,
        full_session: bool,
    ) -> Result<()> {
        if full_session {
            let dropped: Vec<String> = self
                .local
                .keys()
                .filter(|name| !answer.iter().any(|c| &c.name == *name))
                .cloned()
                .collect();
            for name in dropped {
                info!("Remote side did not accept {}, removing it", name);
                self.remove_content(&name, Some(harvester)).await;
            }
        }

        let mut master_set = false;
        for content in answer {
            self.remote.insert(content.name.clone(), content.clone());

            let is_audio = content.media_type() == Some(MediaType::Audio);
            let master = !master_set && (answer.len() == 1 || is_audio);
            master_set |= master;

            self.process_content(content, false, master, harvester, focus).await?;
        }
        Ok(())
    }

    /// Derive the stream of one remote content
    async fn process_content(
        &mut self,
        content: &Content,
        modify: bool,
        master: bool,
        harvester: &dyn TransportHarvester,
        focus: &FocusContext,
    ) -> Result<()> {
        let media = content
            .media_type()
            .ok_or_else(|| JingleError::protocol(format!("content {} has no media type", content.name)))?;

        let target = match harvester.stream_target(&content.name).await {
            Some(target) => Some(target),
            None => content
                .transport
                .as_ref()
                .and_then(extract_default_target)
                .or_else(|| self.streams.get(&media).and_then(|s| s.target)),
        };
        let Some(target) = target.filter(|t| !t.is_null()) else {
            debug!("No usable target for {} (modify={}), closing its stream", content.name, modify);
            self.close_stream(media).await;
            return Ok(());
        };

        let Some(device) = self.device(media) else {
            self.close_stream(media).await;
            return Ok(());
        };

        let remote_formats = content
            .description
            .as_ref()
            .map(|d| d.payload_types.clone())
            .or_else(|| {
                self.remote
                    .get(&content.name)
                    .and_then(|c| c.description.as_ref())
                    .map(|d| d.payload_types.clone())
            })
            .unwrap_or_default();
        let supported: Vec<PayloadType> = remote_formats
            .into_iter()
            .filter(|r| device.formats.iter().any(|l| l.same_format(r)))
            .collect();
        let Some(format) = supported.first().cloned() else {
            return Err(JingleError::incompatible("Remote party sent an invalid Jingle answer."));
        };

        let device_direction = device.direction.and(self.direction_preference(media));
        let mut remote_direction = Senders::direction_of(content.senders, !self.local_is_initiator);
        if focus.is_focus && focus.any_peer_sends(media) {
            remote_direction = remote_direction.or(Direction::SendOnly);
        }
        let direction = device_direction.direction_for_answer(remote_direction);

        self.configure_stream(NegotiatedStream {
            content: content.name.clone(),
            media,
            format,
            direction,
            target: Some(target),
            master,
            id: None,
            muted: false,
        })
        .await
    }

    /// Re-derive the stream of `name` after a content-modify. With
    /// `modify` the whole description is replaced, otherwise only the
    /// senders.
    pub async fn reinit_content(
        &mut self,
        name: &str,
        content: &Content,
        modify: bool,
        harvester: &dyn TransportHarvester,
        focus: &FocusContext,
    ) -> Result<()> {
        let Some(existing) = self.remote.get(name).cloned() else {
            return Err(JingleError::protocol(format!("no content named {}", name)));
        };

        let updated = if modify {
            content.clone()
        } else {
            let mut updated = existing;
            updated.senders = content.senders;
            updated
        };

        self.process_content(&updated, modify, false, harvester, focus).await?;
        self.remote.insert(name.to_string(), updated);
        Ok(())
    }

    /// Re-derive every stream from the remote descriptions
    pub async fn reinit_all_contents(&mut self, harvester: &dyn TransportHarvester, focus: &FocusContext) -> Result<()> {
        let contents: Vec<Content> = self.remote.values().cloned().collect();
        let mut master_set = false;
        for content in &contents {
            let is_audio = content.media_type() == Some(MediaType::Audio);
            let master = !master_set && (contents.len() == 1 || is_audio);
            master_set |= master;
            self.process_content(content, false, master, harvester, focus).await?;
        }
        Ok(())
    }

    /// Drop `name` from both content maps and tear down its stream
    pub async fn remove_content(&mut self, name: &str, harvester: Option<&dyn TransportHarvester>) {
        let media = self
            .local
            .shift_remove(name)
            .into_iter()
            .chain(self.remote.shift_remove(name))
            .find_map(|c| c.media_type());

        if let Some(media) = media {
            self.close_stream(media).await;
        }
        if let Some(harvester) = harvester {
            harvester.remove_content(name).await;
        }
    }

    /// Record the stream plan, updating the engine if the stream runs
    async fn configure_stream(&mut self, plan: NegotiatedStream) -> Result<()> {
        let engine = self.engine.clone();

        let Some(existing) = self.streams.get_mut(&plan.media) else {
            debug!("Planned {} stream for {} ({})", plan.media, plan.content, plan.direction);
            self.streams.insert(plan.media, plan);
            return Ok(());
        };

        if let Some(id) = existing.id.clone() {
            if existing.direction != plan.direction {
                engine
                    .set_direction(&id, plan.direction)
                    .await
                    .map_err(JingleError::media)?;
                debug!("{} stream direction {} -> {}", plan.media, existing.direction, plan.direction);
            }
            if let Some(target) = plan.target {
                if existing.target != Some(target) {
                    engine.update_target(&id, target, None).await.map_err(JingleError::media)?;
                }
            }
        }

        existing.content = plan.content;
        existing.format = plan.format;
        existing.direction = plan.direction;
        if plan.target.is_some() {
            existing.target = plan.target;
        }
        Ok(())
    }

    async fn close_stream(&mut self, media: MediaType) {
        let Some(stream) = self.streams.shift_remove(&media) else {
            return;
        };
        if let Some(id) = stream.id {
            if let Err(e) = self.engine.stop_stream(&id).await {
                warn!("Failed to stop {} stream {}: {:#}", media, id, e);
            }
            if let Err(e) = self.engine.close_device(media).await {
                warn!("Failed to close {} device: {:#}", media, e);
            }
            info!("Closed {} stream {}", media, id);
        }
    }

    /// Start every planned stream whose remote target is known
    pub async fn start_streams(&mut self, harvester: &dyn TransportHarvester) -> Result<()> {
        let owner = self
            .owner
            .clone()
            .ok_or_else(|| JingleError::internal("streams started before a session id exists"))?;
        let engine = self.engine.clone();

        for stream in self.streams.values_mut() {
            if stream.id.is_some() {
                continue;
            }

            let target = match harvester.stream_target(&stream.content).await {
                Some(target) => Some(target),
                None => stream.target,
            };
            let Some(target) = target.filter(|t| !t.is_null()) else {
                debug!("No target for {} yet, not starting it", stream.content);
                continue;
            };

            if let Some(existing) = engine.active_stream(&owner, stream.media) {
                engine
                    .set_direction(&existing, stream.direction)
                    .await
                    .map_err(JingleError::media)?;
                stream.id = Some(existing);
                stream.target = Some(target);
                continue;
            }

            engine.open_device(stream.media).await.map_err(JingleError::media)?;
            let id = engine
                .start_stream(StreamParams {
                    owner: owner.clone(),
                    content: stream.content.clone(),
                    media: stream.media,
                    connector: harvester.stream_connector(&stream.content),
                    target,
                    format: stream.format.clone(),
                    direction: stream.direction,
                    master: stream.master,
                })
                .await
                .map_err(JingleError::media)?;

            info!("Started {} stream {} ({}, {})", stream.media, id, stream.format.name, stream.direction);
            stream.id = Some(id);
            stream.target = Some(target);
        }
        Ok(())
    }

    /// Point running streams at the pairs connectivity checks selected
    pub async fn refresh_targets(&mut self, harvester: &dyn TransportHarvester) -> Result<()> {
        let engine = self.engine.clone();
        for stream in self.streams.values_mut() {
            let Some(target) = harvester.stream_target(&stream.content).await else {
                continue;
            };
            if stream.target == Some(target) {
                continue;
            }
            if let Some(id) = &stream.id {
                engine
                    .update_target(id, target, harvester.stream_connector(&stream.content))
                    .await
                    .map_err(JingleError::media)?;
            }
            stream.target = Some(target);
        }
        Ok(())
    }

    /// Direction a stream returns to after hold, combining in order what
    /// the remote side asked for, the user preference, our own hold and
    /// the device
    fn post_hold_direction(&self, stream: &NegotiatedStream) -> Direction {
        if stream.direction.allows_sending() {
            return stream.direction;
        }

        let mut direction = self
            .remote
            .get(&stream.content)
            .map(|c| Senders::direction_of(c.senders, self.local_is_initiator))
            .unwrap_or(Direction::SendRecv);
        direction = direction.and(self.direction_preference(stream.media));
        if self.locally_on_hold {
            direction = direction.and(Direction::SendOnly);
        }
        direction.and(self.device_direction(stream.media))
    }

    pub async fn set_locally_on_hold(&mut self, on_hold: bool, focus: &FocusContext) -> Result<()> {
        self.locally_on_hold = on_hold;
        if !on_hold && self.remotely_on_hold {
            // Still held by the other side
            return Ok(());
        }

        let updates: Vec<(MediaType, Direction)> = self
            .streams
            .values()
            .filter(|s| s.id.is_some())
            .map(|s| {
                let direction = if !on_hold {
                    self.post_hold_direction(s)
                } else if focus.is_focus || s.media == MediaType::Video {
                    Direction::Inactive
                } else {
                    s.direction.and(Direction::SendOnly)
                };
                (s.media, direction)
            })
            .collect();

        for (media, direction) in updates {
            self.apply_direction(media, direction).await?;
            if media == MediaType::Audio {
                self.set_mute(media, on_hold).await?;
            }
        }
        Ok(())
    }

    pub async fn set_remotely_on_hold(&mut self, on_hold: bool, focus: &FocusContext) -> Result<()> {
        self.remotely_on_hold = on_hold;

        let updates: Vec<(MediaType, Direction)> = self
            .streams
            .values()
            .filter(|s| s.id.is_some())
            .map(|s| {
                let direction = if !on_hold {
                    self.post_hold_direction(s)
                } else if focus.is_focus {
                    Direction::Inactive
                } else {
                    s.direction.and(Direction::RecvOnly)
                };
                (s.media, direction)
            })
            .collect();

        for (media, direction) in updates {
            self.apply_direction(media, direction).await?;
        }
        Ok(())
    }

    async fn apply_direction(&mut self, media: MediaType, direction: Direction) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&media) else {
            return Ok(());
        };
        if stream.direction == direction {
            return Ok(());
        }
        if let Some(id) = &stream.id {
            self.engine
                .set_direction(id, direction)
                .await
                .map_err(JingleError::media)?;
        }
        debug!("{} stream direction {} -> {}", media, stream.direction, direction);
        stream.direction = direction;
        Ok(())
    }

    async fn set_mute(&mut self, media: MediaType, mute: bool) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&media) else {
            return Ok(());
        };
        if let Some(id) = &stream.id {
            self.engine.set_mute(id, mute).await.map_err(JingleError::media)?;
        }
        stream.muted = mute;
        Ok(())
    }

    /// Stop every stream
    pub async fn close(&mut self) {
        let media: Vec<MediaType> = self.streams.keys().copied().collect();
        for media in media {
            self.close_stream(media).await;
        }
    }
}
