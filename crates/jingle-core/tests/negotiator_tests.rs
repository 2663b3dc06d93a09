//! Media negotiation in isolation: offers, answers and focus overrides

mod common;

use std::collections::HashSet;

use common::*;
use pretty_assertions::assert_eq;
use rvoip_jingle_core::jingle::{Creator, EncryptionHints, RtpDescription};
use rvoip_jingle_core::prelude::*;
use rvoip_jingle_core::{FocusContext, MediaConfig, MediaNegotiator};

fn negotiator(engine: std::sync::Arc<MockMediaEngine>, config: MediaConfig) -> MediaNegotiator {
    MediaNegotiator::new(engine, config)
}

fn focus_with(rtp_translation: bool, others_receiving: &[MediaType]) -> FocusContext {
    FocusContext {
        is_focus: true,
        rtp_translation,
        others_receiving: others_receiving.iter().copied().collect(),
        peers_sending: HashSet::new(),
    }
}

#[test]
fn video_is_receive_only_until_allowed() {
    let mut media = negotiator(MockMediaEngine::audio_video(), MediaConfig::default());
    let plain = FocusContext::default();

    assert_eq!(media.direction(MediaType::Audio, &plain), Direction::SendRecv);
    assert_eq!(media.direction(MediaType::Video, &plain), Direction::RecvOnly);

    media.set_local_video_allowed(true);
    assert_eq!(media.direction(MediaType::Video, &plain), Direction::SendRecv);
}

#[test]
fn translating_focus_ignores_video_preference() {
    let media = negotiator(MockMediaEngine::audio_video(), MediaConfig::default());

    assert_eq!(
        media.direction(MediaType::Video, &focus_with(true, &[])),
        Direction::SendRecv
    );
    assert_eq!(
        media.direction(MediaType::Video, &focus_with(false, &[])),
        Direction::RecvOnly
    );
}

#[test]
fn focus_sends_what_other_members_receive() {
    let engine = MockMediaEngine::new();
    engine.set_device(MediaType::Audio, Direction::RecvOnly, vec![pcmu()]);
    let media = negotiator(engine, MediaConfig::default());

    assert_eq!(media.direction(MediaType::Audio, &FocusContext::default()), Direction::RecvOnly);
    assert_eq!(
        media.direction(MediaType::Audio, &focus_with(false, &[MediaType::Audio])),
        Direction::SendRecv
    );

    let not_focus = FocusContext {
        is_focus: false,
        ..focus_with(false, &[MediaType::Audio])
    };
    assert_eq!(media.direction(MediaType::Audio, &not_focus), Direction::RecvOnly);
}

#[test]
fn receive_only_media_is_not_offered() {
    let mut media = negotiator(MockMediaEngine::audio_video(), MediaConfig::default());
    media.set_local_is_initiator(true);

    let contents = media.create_content_list(&FocusContext::default()).unwrap();
    let names: Vec<&str> = contents.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["audio"]);
    assert_eq!(contents[0].creator, Creator::Initiator);
}

#[test]
fn no_device_means_nothing_to_offer() {
    let mut media = negotiator(MockMediaEngine::new(), MediaConfig::default());
    assert!(matches!(
        media.create_content_list(&FocusContext::default()),
        Err(JingleError::NoActiveDevice)
    ));
}

#[tokio::test]
async fn answer_keeps_local_codec_order_with_remote_numbers() {
    let mut media = negotiator(MockMediaEngine::audio_only(), MediaConfig::default());

    let offer = offered_content(
        MediaType::Audio,
        vec![PayloadType::new(8, "PCMA", 8000), pcmu(), PayloadType::new(120, "opus", 48000).with_channels(2)],
        Some(candidates("audio", 30000, 0)),
    );
    let answer = media.compute_answer(&[offer], &FocusContext::default()).await.unwrap();

    let formats = &answer[0].description.as_ref().unwrap().payload_types;
    let ids: Vec<(u8, &str)> = formats.iter().map(|p| (p.id, p.name.as_str())).collect();
    assert_eq!(ids, vec![(120, "opus"), (0, "PCMU")]);
    assert_eq!(answer[0].senders, Some(Senders::Both));
}

#[tokio::test]
async fn unusable_contents_are_dropped_from_the_answer() {
    let mut media = negotiator(MockMediaEngine::audio_only(), MediaConfig::default());

    let audio = offered_content(MediaType::Audio, vec![pcmu()], Some(candidates("audio", 30000, 0)));
    let video = offered_content(MediaType::Video, vec![vp8()], Some(candidates("video", 30002, 0)));
    let answer = media.compute_answer(&[audio, video], &FocusContext::default()).await.unwrap();

    assert_eq!(answer.len(), 1);
    assert_eq!(answer[0].name, "audio");
    assert!(media.local_content("video").is_none());
    assert!(media.remote_content("video").is_some());
}

#[tokio::test]
async fn required_encryption_without_common_suite_is_refused() {
    let mut media = negotiator(MockMediaEngine::audio_only(), MediaConfig::default());

    let mut offer = offered_content(MediaType::Audio, vec![pcmu()], Some(candidates("audio", 30000, 0)));
    let mut description = RtpDescription::new(MediaType::Audio, vec![pcmu()]);
    description.encryption = Some(EncryptionHints {
        required: true,
        crypto_suites: vec!["F8_128_HMAC_SHA1_80".to_string()],
    });
    offer.description = Some(description);

    let err = media.compute_answer(&[offer], &FocusContext::default()).await.unwrap_err();
    assert!(matches!(err, JingleError::IncompatibleParameters { .. }));
    assert!(err.to_string().contains("Offer contained no media formats"));
}

#[tokio::test]
async fn focus_answers_receive_only_offer_with_sending() {
    let engine = MockMediaEngine::audio_only();
    let mut media = negotiator(engine, MediaConfig::default());

    // The remote initiator only sends; other members need our audio
    let offer = offered_content(MediaType::Audio, vec![pcmu()], Some(candidates("audio", 30000, 0)))
        .with_senders(Senders::Initiator);

    let answer = media
        .compute_answer(std::slice::from_ref(&offer), &FocusContext::default())
        .await
        .unwrap();
    assert_eq!(answer[0].senders, Some(Senders::Initiator));

    let mut media = negotiator(MockMediaEngine::audio_only(), MediaConfig::default());
    let answer = media
        .compute_answer(&[offer], &focus_with(false, &[MediaType::Audio]))
        .await
        .unwrap();
    assert_eq!(answer[0].senders, Some(Senders::Both));
}

#[tokio::test]
async fn hold_directions_follow_the_focus_role() {
    let engine = MockMediaEngine::audio_only();
    let mut media = negotiator(engine.clone(), MediaConfig::default());
    media.set_owner(SessionId::from("s1"));

    let offer = offered_content(MediaType::Audio, vec![pcmu()], Some(candidates("audio", 30000, 0)));
    media.compute_answer(&[offer], &FocusContext::default()).await.unwrap();

    let harvester = ScriptedHarvester::new();
    let names = media.local_content_names();
    media.generate_accept(&names, &harvester, &[], &FocusContext::default()).await.unwrap();
    media.start_streams(&harvester).await.unwrap();
    assert_eq!(media.stream_direction(MediaType::Audio), Some(Direction::SendRecv));

    media.set_remotely_on_hold(true, &FocusContext::default()).await.unwrap();
    assert_eq!(media.stream_direction(MediaType::Audio), Some(Direction::RecvOnly));
    media.set_remotely_on_hold(false, &FocusContext::default()).await.unwrap();
    assert_eq!(media.stream_direction(MediaType::Audio), Some(Direction::SendRecv));

    media.set_locally_on_hold(true, &focus_with(false, &[])).await.unwrap();
    assert_eq!(media.stream_direction(MediaType::Audio), Some(Direction::Inactive));
    assert!(engine.running_for(MediaType::Audio).unwrap().muted);
}

#[tokio::test]
async fn closing_stops_every_stream() {
    let engine = MockMediaEngine::audio_only();
    let mut media = negotiator(engine.clone(), MediaConfig::default());
    media.set_owner(SessionId::from("s1"));

    let offer = offered_content(MediaType::Audio, vec![pcmu()], Some(candidates("audio", 30000, 0)));
    media.compute_answer(&[offer], &FocusContext::default()).await.unwrap();
    let harvester = ScriptedHarvester::new();
    let names = media.local_content_names();
    media.generate_accept(&names, &harvester, &[], &FocusContext::default()).await.unwrap();
    media.start_streams(&harvester).await.unwrap();
    assert_eq!(engine.running().len(), 1);

    media.close().await;
    assert!(engine.running().is_empty());
    assert!(media.stream(MediaType::Audio).is_none());
}

#[test]
fn content_header_keeps_the_creator() {
    let content = Content::new("audio", Creator::Responder);
    assert_eq!(content.header().creator, Creator::Responder);
}
