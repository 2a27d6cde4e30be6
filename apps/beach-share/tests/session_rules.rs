mod common;

use std::sync::Arc;

use beach_share::session::CaptureState;
use beach_share::signaling::memory::MemoryRelay;
use beach_share::transport::{PeerTransport, SessionDescription, SignalingState};
use beach_share::{
    AnswerOutcome, Dispatch, IgnoreReason, InboundSignal, OutboundSignal, PeerId, Role,
    SessionError,
};
use common::{DeniedCapture, FlakyCapture, Participant, StaticCapture, answer_sdp, candidate};

fn peer(id: &str) -> PeerId {
    PeerId::from(id)
}

fn offer_from(sharer: &str) -> InboundSignal {
    InboundSignal::Offer {
        sharer_id: peer(sharer),
        offer: SessionDescription::offer("v=0\r\no=sharer 1\r\ns=-\r\n"),
    }
}

#[test_timeout::tokio_timeout_test(10)]
async fn repeated_viewer_joined_creates_one_engine() {
    let relay = MemoryRelay::new();
    let sharer = Participant::sharer(&relay, "sharer");
    sharer.controller.start_sharing().await.unwrap();

    let joined = InboundSignal::ViewerJoined(peer("viewer"));
    assert_eq!(
        sharer.router.dispatch(joined.clone()).await.unwrap(),
        Dispatch::Initiated
    );
    assert_eq!(
        sharer.router.dispatch(joined).await.unwrap(),
        Dispatch::AlreadyNegotiating
    );

    assert_eq!(sharer.ctx.registry().len(), 1);
    assert_eq!(sharer.factory.created(), 1);
    assert_eq!(sharer.transport("viewer").offers_created(), 1);
}

#[test_timeout::tokio_timeout_test(10)]
async fn events_before_a_role_is_chosen_are_ignored() {
    let relay = MemoryRelay::new();
    let idle = Participant::join(&relay, "idle", StaticCapture::ready());
    assert_eq!(idle.ctx.role(), Role::Unset);

    let signals = [
        InboundSignal::ViewerJoined(peer("viewer")),
        offer_from("sharer"),
        InboundSignal::Answer {
            viewer_id: peer("viewer"),
            answer: answer_sdp("early"),
        },
        InboundSignal::IceCandidate {
            from: peer("viewer"),
            candidate: candidate(1),
        },
    ];
    for signal in signals {
        assert_eq!(
            idle.router.dispatch(signal).await.unwrap(),
            Dispatch::Ignored(IgnoreReason::RoleUnset)
        );
    }
    assert!(idle.ctx.registry().is_empty());
    assert_eq!(idle.factory.created(), 0);
}

#[test_timeout::tokio_timeout_test(10)]
async fn each_role_ignores_the_other_roles_events() {
    let relay = MemoryRelay::new();
    let sharer = Participant::sharer(&relay, "sharer");
    let viewer = Participant::viewer(&relay, "viewer");
    sharer.controller.start_sharing().await.unwrap();
    viewer.controller.start_viewing().await.unwrap();

    assert_eq!(
        sharer.router.dispatch(offer_from("other")).await.unwrap(),
        Dispatch::Ignored(IgnoreReason::WrongRole)
    );
    assert_eq!(
        viewer
            .router
            .dispatch(InboundSignal::ViewerJoined(peer("someone")))
            .await
            .unwrap(),
        Dispatch::Ignored(IgnoreReason::WrongRole)
    );
    assert_eq!(
        viewer
            .router
            .dispatch(InboundSignal::Answer {
                viewer_id: peer("someone"),
                answer: answer_sdp("stray"),
            })
            .await
            .unwrap(),
        Dispatch::Ignored(IgnoreReason::WrongRole)
    );
    assert!(sharer.ctx.registry().is_empty());
    assert!(viewer.ctx.registry().is_empty());
}

#[test_timeout::tokio_timeout_test(10)]
async fn candidate_for_unknown_peer_is_dropped_without_creating_state() {
    let relay = MemoryRelay::new();
    let viewer = Participant::viewer(&relay, "viewer");
    viewer.controller.start_viewing().await.unwrap();

    let outcome = viewer
        .router
        .dispatch(InboundSignal::IceCandidate {
            from: peer("sharer"),
            candidate: candidate(3),
        })
        .await
        .unwrap();
    assert_eq!(outcome, Dispatch::CandidateDropped);
    assert!(!viewer.ctx.registry().contains(&peer("sharer")));
    assert_eq!(viewer.factory.created(), 0);
}

#[test_timeout::tokio_timeout_test(10)]
async fn answer_from_viewer_never_offered_is_dropped() {
    let relay = MemoryRelay::new();
    let sharer = Participant::sharer(&relay, "sharer");
    sharer.controller.start_sharing().await.unwrap();

    let outcome = sharer
        .router
        .dispatch(InboundSignal::Answer {
            viewer_id: peer("stranger"),
            answer: answer_sdp("stray"),
        })
        .await
        .unwrap();
    assert_eq!(outcome, Dispatch::AnswerDropped);
    assert!(sharer.ctx.registry().is_empty());
}

#[test_timeout::tokio_timeout_test(10)]
async fn role_is_fixed_once_chosen() {
    let relay = MemoryRelay::new();
    let participant = Participant::sharer(&relay, "sharer");
    participant.controller.start_sharing().await.unwrap();

    let err = participant.controller.start_viewing().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::RoleConflict {
            current: Role::Sharer,
            requested: Role::Viewer,
        }
    ));
    assert_eq!(participant.ctx.role(), Role::Sharer);

    // Starting the same role again does not rejoin.
    participant.controller.start_sharing().await.unwrap();
    let joins = participant
        .channel
        .sent()
        .into_iter()
        .filter(|signal| matches!(signal, OutboundSignal::JoinRoom { .. }))
        .count();
    assert_eq!(joins, 1);
}

#[test_timeout::tokio_timeout_test(10)]
async fn join_room_carries_room_and_role() {
    let relay = MemoryRelay::new();
    let viewer = Participant::viewer(&relay, "viewer");
    viewer.controller.start_viewing().await.unwrap();
    assert_eq!(
        viewer.channel.sent(),
        vec![OutboundSignal::JoinRoom {
            room_id: common::ROOM.to_string(),
            role: Role::Viewer,
        }]
    );
}

#[test_timeout::tokio_timeout_test(10)]
async fn failed_capture_offers_nobody() {
    let relay = MemoryRelay::new();
    let sharer = Participant::join(&relay, "sharer", Arc::new(DeniedCapture));

    let err = sharer.controller.start_sharing().await.unwrap_err();
    assert!(matches!(err, SessionError::Capture(_)));
    assert_eq!(sharer.ctx.role(), Role::Sharer);
    assert!(sharer.ctx.capture_failed());

    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::ViewerJoined(peer("viewer")))
            .await
            .unwrap(),
        Dispatch::Ignored(IgnoreReason::CaptureFailed)
    );
    assert!(sharer.ctx.registry().is_empty());
    assert!(
        !sharer
            .channel
            .sent()
            .iter()
            .any(|signal| matches!(signal, OutboundSignal::Offer { .. }))
    );
}

#[test_timeout::tokio_timeout_test(10)]
async fn sharing_again_after_failed_capture_retries_it() {
    let relay = MemoryRelay::new();
    let sharer = Participant::join(&relay, "sharer", FlakyCapture::failing(1));

    assert!(matches!(
        sharer.controller.start_sharing().await,
        Err(SessionError::Capture(_))
    ));
    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::ViewerJoined(peer("viewer")))
            .await
            .unwrap(),
        Dispatch::Ignored(IgnoreReason::CaptureFailed)
    );

    sharer.controller.start_sharing().await.unwrap();
    assert!(!sharer.ctx.capture_failed());
    assert!(sharer.ctx.local_stream().is_some());
    let joins = sharer
        .channel
        .sent()
        .into_iter()
        .filter(|signal| matches!(signal, OutboundSignal::JoinRoom { .. }))
        .count();
    assert_eq!(joins, 1);

    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::ViewerJoined(peer("viewer")))
            .await
            .unwrap(),
        Dispatch::Initiated
    );
    assert_eq!(
        sharer.transport("viewer").track_ids(),
        vec!["screen".to_string()]
    );

    // Once capture succeeded, another call changes nothing.
    sharer.controller.start_sharing().await.unwrap();
    assert_eq!(sharer.transport("viewer").offers_created(), 1);
}

#[test_timeout::tokio_timeout_test(10)]
async fn viewer_joining_during_capture_gets_offer_without_media() {
    let relay = MemoryRelay::new();
    let (capture, gate) = StaticCapture::gated();
    let sharer = Participant::join(&relay, "sharer", capture);

    let controller = Arc::clone(&sharer.controller);
    let sharing = tokio::spawn(async move { controller.start_sharing().await });
    while !matches!(sharer.ctx.capture_state(), CaptureState::Acquiring) {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::ViewerJoined(peer("early")))
            .await
            .unwrap(),
        Dispatch::Initiated
    );
    let engine = sharer.ctx.registry().get(&peer("early")).unwrap();
    assert!(!engine.local_media_attached());
    assert!(sharer.transport("early").track_ids().is_empty());

    gate.notify_one();
    sharing.await.unwrap().unwrap();
    assert!(sharer.ctx.local_stream().is_some());

    // The early viewer is not renegotiated once media shows up.
    assert_eq!(sharer.transport("early").offers_created(), 1);
    assert!(!engine.local_media_attached());

    // Viewers joining later get the stream.
    sharer
        .router
        .dispatch(InboundSignal::ViewerJoined(peer("late")))
        .await
        .unwrap();
    assert_eq!(
        sharer.transport("late").track_ids(),
        vec!["screen".to_string()]
    );
}

#[test_timeout::tokio_timeout_test(10)]
async fn transport_setup_failure_is_scoped_to_one_viewer() {
    let relay = MemoryRelay::new();
    let sharer = Participant::sharer(&relay, "sharer");
    sharer.controller.start_sharing().await.unwrap();
    sharer.factory.fail_for(&peer("broken"));

    let err = sharer
        .router
        .dispatch(InboundSignal::ViewerJoined(peer("broken")))
        .await
        .unwrap_err();
    assert_eq!(err.peer, peer("broken"));
    assert!(sharer.ctx.registry().contains(&peer("broken")));

    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::ViewerJoined(peer("healthy")))
            .await
            .unwrap(),
        Dispatch::Initiated
    );
    assert_eq!(
        sharer.transport("healthy").signaling_state(),
        SignalingState::HaveLocalOffer
    );
    assert!(sharer.factory.transport(&peer("broken")).is_none());

    // Events for the stalled peer do not build a transport behind its back.
    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::Answer {
                viewer_id: peer("broken"),
                answer: answer_sdp("early"),
            })
            .await
            .unwrap(),
        Dispatch::Answer(AnswerOutcome::Deferred)
    );
    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::IceCandidate {
                from: peer("broken"),
                candidate: candidate(7),
            })
            .await
            .unwrap(),
        Dispatch::CandidateQueued
    );
    assert!(sharer.factory.transport(&peer("broken")).is_none());
    assert_eq!(sharer.factory.created(), 1);

    // A later viewer-joined runs the offer again, which then picks up the
    // buffered answer and candidate.
    sharer.factory.recover(&peer("broken"));
    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::ViewerJoined(peer("broken")))
            .await
            .unwrap(),
        Dispatch::Initiated
    );
    let engine = sharer.ctx.registry().get(&peer("broken")).unwrap();
    assert!(engine.offer_sent());
    assert!(engine.answer_applied());
    let transport = sharer.transport("broken");
    assert_eq!(transport.signaling_state(), SignalingState::Stable);
    assert_eq!(transport.remote_descriptions(), vec![answer_sdp("early")]);
    assert_eq!(transport.candidates(), vec![candidate(7)]);
    assert_eq!(
        sharer
            .router
            .dispatch(InboundSignal::ViewerJoined(peer("broken")))
            .await
            .unwrap(),
        Dispatch::AlreadyNegotiating
    );
}

#[test_timeout::tokio_timeout_test(10)]
async fn viewer_offer_before_role_then_after() {
    let relay = MemoryRelay::new();
    let viewer = Participant::viewer(&relay, "viewer");

    assert_eq!(
        viewer.router.dispatch(offer_from("sharer")).await.unwrap(),
        Dispatch::Ignored(IgnoreReason::RoleUnset)
    );
    viewer.controller.start_viewing().await.unwrap();
    assert_eq!(
        viewer.router.dispatch(offer_from("sharer")).await.unwrap(),
        Dispatch::OfferAccepted
    );
    assert_eq!(
        viewer.transport("sharer").signaling_state(),
        SignalingState::Stable
    );
}
