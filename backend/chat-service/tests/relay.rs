mod common;

use actix_web::{http::StatusCode, test, App};
use chat_service::models::{ConversationType, DeliveryState, LogicalMessage};
use chat_service::websocket::events::RelayEvent;
use chat_service::websocket::relay::{Audience, DeletePolicy, RelayDispatcher};
use chat_service::websocket::SessionRegistry;
use chrono::Utc;
use common::{
    bearer, direct_row, test_config, Harness, InMemoryIdentity, InMemoryMembership,
    InMemoryStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

fn deleted(
    sender_id: Uuid,
    receiver_id: Uuid,
    kind: ConversationType,
    reference_id: &str,
) -> RelayEvent {
    RelayEvent::MessageDeleted {
        message_id: Uuid::new_v4(),
        sender_id,
        receiver_id,
        conversation_type: kind,
        reference_id: reference_id.into(),
    }
}

fn dispatcher(policy: DeletePolicy, membership: InMemoryMembership) -> RelayDispatcher {
    RelayDispatcher::new(SessionRegistry::new(), Arc::new(membership), policy)
}

fn broadcast(sender: Uuid, receivers: &[Uuid], content: &str) -> Value {
    let receiver: Vec<Value> = receivers.iter().map(|id| json!({ "userId": id })).collect();
    json!({
        "newMessage": {
            "type": "broadcast",
            "refId": "b-1",
            "sender": {"userId": sender, "name": "Ann"},
            "message": content,
            "receiver": receiver,
            "messageType": "text",
            "deliverType": "sent"
        }
    })
}

async fn next_frame(rx: &mut UnboundedReceiver<String>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame within a second")
        .expect("session channel open");
    serde_json::from_str(&frame).unwrap()
}

#[tokio::test]
async fn test_sent_event_skips_sender() {
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    let message = direct_row(u1, u2, "hi", DeliveryState::Sent, Utc::now());
    let d = dispatcher(DeletePolicy::Participants, InMemoryMembership::default());

    let audience = d
        .audience(&RelayEvent::MessageSent {
            message: LogicalMessage::from(message),
        })
        .await;
    assert_eq!(audience, Audience::AllExcept(u1));
}

#[tokio::test]
async fn test_delete_audience_per_policy() {
    let (u1, u2, u3, u4) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let event = deleted(u1, u2, ConversationType::Group, "g-1");

    let d = dispatcher(DeletePolicy::Global, InMemoryMembership::default());
    assert_eq!(d.audience(&event).await, Audience::All);

    let d = dispatcher(DeletePolicy::Participants, InMemoryMembership::default());
    assert_eq!(d.audience(&event).await, Audience::Users(vec![u1, u2]));

    let d = dispatcher(
        DeletePolicy::Members,
        InMemoryMembership::with_group("g-1", &[u2, u3, u4]),
    );
    assert_eq!(d.audience(&event).await, Audience::Users(vec![u2, u3, u4, u1]));

    // Sender and receiver collapse to one entry when equal
    let d = dispatcher(DeletePolicy::Participants, InMemoryMembership::default());
    let own = deleted(u1, u1, ConversationType::Direct, "d-1");
    assert_eq!(d.audience(&own).await, Audience::Users(vec![u1]));
}

#[tokio::test]
async fn test_member_policy_falls_back_to_participants() {
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    let d = dispatcher(DeletePolicy::Members, InMemoryMembership::default());

    let unknown_group = deleted(u1, u2, ConversationType::Group, "missing");
    assert_eq!(d.audience(&unknown_group).await, Audience::Users(vec![u1, u2]));

    let direct = deleted(u1, u2, ConversationType::Direct, "d-1");
    assert_eq!(d.audience(&direct).await, Audience::Users(vec![u1, u2]));
}

#[tokio::test]
async fn test_dispatch_reaches_every_session_of_a_user() {
    let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let sessions = SessionRegistry::new();
    let (_, mut tab1) = sessions.register(u2).await;
    let (_, mut tab2) = sessions.register(u2).await;
    let (_, mut bystander) = sessions.register(u3).await;

    let d = RelayDispatcher::new(
        sessions.clone(),
        Arc::new(InMemoryMembership::default()),
        DeletePolicy::Participants,
    );
    let delivered = d
        .dispatch(deleted(u1, u2, ConversationType::Direct, "d-1"))
        .await;
    assert_eq!(delivered, 2);

    assert_eq!(next_frame(&mut tab1).await["type"], "message-deleted");
    assert_eq!(next_frame(&mut tab2).await["type"], "message-deleted");
    assert!(bystander.try_recv().is_err());
}

#[actix_rt::test]
async fn test_delete_route_publishes_event() {
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    let mut h = Harness::new(test_config(), InMemoryStore::new(), InMemoryIdentity::default());
    let row = direct_row(u1, u2, "bye", DeliveryState::Sent, Utc::now());
    let id = row.id;
    h.store.seed(row).await;
    let app = test::init_service(App::new().configure(h.configure())).await;

    let req = test::TestRequest::delete()
        .uri(&format!("/api/chats/{id}"))
        .insert_header(bearer(u1))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        RelayEvent::MessageDeleted {
            message_id,
            sender_id,
            receiver_id,
            ..
        } => {
            assert_eq!(*message_id, id);
            assert_eq!(*sender_id, u1);
            assert_eq!(*receiver_id, u2);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[actix_rt::test]
async fn test_send_is_relayed_to_other_sessions() {
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    let mut h = Harness::new(test_config(), InMemoryStore::new(), InMemoryIdentity::default());
    let (_, mut sender_rx) = h.state.sessions.register(u1).await;
    let (_, mut receiver_rx) = h.state.sessions.register(u2).await;
    let _dispatcher = h.spawn_dispatcher(DeletePolicy::Participants);
    let app = test::init_service(App::new().configure(h.configure())).await;

    let req = test::TestRequest::post()
        .uri("/api/chats/send")
        .insert_header(bearer(u1))
        .set_json(json!({
            "newMessage": {
                "type": "direct",
                "refId": "d-1",
                "sender": {"userId": u1, "name": "Ann"},
                "message": "live",
                "receiver": [{"userId": u2, "name": "Bo"}],
                "messageType": "text",
                "deliverType": "sent"
            }
        }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let frame = next_frame(&mut receiver_rx).await;
    assert_eq!(frame["type"], "message-sent");
    assert_eq!(frame["payload"]["message"], "live");
    assert_eq!(frame["payload"]["sender"]["userId"], u1.to_string());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sender_rx.try_recv().is_err());
}

#[actix_rt::test]
async fn test_broadcast_sends_one_frame_per_session() {
    let (u1, u2, u3, u4) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let mut h = Harness::new(test_config(), InMemoryStore::new(), InMemoryIdentity::default());
    let (_, mut receiver_rx) = h.state.sessions.register(u2).await;
    let (_, mut bystander_rx) = h.state.sessions.register(u4).await;
    let _dispatcher = h.spawn_dispatcher(DeletePolicy::Participants);
    let app = test::init_service(App::new().configure(h.configure())).await;

    let req = test::TestRequest::post()
        .uri("/api/chats/send")
        .insert_header(bearer(u1))
        .set_json(broadcast(u1, &[u2, u3], "to both"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    assert_eq!(h.store.all().await.len(), 2);

    for rx in [&mut receiver_rx, &mut bystander_rx] {
        let frame = next_frame(rx).await;
        assert_eq!(frame["type"], "message-sent");
        assert_eq!(frame["payload"]["receiver"].as_array().unwrap().len(), 2);
        assert_eq!(frame["payload"]["originalIds"].as_array().unwrap().len(), 2);
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(receiver_rx.try_recv().is_err());
    assert!(bystander_rx.try_recv().is_err());
}

#[actix_rt::test]
async fn test_full_relay_queue_does_not_fail_requests() {
    let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let mut config = test_config();
    config.relay_queue_capacity = 1;
    let mut h = Harness::new(config, InMemoryStore::new(), InMemoryIdentity::default());
    let app = test::init_service(App::new().configure(h.configure())).await;

    for content in ["first", "second"] {
        let req = test::TestRequest::post()
            .uri("/api/chats/send")
            .insert_header(bearer(u1))
            .set_json(broadcast(u1, &[u2, u3], content))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    }

    // Every row persisted; the second send's event did not fit in the queue
    assert_eq!(h.store.all().await.len(), 4);
    assert_eq!(h.drain_events().len(), 1);
}
