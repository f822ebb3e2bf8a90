//! 会话列表仓库测试

use std::sync::Arc;

use domain::{Conversation, NewMessageEvent, ViewerRole};

use super::ConversationStore;
use crate::api::MockChatApi;
use crate::error::ApplicationError;
use crate::testing::{at, conversation, message, FakeChatApi, LIST_CONVERSATIONS};

fn with_last(mut conv: Conversation, secs: i64) -> Conversation {
    conv.last_message_at = Some(at(secs));
    conv
}

fn ids(store_view: &[Conversation]) -> Vec<&str> {
    store_view.iter().map(|c| c.id.as_str()).collect()
}

fn fixture() -> (Arc<FakeChatApi>, ConversationStore) {
    let api = FakeChatApi::new("shopper");
    api.set_conversations(vec![
        with_last(conversation("c1", "shopper", "store-a"), 10),
        with_last(conversation("c2", "shopper", "store-b"), 20),
    ]);
    let store = ConversationStore::new(api.clone(), ViewerRole::User);
    (api, store)
}

#[tokio::test]
async fn test_load_sorts_by_latest_message() {
    let (_api, store) = fixture();
    let mut updates = store.subscribe();

    store.load_conversations().await.unwrap();

    let state = store.snapshot().await;
    assert_eq!(ids(&state.conversations), vec!["c2", "c1"]);
    assert!(state.loaded);
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().conversations.len(), 2);
}

#[tokio::test]
async fn test_conversations_without_messages_sort_last() {
    let (api, store) = fixture();
    api.set_conversations(vec![
        conversation("empty", "shopper", "store-z"),
        with_last(conversation("c1", "shopper", "store-a"), 10),
    ]);

    store.load_conversations().await.unwrap();

    assert_eq!(ids(&store.snapshot().await.conversations), vec!["c1", "empty"]);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_list() {
    let (api, store) = fixture();
    store.load_conversations().await.unwrap();

    api.fail(LIST_CONVERSATIONS, ApplicationError::network("offline"));
    let err = store.load_conversations().await.unwrap_err();
    assert!(err.is_transient());

    let state = store.snapshot().await;
    assert_eq!(state.conversations.len(), 2);
    assert!(state.error.as_deref().unwrap().contains("offline"));
    assert!(!state.loading);

    store.dismiss_error().await;
    assert!(store.snapshot().await.error.is_none());
}

#[tokio::test]
async fn test_older_list_response_is_discarded() {
    let (api, store) = fixture();
    let store = Arc::new(store);
    let gate = api.gate(LIST_CONVERSATIONS);

    let first = {
        let store = store.clone();
        tokio::spawn(async move { store.load_conversations().await })
    };
    api.wait_for_calls(LIST_CONVERSATIONS, 1).await;

    api.set_conversations(vec![with_last(conversation("c3", "shopper", "store-c"), 30)]);
    store.load_conversations().await.unwrap();

    gate.add_permits(1);
    first.await.unwrap().unwrap();

    let state = store.snapshot().await;
    assert_eq!(ids(&state.conversations), vec!["c3"]);
    assert!(!state.loading);
}

#[tokio::test]
async fn test_incoming_message_bumps_recipient_and_reorders() {
    let (_api, store) = fixture();
    store.load_conversations().await.unwrap();

    let event = NewMessageEvent::new(message("m1", "c1", "store-a-owner", 30));
    store.apply_incoming_message_event(&event, None).await.unwrap();

    let state = store.snapshot().await;
    assert_eq!(ids(&state.conversations), vec!["c1", "c2"]);
    let c1 = &state.conversations[0];
    assert_eq!(c1.unread_count_for_user, 1);
    assert_eq!(c1.unread_count_for_store, 0);
    assert_eq!(c1.last_message.as_ref().unwrap().text, "text of m1");
    assert_eq!(state.unread_total, 1);
}

#[tokio::test]
async fn test_duplicate_delivery_counts_once() {
    let (_api, store) = fixture();
    store.load_conversations().await.unwrap();

    let event = NewMessageEvent::new(message("m1", "c1", "store-a-owner", 30));
    store.apply_incoming_message_event(&event, None).await.unwrap();
    store.apply_incoming_message_event(&event, None).await.unwrap();

    let state = store.snapshot().await;
    assert_eq!(state.conversations[0].unread_count_for_user, 1);
    assert_eq!(state.unread_total, 1);
}

#[tokio::test]
async fn test_echo_of_local_send_is_not_counted() {
    let (_api, store) = fixture();
    store.load_conversations().await.unwrap();

    let sent = message("m5", "c1", "shopper", 60);
    store.apply_local_send(&sent).await;
    store
        .apply_incoming_message_event(&NewMessageEvent::new(sent), None)
        .await
        .unwrap();

    let c1 = store.find(&"c1".into()).await.unwrap();
    assert_eq!(c1.unread_count_for_store, 0);
    assert_eq!(c1.unread_count_for_user, 0);
}

#[tokio::test]
async fn test_incoming_message_for_open_conversation_stays_read() {
    let (_api, store) = fixture();
    store.load_conversations().await.unwrap();

    let event = NewMessageEvent::new(message("m1", "c1", "store-a-owner", 30));
    store
        .apply_incoming_message_event(&event, Some(&"c1".into()))
        .await
        .unwrap();

    let state = store.snapshot().await;
    assert_eq!(state.conversations[0].unread_count_for_user, 0);
    assert_eq!(state.unread_total, 0);
    assert_eq!(state.conversations[0].last_message_at, Some(at(30)));
}

#[tokio::test]
async fn test_own_message_counts_for_the_other_party_only() {
    let (_api, store) = fixture();
    store.load_conversations().await.unwrap();

    let event = NewMessageEvent::new(message("m1", "c1", "shopper", 30));
    store.apply_incoming_message_event(&event, None).await.unwrap();

    let state = store.snapshot().await;
    let c1 = state.conversations.iter().find(|c| c.id.as_str() == "c1").unwrap();
    assert_eq!(c1.unread_count_for_store, 1);
    assert_eq!(c1.unread_count_for_user, 0);
    assert_eq!(state.unread_total, 0);
}

#[tokio::test]
async fn test_store_viewer_badge_follows_store_counter() {
    let (api, _) = fixture();
    let store = ConversationStore::new(api, ViewerRole::Store);
    store.load_conversations().await.unwrap();

    let event = NewMessageEvent::new(message("m1", "c2", "shopper", 40));
    store.apply_incoming_message_event(&event, None).await.unwrap();

    assert_eq!(store.snapshot().await.unread_total, 1);
}

#[tokio::test]
async fn test_unknown_conversation_triggers_refresh() {
    let (api, store) = fixture();
    store.load_conversations().await.unwrap();
    assert_eq!(api.calls(LIST_CONVERSATIONS), 1);

    let mut fresh = with_last(conversation("c9", "shopper", "store-new"), 50);
    fresh.unread_count_for_user = 1;
    api.set_conversations(vec![fresh]);

    let event = NewMessageEvent::new(message("m9", "c9", "store-new-owner", 50));
    store.apply_incoming_message_event(&event, None).await.unwrap();

    assert_eq!(api.calls(LIST_CONVERSATIONS), 2);
    assert!(store.find(&"c9".into()).await.is_some());
}

#[tokio::test]
async fn test_apply_read_clears_counter_and_badge() {
    let (api, store) = fixture();
    let mut unread = with_last(conversation("c1", "shopper", "store-a"), 10);
    unread.unread_count_for_user = 3;
    api.set_conversations(vec![unread]);
    api.set_unread(5);

    store.load_conversations().await.unwrap();
    assert_eq!(store.load_unread_count().await.unwrap(), 5);

    store.apply_read(&"c1".into()).await;

    let state = store.snapshot().await;
    assert_eq!(state.conversations[0].unread_count_for_user, 0);
    assert_eq!(state.unread_total, 2);

    // 再次已读不会让角标继续下降
    store.apply_read(&"c1".into()).await;
    assert_eq!(store.snapshot().await.unread_total, 2);
}

#[tokio::test]
async fn test_upsert_replaces_existing_entry() {
    let (_api, store) = fixture();
    store.load_conversations().await.unwrap();

    store
        .upsert(with_last(conversation("c1", "shopper", "store-a"), 99))
        .await;
    store
        .upsert(conversation("c7", "shopper", "store-g"))
        .await;

    let state = store.snapshot().await;
    assert_eq!(ids(&state.conversations), vec!["c1", "c2", "c7"]);
}

#[tokio::test]
async fn test_local_send_updates_preview_without_unread() {
    let (_api, store) = fixture();
    store.load_conversations().await.unwrap();

    store.apply_local_send(&message("m5", "c1", "shopper", 60)).await;

    let state = store.snapshot().await;
    assert_eq!(state.conversations[0].id.as_str(), "c1");
    assert_eq!(state.conversations[0].unread_count_for_store, 0);
    assert_eq!(state.unread_total, 0);
}

#[tokio::test]
async fn test_unread_count_failure_is_recorded() {
    let mut api = MockChatApi::new();
    api.expect_unread_count()
        .times(1)
        .returning(|| Err(ApplicationError::network("timeout")));
    let store = ConversationStore::new(Arc::new(api), ViewerRole::User);

    let err = store.load_unread_count().await.unwrap_err();

    assert_eq!(err, ApplicationError::network("timeout"));
    let state = store.snapshot().await;
    assert_eq!(state.unread_total, 0);
    assert!(state.error.is_some());
}
