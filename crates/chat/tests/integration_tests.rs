//! Integration tests for the chat crate
//!
//! These tests drive the full flow from commands through the in-memory
//! backend and back into local state.

use std::sync::{Arc, Mutex};

use chat::{
    ActionHandler, Attachment, ChatBackend, ChatState, CommandError, ComposeMode, ConversationRef,
    ConversationTarget, Delivery, InMemoryBackend, MessageId, MessageKind, PollOutcome,
    ValidationError,
};

/// Helper to create a backend with a few users and one group
fn make_backend() -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.add_user("alice", "pw", "Alice");
    backend.add_user("bob", "pw", "Bob");
    backend.add_user("userX", "pw", "User X");
    backend.add_user("userY", "pw", "User Y");
    backend.add_group("7", "Team", &["alice", "bob"]);
    backend
}

/// Helper to log alice in against `backend`
fn make_handler(backend: &Arc<InMemoryBackend>) -> ActionHandler {
    let state = Arc::new(Mutex::new(ChatState::default()));
    let handler = ActionHandler::new(backend.clone(), state);
    handler.login("alice", "pw").unwrap();
    handler
}

fn bob() -> ConversationRef {
    ConversationRef::direct("bob", "Bob")
}

fn team() -> ConversationRef {
    ConversationRef::group("7", "Team", 2)
}

fn to_alice() -> ConversationTarget {
    ConversationTarget::Direct("alice".to_string())
}

fn contents(handler: &ActionHandler) -> Vec<String> {
    handler
        .state()
        .lock()
        .unwrap()
        .messages()
        .iter()
        .map(|m| m.content.clone())
        .collect()
}

fn ids(handler: &ActionHandler) -> Vec<MessageId> {
    handler
        .state()
        .lock()
        .unwrap()
        .messages()
        .iter()
        .map(|m| m.id.clone())
        .collect()
}

#[test]
fn test_full_conversation_flow() {
    let backend = make_backend();
    backend.deliver("bob", &to_alice(), "hey alice").unwrap();
    let handler = make_handler(&backend);

    {
        let state = handler.state().lock().unwrap();
        assert_eq!(state.conversations().len(), 2);
        assert_eq!(state.conversations()[0].unread_count, 1);
    }

    assert!(handler.select(bob()));
    assert!(matches!(handler.poll(), Some(PollOutcome::Applied(_))));

    let first = ids(&handler)[0].clone();
    handler.send("hi bob", Some(&first)).unwrap();
    handler.poll();

    let state = handler.state().lock().unwrap();
    let messages = state.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "hi bob");
    assert_eq!(messages[1].reply_to_id.as_ref(), Some(&first));
    assert_eq!(messages[1].reply_preview.as_ref().unwrap().content, "hey alice");
    assert!(messages.iter().all(|m| m.delivery == Delivery::Confirmed));
}

#[test]
fn test_blank_send_is_rejected_without_network_call() {
    let backend = make_backend();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.poll();

    let before = backend.call_count();
    for text in ["", "   "] {
        let err = handler.send(text, None).unwrap_err();
        assert_eq!(err, CommandError::Validation(ValidationError::EmptyContent));
    }

    assert_eq!(backend.call_count(), before);
    assert!(handler.state().lock().unwrap().messages().is_empty());
}

#[test]
fn test_edit_of_foreign_message_is_rejected_locally() {
    let backend = make_backend();
    backend.deliver("bob", &to_alice(), "mine, not yours").unwrap();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.poll();

    let id = ids(&handler)[0].clone();
    let before = backend.call_count();
    let err = handler.edit(&id, "rewritten").unwrap_err();

    assert_eq!(err, CommandError::Validation(ValidationError::NotOwner(id)));
    assert_eq!(backend.call_count(), before);
    assert_eq!(contents(&handler), vec!["mine, not yours"]);
}

#[test]
fn test_delete_for_everyone_leaves_tombstone_in_place() {
    let backend = make_backend();
    let handler = make_handler(&backend);
    handler.select(bob());
    for text in ["one", "two", "three"] {
        handler.send(text, None).unwrap();
    }
    handler.poll();
    let before = ids(&handler);

    handler.delete(&before[1], true).unwrap();
    assert_eq!(ids(&handler), before);

    handler.poll();
    let state = handler.state().lock().unwrap();
    let after: Vec<MessageId> = state.messages().iter().map(|m| m.id.clone()).collect();
    assert_eq!(after, before);

    let deleted = &state.messages()[1];
    assert!(deleted.is_deleted);
    assert!(deleted.deleted_for_everyone);
    assert!(deleted.content.is_empty());
    assert!(!state.messages()[0].is_deleted);
    assert!(!state.messages()[2].is_deleted);
}

#[test]
fn test_switch_conversation_mid_send() {
    let backend = make_backend();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.poll();

    // Start the send, then switch before the backend answers
    let ticket = handler.state().lock().unwrap().begin_send("hello", None).unwrap();
    assert!(handler.select(team()));

    let confirmed = backend.send_message(&ticket.request).map_err(CommandError::from_backend);
    assert!(confirmed.is_ok());
    assert!(!handler.state().lock().unwrap().complete_send(&ticket, confirmed));

    assert!(contents(&handler).is_empty());
    handler.poll();
    assert!(contents(&handler).is_empty());

    // The message landed in A only
    handler.select(bob());
    handler.poll();
    assert_eq!(contents(&handler), vec!["hello"]);
}

#[test]
fn test_second_reaction_replaces_first() {
    let backend = make_backend();
    backend.deliver("bob", &to_alice(), "nice").unwrap();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.poll();
    let id = ids(&handler)[0].clone();

    handler.react(&id, "like").unwrap();
    handler.react(&id, "love").unwrap();
    handler.poll();

    let state = handler.state().lock().unwrap();
    let reactions = &state.message(&id).unwrap().reactions;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].user, "alice");
    assert_eq!(reactions[0].kind, "love");
}

#[test]
fn test_changes_made_offline_are_kept_and_retried() {
    let backend = make_backend();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.send("one", None).unwrap();
    handler.send("two", None).unwrap();
    backend.deliver("bob", &to_alice(), "nice").unwrap();
    handler.poll();
    let [one, two, nice] = <[MessageId; 3]>::try_from(ids(&handler)).unwrap();

    backend.set_offline(true);
    assert!(handler.edit(&one, "uno").unwrap_err().is_retryable());
    assert!(handler.delete(&two, true).unwrap_err().is_retryable());
    assert!(handler.react(&nice, "like").unwrap_err().is_retryable());
    assert!(matches!(handler.poll(), Some(PollOutcome::Failed)));

    let failed = {
        let state = handler.state().lock().unwrap();
        assert_eq!(state.message(&one).unwrap().content, "uno");
        assert!(state.message(&two).unwrap().is_deleted);
        assert_eq!(state.message(&nice).unwrap().reaction_of("alice"), Some("like"));
        for id in [&one, &two, &nice] {
            assert!(matches!(state.message(id).unwrap().delivery, Delivery::Failed(_)));
        }
        [&one, &two, &nice].map(|id| state.failed_op(id).unwrap())
    };

    backend.set_offline(false);
    for op_seq in failed {
        handler.retry_op(op_seq).unwrap();
    }
    handler.poll();

    let state = handler.state().lock().unwrap();
    assert_eq!(state.message(&one).unwrap().content, "uno");
    assert!(state.message(&one).unwrap().edited_at.is_some());
    assert!(state.message(&two).unwrap().deleted_for_everyone);
    assert_eq!(state.message(&nice).unwrap().reaction_of("alice"), Some("like"));
    for id in [&one, &two, &nice] {
        assert_eq!(state.message(id).unwrap().delivery, Delivery::Confirmed);
        assert_eq!(state.failed_op(id), None);
    }
}

#[test]
fn test_rejected_delete_rolls_back() {
    let backend = make_backend();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.send("keep me", None).unwrap();
    handler.poll();
    let id = ids(&handler)[0].clone();

    backend.reject_next(403, "Not allowed");
    let err = handler.delete(&id, true).unwrap_err();
    assert!(!err.is_retryable());

    let state = handler.state().lock().unwrap();
    let message = state.message(&id).unwrap();
    assert!(!message.is_deleted);
    assert_eq!(message.content, "keep me");
    assert_eq!(state.failed_op(&id), None);
}

#[test]
fn test_forward_reports_each_target() {
    let backend = make_backend();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.send("m1", None).unwrap();
    handler.send("m2", None).unwrap();
    handler.poll();
    let messages = ids(&handler);

    backend.fail_deliveries_to("userY");
    let report = handler
        .forward(&messages, &["userX".to_string(), "userY".to_string()])
        .unwrap();

    assert_eq!(report.outcome("userX"), Some(&Ok(())));
    assert!(matches!(
        report.outcome("userY"),
        Some(Err(CommandError::Network(_)))
    ));
    assert_eq!(report.succeeded(), vec!["userX"]);
    assert!(!report.all_succeeded());

    let at_x: Vec<String> = backend
        .snapshot("userX", &to_alice())
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(at_x, vec!["m1", "m2"]);
    assert!(backend.snapshot("userY", &to_alice()).is_empty());
}

#[test]
fn test_stale_snapshot_is_discarded() {
    let backend = make_backend();
    backend.deliver("bob", &to_alice(), "first").unwrap();
    let handler = make_handler(&backend);
    handler.select(bob());

    let mut state = handler.state().lock().unwrap();
    let older = state.begin_poll().unwrap();
    let older_snapshot = backend.fetch_messages("alice", &older.target).unwrap();

    backend.deliver("bob", &to_alice(), "second").unwrap();
    let newer = state.begin_poll().unwrap();
    let newer_snapshot = backend.fetch_messages("alice", &newer.target).unwrap();

    assert!(matches!(
        state.complete_poll(&newer, Ok(newer_snapshot)),
        PollOutcome::Applied(_)
    ));
    assert_eq!(state.complete_poll(&older, Ok(older_snapshot)), PollOutcome::Stale);

    let shown: Vec<&str> = state.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(shown, vec!["first", "second"]);
}

#[test]
fn test_selection_leaves_composer_idle() {
    let backend = make_backend();
    backend.deliver("bob", &to_alice(), "hello").unwrap();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.poll();
    let id = ids(&handler)[0].clone();

    {
        let mut state = handler.state().lock().unwrap();
        state.start_reply(&id).unwrap();
        state.set_draft("half-written").unwrap();
    }
    handler.select(team());
    {
        let state = handler.state().lock().unwrap();
        let composer = state.composer().unwrap();
        assert_eq!(composer.mode(), &ComposeMode::Idle);
        assert_eq!(composer.draft(), "");
    }

    handler.select(bob());
    handler.poll();
    handler.state().lock().unwrap().toggle_forward(&id).unwrap();
    assert!(!handler.select(bob()));
    assert!(handler.state().lock().unwrap().composer().unwrap().is_idle());
}

#[test]
fn test_upload_failure_and_retry() {
    let backend = make_backend();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.poll();

    backend.set_offline(true);
    let photo = Attachment::new("cat.png", MessageKind::Image, vec![1, 2, 3]);
    assert!(handler.upload_media(photo).unwrap_err().is_retryable());

    let local_id = {
        let state = handler.state().lock().unwrap();
        assert!(state.composer().unwrap().pending_attachment().is_some());
        let failed = &state.messages()[0];
        assert_eq!(failed.kind, MessageKind::Image);
        assert!(matches!(failed.delivery, Delivery::Failed(_)));
        failed.local_id.unwrap()
    };

    backend.set_offline(false);
    handler.retry_send(local_id).unwrap();
    handler.poll();

    let state = handler.state().lock().unwrap();
    assert!(state.composer().unwrap().pending_attachment().is_none());
    assert_eq!(state.messages().len(), 1);
    assert!(state.messages()[0].media_url.as_deref().unwrap().ends_with("cat.png"));
}

#[test]
fn test_logout_clears_everything() {
    let backend = make_backend();
    let handler = make_handler(&backend);
    handler.select(bob());
    handler.poll();

    assert_eq!(handler.logout().unwrap().username, "alice");
    let state = handler.state().lock().unwrap();
    assert!(state.identity().is_none());
    assert!(state.active_conversation().is_none());
    assert!(state.conversations().is_empty());
    assert!(state.composer().is_none());
}
