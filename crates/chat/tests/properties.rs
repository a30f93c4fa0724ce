//! Property-based tests for chat state.
//!
//! Invariants that must hold under arbitrary command sequences and
//! arbitrary completion orders.

use chat::{
    ChatBackend, ChatState, CommandError, ConversationRef, ConversationTarget, Identity,
    InMemoryBackend, MessageId, PollOutcome,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Select(usize),
    Draft(String),
    Reply(usize),
    Edit(usize),
    Forward(usize),
    Cancel,
}

fn conversations() -> Vec<ConversationRef> {
    vec![
        ConversationRef::direct("bob", "Bob"),
        ConversationRef::direct("carol", "Carol"),
        ConversationRef::group("7", "Team", 3),
    ]
}

/// Generate random composer steps, weighted towards non-idle modes.
fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => (0usize..3).prop_map(Step::Select),
        2 => "[a-z ]{0,12}".prop_map(Step::Draft),
        2 => (0usize..4).prop_map(Step::Reply),
        2 => (0usize..4).prop_map(Step::Edit),
        2 => (0usize..4).prop_map(Step::Forward),
        1 => Just(Step::Cancel),
    ]
}

/// Backend with a few messages in every conversation, half of them alice's.
fn seeded_backend() -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    for user in ["alice", "bob", "carol"] {
        backend.add_user(user, "pw", user);
    }
    backend.add_group("7", "Team", &["alice", "bob", "carol"]);

    let seed = [
        ("bob", ConversationTarget::Direct("alice".to_string())),
        ("carol", ConversationTarget::Direct("alice".to_string())),
        ("bob", ConversationTarget::Group("7".to_string())),
    ];
    for (other, target) in seed {
        let from_alice = match &target {
            ConversationTarget::Direct(_) => ConversationTarget::Direct(other.to_string()),
            group => group.clone(),
        };
        for i in 0..2 {
            backend.deliver(other, &target, &format!("{other} {i}")).unwrap();
            backend.deliver("alice", &from_alice, &format!("alice {i}")).unwrap();
        }
    }
    backend
}

fn load_active(state: &mut ChatState, backend: &InMemoryBackend) {
    let ticket = state.begin_poll().unwrap();
    let snapshot = backend
        .fetch_messages(&ticket.username, &ticket.target)
        .map_err(CommandError::from_backend);
    state.complete_poll(&ticket, snapshot);
}

fn nth_id(state: &ChatState, n: usize) -> Option<MessageId> {
    state.messages().get(n).map(|m| m.id.clone())
}

proptest! {
    /// The composer is Idle right after every selection, whatever it was doing.
    #[test]
    fn prop_selection_resets_composer(steps in prop::collection::vec(step_strategy(), 0..40)) {
        let backend = seeded_backend();
        let list = conversations();
        let mut state = ChatState::default();
        state.sign_in(Identity::new("alice", "Alice"));

        for step in steps {
            match step.clone() {
                Step::Select(i) => {
                    state.select_conversation(list[i].clone());
                    let composer = state.composer();
                    prop_assert!(composer.is_some());
                    prop_assert!(composer.unwrap().is_idle(), "not idle after {:?}", step);
                    prop_assert_eq!(composer.unwrap().draft(), "");
                    load_active(&mut state, &backend);
                }
                Step::Draft(text) => {
                    let _ = state.set_draft(&text);
                }
                Step::Reply(n) => {
                    if let Some(id) = nth_id(&state, n) {
                        let _ = state.start_reply(&id);
                    }
                }
                Step::Edit(n) => {
                    if let Some(id) = nth_id(&state, n) {
                        let _ = state.start_edit(&id);
                    }
                }
                Step::Forward(n) => {
                    if let Some(id) = nth_id(&state, n) {
                        let _ = state.toggle_forward(&id);
                    }
                }
                Step::Cancel => state.cancel_compose(),
            }
        }
    }

    /// Snapshots completing in any order never move the cursor backwards,
    /// and only the newest request's snapshot ends up applied.
    #[test]
    fn prop_cursor_is_monotonic(order in Just((0usize..6).collect::<Vec<_>>()).prop_shuffle()) {
        let backend = seeded_backend();
        let mut state = ChatState::new(6, chrono::Duration::seconds(1));
        state.sign_in(Identity::new("alice", "Alice"));
        state.select_conversation(ConversationRef::direct("bob", "Bob"));
        let target = ConversationTarget::Direct("alice".to_string());

        let mut pending = Vec::new();
        for i in 0..6 {
            let ticket = state.begin_poll().unwrap();
            let snapshot = backend.fetch_messages("alice", &ticket.target).unwrap();
            pending.push((ticket, snapshot));
            backend.deliver("bob", &target, &format!("late {i}")).unwrap();
        }
        let newest_len = pending[5].1.len();

        let mut last_applied = 0;
        for idx in order {
            let (ticket, snapshot) = &pending[idx];
            let outcome = state.complete_poll(ticket, Ok(snapshot.clone()));
            let applied = state.engine().cursor().unwrap().applied_seq;

            prop_assert!(applied >= last_applied);
            match outcome {
                PollOutcome::Applied(_) => prop_assert_eq!(applied, ticket.seq),
                other => prop_assert_eq!(other, PollOutcome::Stale),
            }
            last_applied = applied;
        }

        prop_assert_eq!(state.messages().len(), newest_len);
    }
}

#[test]
fn test_seeded_backend_has_history_everywhere() {
    let backend = seeded_backend();
    for target in conversations().iter().map(ConversationRef::target) {
        assert_eq!(backend.snapshot("alice", &target).len(), 4);
    }
}
