//! Sample data for `--demo`

use chat::{ConversationTarget, InMemoryBackend};
use log::warn;

/// An in-process server with a few users, a group and some history
///
/// Every demo user's password is `demo`.
pub fn backend() -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    backend.add_user("alice", "demo", "Alice Liddell");
    backend.add_user("bob", "demo", "Bob Builder");
    backend.add_user("carol", "demo", "Carol Danvers");
    backend.set_online("carol", false);
    backend.add_group("1", "Weekend plans", &["alice", "bob", "carol"]);

    let history = [
        ("bob", ConversationTarget::Direct("alice".to_string()), "Hey, are you around?"),
        ("alice", ConversationTarget::Direct("bob".to_string()), "Yes! What's up?"),
        ("bob", ConversationTarget::Direct("alice".to_string()), "Lunch at noon?"),
        ("carol", ConversationTarget::Group("1".to_string()), "Hiking on Saturday?"),
        ("bob", ConversationTarget::Group("1".to_string()), "I'm in"),
    ];
    for (sender, target, content) in history {
        if let Err(err) = backend.deliver(sender, &target, content) {
            warn!("Failed to seed demo message: {err:#}");
        }
    }
    backend
}
