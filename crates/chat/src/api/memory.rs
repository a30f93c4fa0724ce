//! In-memory backend
//!
//! A scriptable stand-in for the REST server. It enforces the same rules
//! the server does (ownership, membership, reply targets) and lets tests
//! inject failures and count calls.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use super::{ChatBackend, SendRequest};
use crate::error::ServerRejected;
use crate::models::{
    Attachment, ConversationId, ConversationRef, ConversationTarget, Identity, Message, MessageId,
    MessageKind, Reaction, ReplyPreview,
};

struct UserRecord {
    password: String,
    full_name: String,
    is_admin: bool,
    online: bool,
}

struct GroupRecord {
    name: String,
    members: BTreeSet<String>,
}

/// Where a stored message lives
#[derive(Debug, Clone, PartialEq, Eq)]
enum Thread {
    /// Usernames in sorted order
    Direct(String, String),
    Group(String),
}

impl Thread {
    fn between(a: &str, b: &str) -> Self {
        if a <= b {
            Self::Direct(a.to_string(), b.to_string())
        } else {
            Self::Direct(b.to_string(), a.to_string())
        }
    }

    fn peer_of(&self, user: &str) -> Option<&str> {
        match self {
            Self::Direct(a, b) if a == user => Some(b.as_str()),
            Self::Direct(a, b) if b == user => Some(a.as_str()),
            _ => None,
        }
    }
}

struct StoredMessage {
    id: u64,
    thread: Thread,
    sender: String,
    content: String,
    kind: MessageKind,
    media_url: Option<String>,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    hidden_for: HashSet<String>,
    deleted_for_everyone: bool,
    reply_to: Option<u64>,
    reactions: Vec<Reaction>,
    read_by: HashSet<String>,
}

#[derive(Default)]
struct ServerState {
    users: HashMap<String, UserRecord>,
    groups: HashMap<String, GroupRecord>,
    messages: Vec<StoredMessage>,
    next_id: u64,
    last_created_at: Option<DateTime<Utc>>,
    offline: bool,
    unreachable_recipients: HashSet<String>,
    reject_next: Option<ServerRejected>,
    calls: Vec<String>,
}

impl ServerState {
    /// Strictly increasing creation times so ordering is deterministic
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_created_at {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_created_at = Some(at);
        at
    }

    fn find(&self, id: &MessageId) -> Result<usize> {
        let numeric = id.as_str().parse::<u64>().ok();
        self.messages
            .iter()
            .position(|m| Some(m.id) == numeric)
            .ok_or_else(|| rejected(404, "Message not found"))
    }

    fn thread_for(&self, sender: &str, target: &ConversationTarget) -> Result<Thread> {
        match target {
            ConversationTarget::Direct(peer) => {
                if !self.users.contains_key(peer) {
                    return Err(rejected(404, "Receiver not found"));
                }
                Ok(Thread::between(sender, peer))
            }
            ConversationTarget::Group(group_id) => {
                let group = self
                    .groups
                    .get(group_id)
                    .ok_or_else(|| rejected(404, "Group not found"))?;
                if !group.members.contains(sender) {
                    return Err(rejected(403, "You are not a member of this group"));
                }
                Ok(Thread::Group(group_id.clone()))
            }
        }
    }

    fn insert(
        &mut self,
        sender: &str,
        thread: Thread,
        content: &str,
        kind: MessageKind,
        media_url: Option<String>,
        reply_to: Option<u64>,
    ) -> usize {
        self.next_id += 1;
        let created_at = self.next_timestamp();
        self.messages.push(StoredMessage {
            id: self.next_id,
            thread,
            sender: sender.to_string(),
            content: content.to_string(),
            kind,
            media_url,
            created_at,
            edited_at: None,
            hidden_for: HashSet::new(),
            deleted_for_everyone: false,
            reply_to,
            reactions: Vec::new(),
            read_by: HashSet::new(),
        });
        self.messages.len() - 1
    }

    fn create(&mut self, request: &SendRequest, media_url: Option<String>, kind: MessageKind) -> Result<Message> {
        if !self.users.contains_key(&request.sender) {
            return Err(rejected(404, "Sender not found"));
        }
        let thread = self.thread_for(&request.sender, &request.target)?;
        let reply_to = match &request.reply_to {
            Some(id) => {
                let idx = self.find(id)?;
                if self.messages[idx].thread != thread {
                    return Err(rejected(400, "Reply target is in another conversation"));
                }
                Some(self.messages[idx].id)
            }
            None => None,
        };

        let idx = self.insert(
            &request.sender,
            thread,
            &request.content,
            kind,
            media_url,
            reply_to,
        );
        Ok(self.render(idx, &request.target.conversation_id(), &request.sender))
    }

    /// The message as `viewer` sees it
    fn render(&self, idx: usize, conversation_id: &ConversationId, viewer: &str) -> Message {
        let stored = &self.messages[idx];
        let is_mine = stored.sender == viewer;
        let is_read = if is_mine {
            stored.read_by.iter().any(|u| u != viewer)
        } else {
            stored.read_by.contains(viewer)
        };
        let reply_preview = stored
            .reply_to
            .and_then(|id| self.messages.iter().find(|m| m.id == id))
            .map(|m| ReplyPreview {
                sender: m.sender.clone(),
                content: if m.deleted_for_everyone {
                    String::new()
                } else {
                    m.content.clone()
                },
            });

        Message::builder(MessageId::new(stored.id.to_string()), conversation_id.clone())
            .sender(stored.sender.clone())
            .content(if stored.deleted_for_everyone {
                String::new()
            } else {
                stored.content.clone()
            })
            .kind(stored.kind)
            .media_url(stored.media_url.clone())
            .created_at(stored.created_at)
            .edited_at(stored.edited_at)
            .deleted(stored.deleted_for_everyone, stored.deleted_for_everyone)
            .reply_to(stored.reply_to.map(|id| MessageId::new(id.to_string())))
            .reply_preview(reply_preview)
            .reactions(stored.reactions.clone())
            .mine(is_mine)
            .read(is_read)
            .build()
    }

    fn summary(&self, thread: &Thread, viewer: &str) -> (String, Option<DateTime<Utc>>, u32) {
        let visible: Vec<&StoredMessage> = self
            .messages
            .iter()
            .filter(|m| &m.thread == thread && !m.hidden_for.contains(viewer))
            .collect();
        let last = visible.last();
        let unread = visible
            .iter()
            .filter(|m| m.sender != viewer && !m.read_by.contains(viewer))
            .count() as u32;
        (
            last.map(|m| m.content.clone()).unwrap_or_default(),
            last.map(|m| m.created_at),
            unread,
        )
    }
}

fn rejected(status: u16, message: &str) -> anyhow::Error {
    ServerRejected {
        status,
        message: message.to_string(),
    }
    .into()
}

/// Scriptable in-memory implementation of [`ChatBackend`]
pub struct InMemoryBackend {
    state: RwLock<ServerState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ServerState::default()),
        }
    }

    fn state(&self) -> RwLockWriteGuard<'_, ServerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and apply scripted failures
    fn enter(&self, endpoint: &str, mutating: bool) -> Result<RwLockWriteGuard<'_, ServerState>> {
        let mut state = self.state();
        state.calls.push(endpoint.to_string());
        if state.offline {
            return Err(anyhow!("{endpoint}: connection refused"));
        }
        if mutating && let Some(rejection) = state.reject_next.take() {
            return Err(rejection.into());
        }
        Ok(state)
    }

    pub fn add_user(&self, username: &str, password: &str, full_name: &str) {
        self.state().users.insert(
            username.to_string(),
            UserRecord {
                password: password.to_string(),
                full_name: full_name.to_string(),
                is_admin: false,
                online: true,
            },
        );
    }

    pub fn set_online(&self, username: &str, online: bool) {
        if let Some(user) = self.state().users.get_mut(username) {
            user.online = online;
        }
    }

    pub fn add_group(&self, group_id: &str, name: &str, members: &[&str]) {
        self.state().groups.insert(
            group_id.to_string(),
            GroupRecord {
                name: name.to_string(),
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
    }

    /// Make every call fail as if the server were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Fail sends and forwards addressed to `username` with a transport error
    pub fn fail_deliveries_to(&self, username: &str) {
        self.state()
            .unreachable_recipients
            .insert(username.to_string());
    }

    /// Reject the next mutating call with the given status and message
    pub fn reject_next(&self, status: u16, message: &str) {
        self.state().reject_next = Some(ServerRejected {
            status,
            message: message.to_string(),
        });
    }

    /// Endpoints called so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Store a message as if another client had sent it
    pub fn deliver(&self, sender: &str, target: &ConversationTarget, content: &str) -> Result<MessageId> {
        let mut state = self.state();
        let thread = state.thread_for(sender, target)?;
        let idx = state.insert(sender, thread, content, MessageKind::Text, None, None);
        Ok(MessageId::new(state.messages[idx].id.to_string()))
    }

    /// Everything `viewer` would fetch from `target`, bypassing the call log
    pub fn snapshot(&self, viewer: &str, target: &ConversationTarget) -> Vec<Message> {
        let state = self.state();
        let Ok(thread) = state.thread_for(viewer, target) else {
            return Vec::new();
        };
        let conversation_id = target.conversation_id();
        (0..state.messages.len())
            .filter(|&i| state.messages[i].thread == thread)
            .filter(|&i| !state.messages[i].hidden_for.contains(viewer))
            .map(|i| state.render(i, &conversation_id, viewer))
            .collect()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatBackend for InMemoryBackend {
    fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let state = self.enter("login", false)?;
        match state.users.get(username) {
            Some(user) if user.password == password => Ok(Identity {
                username: username.to_string(),
                display_name: user.full_name.clone(),
                is_admin: user.is_admin,
            }),
            _ => Err(rejected(401, "Invalid username or password")),
        }
    }

    fn list_conversations(&self, username: &str) -> Result<Vec<ConversationRef>> {
        let state = self.enter("conversations", false)?;

        let peers: BTreeSet<&str> = state
            .messages
            .iter()
            .filter_map(|m| m.thread.peer_of(username))
            .collect();

        let mut list = Vec::new();
        for peer in peers {
            let Some(user) = state.users.get(peer) else {
                continue;
            };
            let thread = Thread::between(username, peer);
            let (preview, last_at, unread) = state.summary(&thread, username);
            let mut conv = ConversationRef::direct(peer, user.full_name.clone());
            conv.is_online = Some(user.online);
            conv.unread_count = unread;
            conv.last_message_preview = preview;
            conv.updated_at = last_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            list.push(conv);
        }

        let mut group_ids: Vec<&String> = state
            .groups
            .iter()
            .filter(|(_, g)| g.members.contains(username))
            .map(|(id, _)| id)
            .collect();
        group_ids.sort();
        for group_id in group_ids {
            let group = &state.groups[group_id];
            let (preview, last_at, unread) =
                state.summary(&Thread::Group(group_id.clone()), username);
            let mut conv =
                ConversationRef::group(group_id.clone(), group.name.clone(), group.members.len() as u32);
            conv.unread_count = unread;
            conv.last_message_preview = preview;
            conv.updated_at = last_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            list.push(conv);
        }

        Ok(list)
    }

    fn fetch_messages(&self, username: &str, target: &ConversationTarget) -> Result<Vec<Message>> {
        let endpoint = match target {
            ConversationTarget::Direct(_) => "messages",
            ConversationTarget::Group(_) => "group-messages",
        };
        let state = self.enter(endpoint, false)?;
        let thread = state.thread_for(username, target)?;
        let conversation_id = target.conversation_id();

        Ok((0..state.messages.len())
            .filter(|&i| state.messages[i].thread == thread)
            .filter(|&i| !state.messages[i].hidden_for.contains(username))
            .map(|i| state.render(i, &conversation_id, username))
            .collect())
    }

    fn send_message(&self, request: &SendRequest) -> Result<Message> {
        let mut state = self.enter("send-message", true)?;
        if let ConversationTarget::Direct(peer) = &request.target
            && state.unreachable_recipients.contains(peer)
        {
            return Err(anyhow!("send-message: connection reset"));
        }
        if request.content.trim().is_empty() {
            return Err(rejected(400, "Message content is required"));
        }
        state.create(request, None, request.kind)
    }

    fn upload_media(&self, request: &SendRequest, attachment: &Attachment) -> Result<Message> {
        let mut state = self.enter("send-message", true)?;
        if attachment.bytes.is_empty() {
            return Err(rejected(400, "No file uploaded"));
        }
        let media_url = format!("/media/chat/{}/{}", state.next_id + 1, attachment.file_name);
        state.create(request, Some(media_url), attachment.kind)
    }

    fn edit_message(&self, id: &MessageId, username: &str, new_content: &str) -> Result<()> {
        let mut state = self.enter("edit-message", true)?;
        let idx = state.find(id)?;
        if state.messages[idx].sender != username {
            return Err(rejected(403, "You can only edit your own messages"));
        }
        if state.messages[idx].deleted_for_everyone {
            return Err(rejected(400, "Cannot edit a deleted message"));
        }
        let at = state.next_timestamp();
        let stored = &mut state.messages[idx];
        stored.content = new_content.to_string();
        stored.edited_at = Some(at);
        Ok(())
    }

    fn delete_message(&self, id: &MessageId, username: &str, for_everyone: bool) -> Result<()> {
        let mut state = self.enter("delete-message", true)?;
        let idx = state.find(id)?;
        let stored = &mut state.messages[idx];
        if for_everyone {
            if stored.sender != username {
                return Err(rejected(403, "You can only delete your own messages for everyone"));
            }
            stored.deleted_for_everyone = true;
        } else {
            stored.hidden_for.insert(username.to_string());
        }
        Ok(())
    }

    fn react_message(&self, id: &MessageId, username: &str, kind: &str) -> Result<()> {
        let mut state = self.enter("react-message", true)?;
        let idx = state.find(id)?;
        let stored = &mut state.messages[idx];
        let previous = stored
            .reactions
            .iter()
            .find(|r| r.user == username)
            .map(|r| r.kind.clone());
        stored.reactions.retain(|r| r.user != username);
        if previous.as_deref() != Some(kind) {
            stored.reactions.push(Reaction {
                user: username.to_string(),
                kind: kind.to_string(),
            });
        }
        Ok(())
    }

    fn forward_message(&self, id: &MessageId, sender: &str, recipients: &[String]) -> Result<()> {
        let mut state = self.enter("forward-message", true)?;
        let idx = state.find(id)?;
        if state.messages[idx].deleted_for_everyone {
            return Err(rejected(400, "Cannot forward a deleted message"));
        }
        if let Some(down) = recipients
            .iter()
            .find(|r| state.unreachable_recipients.contains(*r))
        {
            return Err(anyhow!("forward-message to {down}: connection reset"));
        }
        if let Some(missing) = recipients.iter().find(|r| !state.users.contains_key(*r)) {
            return Err(rejected(404, &format!("User {missing} not found")));
        }

        let (content, kind, media_url) = {
            let original = &state.messages[idx];
            (original.content.clone(), original.kind, original.media_url.clone())
        };
        for recipient in recipients {
            state.insert(
                sender,
                Thread::between(sender, recipient),
                &content,
                kind,
                media_url.clone(),
                None,
            );
        }
        Ok(())
    }

    fn mark_read(&self, username: &str, peer: &str) -> Result<()> {
        let mut state = self.enter("mark-read", false)?;
        let thread = Thread::between(username, peer);
        for stored in state
            .messages
            .iter_mut()
            .filter(|m| m.thread == thread && m.sender == peer)
        {
            stored.read_by.insert(username.to_string());
        }
        Ok(())
    }
}
