//! REST backend HTTP client
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic; callers run it on
//! blocking worker threads.

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use ureq::http::Response;
use ureq::{Agent, Body};
use url::Url;

use super::multipart::MultipartForm;
use super::normalize::{
    message_from_request, normalize_conversation, normalize_group, normalize_identity,
    normalize_message,
};
use super::wire::{
    ConversationsResponse, ErrorBody, GroupsResponse, LoginResponse, MessagesResponse,
    SendResponse,
};
use super::{ChatBackend, SendRequest};
use crate::config::ChatConfig;
use crate::error::ServerRejected;
use crate::models::{
    Attachment, ConversationRef, ConversationTarget, Identity, Message, MessageId,
};

/// Client for the White Beat REST API
pub struct HttpBackend {
    agent: Agent,
    base_url: Url,
}

impl HttpBackend {
    /// Create a client for the API rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid API URL: {base_url}"))?;
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        Ok(Self {
            agent: Agent::new_with_config(config),
            base_url,
        })
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        Self::new(&config.api_url, config.request_timeout())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut request = self.agent.get(&self.endpoint(path));
        for (key, value) in query {
            request = request.query(*key, *value);
        }

        let response = request
            .call()
            .with_context(|| format!("Failed to send {path} request"))?;
        let mut response = check_status(response, path)?;

        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse {path} response"))
    }

    fn post_json(&self, path: &str, payload: &Value) -> Result<Response<Body>> {
        let response = self
            .agent
            .post(&self.endpoint(path))
            .send_json(payload)
            .with_context(|| format!("Failed to send {path} request"))?;
        check_status(response, path)
    }

    fn read_created(&self, mut response: Response<Body>, request: &SendRequest) -> Result<Message> {
        let created: SendResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse send-message response")?;
        let conversation_id = request.target.conversation_id();

        Ok(match created {
            SendResponse::Wrapped { message } | SendResponse::Bare(message) => {
                normalize_message(message, &conversation_id, &request.sender)
            }
            SendResponse::IdOnly { message_id } => {
                message_from_request(MessageId::new(message_id.to_string()), request)
            }
        })
    }
}

impl ChatBackend for HttpBackend {
    fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let mut response = self.post_json(
            "login",
            &json!({ "username": username, "password": password }),
        )?;
        let login: LoginResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse login response")?;
        normalize_identity(login)
    }

    fn list_conversations(&self, username: &str) -> Result<Vec<ConversationRef>> {
        let direct: ConversationsResponse =
            self.get_json("conversations", &[("username", username)])?;
        let groups: GroupsResponse = self.get_json("groups", &[("username", username)])?;

        let mut list: Vec<ConversationRef> = direct
            .conversations
            .into_iter()
            .filter_map(normalize_conversation)
            .collect();
        list.extend(groups.groups.into_iter().map(normalize_group));
        Ok(list)
    }

    fn fetch_messages(&self, username: &str, target: &ConversationTarget) -> Result<Vec<Message>> {
        let response: MessagesResponse = match target {
            ConversationTarget::Direct(peer) => self.get_json(
                "messages",
                &[("username", username), ("other_username", peer)],
            )?,
            ConversationTarget::Group(group_id) => {
                self.get_json("group-messages", &[("group_id", group_id)])?
            }
        };

        let conversation_id = target.conversation_id();
        Ok(response
            .messages
            .into_iter()
            .map(|m| normalize_message(m, &conversation_id, username))
            .collect())
    }

    fn send_message(&self, request: &SendRequest) -> Result<Message> {
        let mut payload = json!({
            "sender": request.sender,
            "content": request.content,
            "message_type": request.kind.as_str(),
        });
        match &request.target {
            ConversationTarget::Direct(peer) => payload["receiver"] = json!(peer),
            ConversationTarget::Group(group_id) => payload["group_id"] = id_value(group_id),
        }
        if let Some(reply_to) = &request.reply_to {
            payload["reply_to"] = id_value(reply_to.as_str());
        }

        let response = self.post_json("send-message", &payload)?;
        self.read_created(response, request)
    }

    fn upload_media(&self, request: &SendRequest, attachment: &Attachment) -> Result<Message> {
        let mut form = MultipartForm::new()
            .text("sender", &request.sender)
            .text("message_type", attachment.kind.as_str());
        form = match &request.target {
            ConversationTarget::Direct(peer) => form.text("receiver", peer),
            ConversationTarget::Group(group_id) => form.text("group_id", group_id),
        };
        let (content_type, body) = form
            .file(
                "file",
                &attachment.file_name,
                &attachment.mime_type,
                &attachment.bytes,
            )
            .finish();

        let response = self
            .agent
            .post(&self.endpoint("send-message"))
            .header("Content-Type", &content_type)
            .send(body.as_slice())
            .context("Failed to send media upload request")?;
        let response = check_status(response, "send-message")?;
        self.read_created(response, request)
    }

    fn edit_message(&self, id: &MessageId, username: &str, new_content: &str) -> Result<()> {
        self.post_json(
            "edit-message",
            &json!({
                "message_id": id_value(id.as_str()),
                "username": username,
                "new_content": new_content,
            }),
        )?;
        Ok(())
    }

    fn delete_message(&self, id: &MessageId, username: &str, for_everyone: bool) -> Result<()> {
        self.post_json(
            "delete-message",
            &json!({
                "message_id": id_value(id.as_str()),
                "username": username,
                "delete_for_everyone": for_everyone,
            }),
        )?;
        Ok(())
    }

    fn react_message(&self, id: &MessageId, username: &str, kind: &str) -> Result<()> {
        self.post_json(
            "react-message",
            &json!({
                "message_id": id_value(id.as_str()),
                "username": username,
                "reaction_type": kind,
            }),
        )?;
        Ok(())
    }

    fn forward_message(&self, id: &MessageId, sender: &str, recipients: &[String]) -> Result<()> {
        self.post_json(
            "forward-message",
            &json!({
                "message_id": id_value(id.as_str()),
                "sender": sender,
                "recipients": recipients,
            }),
        )?;
        Ok(())
    }

    fn mark_read(&self, username: &str, peer: &str) -> Result<()> {
        self.post_json(
            "mark-read",
            &json!({ "username": username, "other_username": peer }),
        )?;
        Ok(())
    }
}

/// Numeric ids go over the wire as numbers
fn id_value(id: &str) -> Value {
    match id.parse::<i64>() {
        Ok(n) => json!(n),
        Err(_) => json!(id),
    }
}

/// Turn non-2xx responses into errors
///
/// 4xx is an authoritative rejection carrying the server's reason; 5xx is
/// treated like any other transient failure.
fn check_status(mut response: Response<Body>, what: &str) -> Result<Response<Body>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.body_mut().read_to_string().unwrap_or_default();
    let reason = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(ErrorBody::reason)
        .unwrap_or_else(|| {
            let text = text.trim();
            if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text.to_string()
            }
        });

    if status.is_client_error() {
        Err(ServerRejected {
            status: status.as_u16(),
            message: reason,
        }
        .into())
    } else {
        Err(anyhow!("{what} failed with status {}: {reason}", status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash() {
        let backend = HttpBackend::new("http://localhost:8000/api", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.endpoint("send-message"),
            "http://localhost:8000/api/send-message/"
        );

        let backend = HttpBackend::new("http://localhost:8000/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.endpoint("messages"),
            "http://localhost:8000/api/messages/"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpBackend::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_id_value() {
        assert_eq!(id_value("42"), json!(42));
        assert_eq!(id_value("abc"), json!("abc"));
    }

    #[test]
    fn test_unreachable_server_is_not_a_rejection() {
        let backend = HttpBackend::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = backend.mark_read("alice", "bob").unwrap_err();
        assert!(err.downcast_ref::<ServerRejected>().is_none());
    }
}
