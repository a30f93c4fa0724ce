//! Media file staged for upload

use super::MessageKind;

/// A file the user picked for sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub kind: MessageKind,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, kind: MessageKind, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = guess_mime_type(&file_name, kind).to_string();
        Self {
            file_name,
            mime_type,
            kind,
            bytes,
        }
    }

    /// Reference shown in place of the durable URL until the server responds
    pub fn local_url(&self, local_id: super::LocalId) -> String {
        format!("local://{}/{}", local_id, self.file_name)
    }
}

fn guess_mime_type(file_name: &str, kind: MessageKind) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => match kind {
            MessageKind::Image => "image/*",
            MessageKind::Video => "video/*",
            MessageKind::Audio => "audio/*",
            MessageKind::Document | MessageKind::Text => "application/octet-stream",
        },
    }
}
