//! Conversation message primitive.
//!
//! Messages carry the prompt material exchanged with LLM providers: the
//! system instruction, the composed user content, and the model's replies.
//! Workflow nodes append them to the state's message channel so the full
//! exchange survives in checkpoints and the audit trail.

use serde::{Deserialize, Serialize};

/// A single message with a role and text content.
///
/// # Examples
///
/// ```
/// use steward::message::Message;
///
/// let system = Message::system("You are a rigorous design reviewer.");
/// let user = Message::user("Review the attached LLD.");
/// assert!(system.has_role(Message::SYSTEM));
/// assert!(user.has_role(Message::USER));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Role of the sender: `"user"`, `"assistant"`, or `"system"`.
    pub role: String,
    /// The text content.
    pub content: String,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// Model response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a message with the given role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::user("a").role, "user");
        assert_eq!(Message::assistant("b").role, "assistant");
        assert_eq!(Message::system("c").role, "system");
    }

    #[test]
    fn serde_roundtrip() {
        let msg = Message::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }
}
