//! Remote collection layout.
//!
//! ```text
//! users/{userId}
//! conversations/{userId}/messages/{conversationId}   conversation summaries
//! messages/{userId}/{otherUserId}/{messageId}        one mirror per participant
//! notifications/{userId}                             { token, userId }
//! Contacts/{userId}/UserContacts/{autoId}
//! changeSignals/{userId}/peers/{otherUserId}         { peerId, changed }
//! ```

/// Users collection
pub const USERS: &str = "users";

pub fn user(user_id: &str) -> String {
    format!("{}/{}", USERS, user_id)
}

/// A user's conversation summaries. The sub-collection is named `messages`
/// for wire compatibility even though it holds conversations.
pub fn conversations(owner_id: &str) -> String {
    format!("conversations/{}/messages", owner_id)
}

pub fn conversation(owner_id: &str, conversation_id: &str) -> String {
    format!("{}/{}", conversations(owner_id), conversation_id)
}

/// `owner_id`'s mirror of the history with `other_id`
pub fn messages(owner_id: &str, other_id: &str) -> String {
    format!("messages/{}/{}", owner_id, other_id)
}

pub fn message(owner_id: &str, other_id: &str, message_id: &str) -> String {
    format!("{}/{}", messages(owner_id, other_id), message_id)
}

pub fn notification(user_id: &str) -> String {
    format!("notifications/{}", user_id)
}

pub fn contacts(owner_id: &str) -> String {
    format!("Contacts/{}/UserContacts", owner_id)
}

pub fn contact(owner_id: &str, contact_doc_id: &str) -> String {
    format!("{}/{}", contacts(owner_id), contact_doc_id)
}

/// Change signals addressed to `owner_id`
pub fn change_signals(owner_id: &str) -> String {
    format!("changeSignals/{}/peers", owner_id)
}

pub fn change_signal(owner_id: &str, peer_id: &str) -> String {
    format!("{}/{}", change_signals(owner_id), peer_id)
}

/// Split a document path into `(collection, id)`
pub fn split(path: &str) -> Option<(&str, &str)> {
    let (collection, id) = path.rsplit_once('/')?;
    if collection.is_empty() || id.is_empty() {
        return None;
    }
    Some((collection, id))
}

/// Fresh document id for auto-keyed collections
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(user("u1"), "users/u1");
        assert_eq!(conversation("u1", "c9"), "conversations/u1/messages/c9");
        assert_eq!(message("u1", "u2", "m1"), "messages/u1/u2/m1");
        assert_eq!(contacts("u1"), "Contacts/u1/UserContacts");
        assert_eq!(change_signal("u2", "u1"), "changeSignals/u2/peers/u1");
    }

    #[test]
    fn test_split() {
        assert_eq!(split("messages/u1/u2/m1"), Some(("messages/u1/u2", "m1")));
        assert_eq!(split("users"), None);
        assert_eq!(split("users/"), None);
    }

    #[test]
    fn test_document_ids_are_unique() {
        assert_ne!(new_document_id(), new_document_id());
    }
}
