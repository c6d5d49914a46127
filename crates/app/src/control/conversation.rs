use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::User => "Tú",
            Role::Assistant => "Asistente",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ConversationEntry {
    pub(crate) role: Role,
    pub(crate) content: String,
    pub(crate) timestamp: DateTime<Utc>,
}

/// In-memory chat history shown next to the video feed.
#[derive(Default)]
pub(crate) struct ConversationLog {
    entries: Vec<ConversationEntry>,
}

impl ConversationLog {
    pub(crate) fn push(&mut self, role: Role, content: impl Into<String>) {
        self.entries.push(ConversationEntry {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub(crate) fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|entry| entry.timestamp)
    }

    /// Display lines in chat order, prefixed with the speaker.
    pub(crate) fn rendered(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|entry| format!("{}: {}", entry.role.label(), entry.content))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_speakers_in_order() {
        let mut log = ConversationLog::default();
        log.push(Role::User, "hola");
        log.push(Role::Assistant, "¿en qué te ayudo?");

        assert_eq!(
            log.rendered(),
            vec!["Tú: hola".to_string(), "Asistente: ¿en qué te ayudo?".to_string()]
        );
        let entries = log.entries();
        assert!(entries[0].timestamp <= entries[1].timestamp);
        assert_eq!(log.last_activity(), Some(entries[1].timestamp));
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = ConversationLog::default();
        log.push(Role::User, "a");
        log.clear();
        assert_eq!(log.len(), 0);
        assert!(log.rendered().is_empty());
        assert!(log.last_activity().is_none());
    }
}
