//! Append-only interview transcript.

use serde::{Deserialize, Serialize};

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Interviewer,
    Candidate,
}

impl Role {
    /// Role name in chat-completions requests.
    pub fn chat_role(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Interviewer => "assistant",
            Role::Candidate => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Ordered turns of one session. Turns are only ever appended.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with the interview instructions and the welcome line.
    pub fn seeded(system_prompt: impl Into<String>, welcome_text: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.push(ConversationTurn::new(Role::System, system_prompt));
        let welcome = welcome_text.into();
        if !welcome.trim().is_empty() {
            conversation.push(ConversationTurn::new(Role::Interviewer, welcome));
        }
        conversation
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Instructions for the interviewer persona, listing the questions to cover.
pub fn interview_prompt(questions: &[String]) -> String {
    let list = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are an HR interviewer running a spoken screening interview. \
         Reply like a person speaking aloud: one or two sentences, no markup, \
         no lists, no code. Ask the following questions one at a time, in order, \
         and move on once the candidate has answered. When every question is \
         covered, thank the candidate and say the interview is over.\n\n\
         Questions:\n{list}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_conversation_starts_with_system_then_welcome() {
        let c = Conversation::seeded("rules", "Hi, welcome!");
        assert_eq!(c.len(), 2);
        assert_eq!(c.turns()[0].role, Role::System);
        assert_eq!(c.turns()[1], ConversationTurn::new(Role::Interviewer, "Hi, welcome!"));
    }

    #[test]
    fn blank_welcome_is_not_recorded() {
        let c = Conversation::seeded("rules", "  ");
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn prompt_numbers_questions() {
        let prompt = interview_prompt(&["Tell me about yourself".into(), " Why Rust? ".into()]);
        assert!(prompt.contains("1. Tell me about yourself\n2. Why Rust?"));
    }

    #[test]
    fn roles_map_to_chat_roles() {
        assert_eq!(Role::System.chat_role(), "system");
        assert_eq!(Role::Interviewer.chat_role(), "assistant");
        assert_eq!(Role::Candidate.chat_role(), "user");
        assert_eq!(serde_json::to_value(Role::Candidate).unwrap(), "candidate");
    }
}
