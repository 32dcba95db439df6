//! Earlier prompt/code exchanges carried into later generations.

use crate::{
    config::Config,
    llm::{ChatMessage, Role},
};

/// One finished exchange: what was asked and the code that came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub prompt: String,
    pub code: String,
}

impl Turn {
    pub fn new(prompt: impl Into<String>, code: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), code: code.into() }
    }

    pub fn messages(&self) -> [ChatMessage; 2] {
        [
            ChatMessage::new(Role::User, self.prompt.clone()),
            ChatMessage::new(Role::Assistant, self.code.clone()),
        ]
    }
}

/// Bounded memory of an interactive session, oldest turns dropped first.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    length: usize,
}

impl Conversation {
    pub fn new(length: usize) -> Self {
        Self { turns: Vec::new(), length }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.get_u64("CONVERSATION_LENGTH").unwrap_or(20) as usize)
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        let over = self.turns.len().saturating_sub(self.length);
        self.turns.drain(..over);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_turns_fall_off() {
        let mut conv = Conversation::new(2);
        conv.push(Turn::new("a", "print(1)"));
        conv.push(Turn::new("b", "print(2)"));
        conv.push(Turn::new("c", "print(3)"));
        let prompts: Vec<_> = conv.turns().iter().map(|t| t.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["b", "c"]);
    }

    #[test]
    fn zero_length_keeps_nothing() {
        let mut conv = Conversation::new(0);
        conv.push(Turn::new("a", "print(1)"));
        assert!(conv.turns().is_empty());
    }

    #[test]
    fn turn_becomes_user_then_assistant() {
        let [user, assistant] = Turn::new("plot x", "plot(x)").messages();
        assert_eq!(user.role, Role::User);
        assert_eq!(assistant.content, "plot(x)");
    }
}
