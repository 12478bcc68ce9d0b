use crate::providers::provider::Turn;

/// Turns exchanged while answering a single question. Append-only; seeded
/// with the question and dropped once the question is answered.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user(question)],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::provider::ToolCall;

    #[test]
    fn seeded_with_question_only() {
        let state = ConversationState::new("Weather in Aleppo?");
        assert_eq!(state.turns(), &[Turn::user("Weather in Aleppo?")]);
    }

    #[test]
    fn appends_in_order() {
        let call = ToolCall::new("c1", "lookup", "{}");
        let mut state = ConversationState::new("q");
        state.push(Turn::Assistant {
            text: None,
            tool_calls: vec![call.clone()],
        });
        state.push(Turn::tool_result(&call, "42", false));
        state.push(Turn::assistant("done"));

        let turns = state.into_turns();
        assert_eq!(turns.len(), 4);
        assert!(turns[2].is_tool_result());
        assert_eq!(turns[3], Turn::assistant("done"));
    }
}
