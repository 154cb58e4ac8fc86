use crate::agent::browser::truncate_text;
use crate::agent::types::{ConversationTurn, Query, TurnRole};

/// Floor for the newest turn when the query alone fills the budget
pub const MIN_NEWEST_TURN_CHARS: usize = 512;

/// Ordered turns of one orchestration run.
///
/// The turn holding the original query is anchored: bounding the context for
/// a reasoning request drops the oldest turns first but never the anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    turns: Vec<ConversationTurn>,
    anchor: usize,
}

impl ConversationContext {
    /// Seed a context from a query. Caller history and page context come
    /// first, the query text last.
    pub fn seed(query: &Query, max_turn_chars: usize) -> Self {
        let mut turns = query.prior_turns.clone();

        if let Some(url) = query.current_url.as_deref().filter(|u| !u.trim().is_empty()) {
            turns.push(ConversationTurn::new(
                TurnRole::ActionResult,
                format!("The user is currently viewing: {}", url.trim()),
            ));
        }
        if let Some(content) = query
            .page_content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        {
            turns.push(ConversationTurn::new(
                TurnRole::ActionResult,
                format!(
                    "Content of the current page:\n{}",
                    truncate_text(content.trim(), max_turn_chars)
                ),
            ));
        }

        let anchor = turns.len();
        turns.push(ConversationTurn::new(TurnRole::User, query.text.trim()));

        Self { turns, anchor }
    }

    pub fn push(&mut self, role: TurnRole, content: impl Into<String>) {
        self.turns.push(ConversationTurn::new(role, content));
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The original query turn
    pub fn query(&self) -> &ConversationTurn {
        &self.turns[self.anchor]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Copy of this context limited to `max_turns` turns and roughly
    /// `max_chars` characters of content.
    ///
    /// The newest non-query turn is always sent: when it does not fit it is
    /// truncated to the remaining budget (at least [`MIN_NEWEST_TURN_CHARS`]).
    pub fn bounded(&self, max_turns: usize, max_chars: usize) -> ConversationContext {
        let anchor_turn = &self.turns[self.anchor];
        let mut budget = max_chars.saturating_sub(anchor_turn.content.chars().count());
        let mut slots = max_turns.saturating_sub(1);

        let mut keep: Vec<Option<ConversationTurn>> = vec![None; self.turns.len()];
        keep[self.anchor] = Some(anchor_turn.clone());

        let mut newest = true;
        for (idx, turn) in self.turns.iter().enumerate().rev() {
            if idx == self.anchor {
                continue;
            }
            if slots == 0 {
                break;
            }
            let size = turn.content.chars().count();
            if size > budget {
                if newest {
                    let room = budget.max(MIN_NEWEST_TURN_CHARS);
                    let mut cut = turn.clone();
                    cut.content = truncate_text(&turn.content, room);
                    keep[idx] = Some(cut);
                }
                break;
            }
            budget -= size;
            slots -= 1;
            newest = false;
            keep[idx] = Some(turn.clone());
        }

        let mut turns = Vec::new();
        let mut anchor = 0;
        for (idx, turn) in keep.into_iter().enumerate() {
            let Some(turn) = turn else {
                continue;
            };
            if idx == self.anchor {
                anchor = turns.len();
            }
            turns.push(turn);
        }

        let dropped = self.turns.len() - turns.len();
        if dropped > 0 {
            tracing::debug!("Bounded context: dropped {} oldest turns", dropped);
        }

        ConversationContext { turns, anchor }
    }
}
