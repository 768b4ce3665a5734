//! Conversation history management.

use crate::llm::ChatMessage;

/// How history is trimmed before being handed to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPolicy {
    /// Keep the last N messages.
    KeepLast(usize),
    /// Keep the newest suffix whose summed `tokens` fit the budget.
    TokenBudget(usize),
    /// Keep everything.
    Unlimited,
}

/// Transient conversation history owned by the caller.
///
/// The manager never touches the store; it only decides which turns are
/// forwarded to the LLM.
#[derive(Debug, Clone)]
pub struct ChatHistoryManager {
    policy: HistoryPolicy,
    messages: Vec<ChatMessage>,
}

impl ChatHistoryManager {
    pub fn new(policy: HistoryPolicy) -> Self {
        Self {
            policy,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The retained suffix under the configured policy.
    pub fn messages(&self) -> &[ChatMessage] {
        match self.policy {
            HistoryPolicy::Unlimited => &self.messages,
            HistoryPolicy::KeepLast(n) => {
                let start = self.messages.len().saturating_sub(n);
                &self.messages[start..]
            }
            HistoryPolicy::TokenBudget(budget) => {
                // Scan from the newest message, including turns while they
                // fit.
                let mut total = 0;
                let mut start = self.messages.len();
                for (i, message) in self.messages.iter().enumerate().rev() {
                    if total + message.tokens > budget {
                        break;
                    }
                    total += message.tokens;
                    start = i;
                }
                &self.messages[start..]
            }
        }
    }
}
