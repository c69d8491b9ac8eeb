//! Question answering over the loaded index.
//!
//! Every call embeds the question, retrieves the top-k passages, renders
//! the prompt with the passages and the caller's conversation history, and
//! asks the chat model. Nothing is cached between calls and history is
//! never stored here; the caller owns it.

use anyhow::{Context, Result};
use tracing::debug;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::index::RetrievalIndex;
use crate::llm::ChatModel;
use crate::models::ConversationTurn;

/// Answers questions from one immutable index.
pub struct QueryEngine {
    index: RetrievalIndex,
    embedder: Box<dyn EmbeddingProvider>,
    chat: Box<dyn ChatModel>,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(
        index: RetrievalIndex,
        embedder: Box<dyn EmbeddingProvider>,
        chat: Box<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            chat,
            top_k,
        }
    }

    pub fn index(&self) -> &RetrievalIndex {
        &self.index
    }

    /// Answer `question` in the context of `history`.
    pub async fn answer(&self, question: &str, history: &[ConversationTurn]) -> Result<String> {
        let query = embed_query(self.embedder.as_ref(), question)
            .await
            .context("Failed to embed question")?;
        let hits = self.index.search(&query, self.top_k);
        debug!(
            hits = hits.len(),
            sources = ?hits.iter().map(|h| h.passage.source_key.as_str()).collect::<Vec<_>>(),
            "retrieved passages"
        );

        let context = hits
            .iter()
            .map(|h| h.passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = render_prompt(question, &context, &format_history(history));
        self.chat.complete(&prompt).await
    }
}

/// `User: …\nBot: …` lines, one pair per turn, oldest first.
pub fn format_history(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .map(|t| format!("User: {}\nBot: {}", t.question, t.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_prompt(question: &str, context: &str, history: &str) -> String {
    format!(
        "You are a teaching assistant answering a student's questions about their courses.\n\
         Use only the course material below. If the answer is not in it, say you don't know.\n\
         Keep answers concise and mention dates, weights, and deadlines exactly as written.\n\
         \n\
         Course material:\n\
         {context}\n\
         \n\
         Conversation so far:\n\
         {history}\n\
         \n\
         Question: {question}\n\
         Answer:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_formatted_in_order() {
        let history = vec![
            ConversationTurn {
                question: "When is the midterm?".into(),
                answer: "October 3.".into(),
            },
            ConversationTurn {
                question: "Where?".into(),
                answer: "Room 101.".into(),
            },
        ];
        assert_eq!(
            format_history(&history),
            "User: When is the midterm?\nBot: October 3.\nUser: Where?\nBot: Room 101."
        );
        assert_eq!(format_history(&[]), "");
    }

    #[test]
    fn prompt_contains_all_parts() {
        let prompt = render_prompt("What is graded?", "Exams 60%", "User: hi\nBot: hello");
        assert!(prompt.contains("Course material:\nExams 60%"));
        assert!(prompt.contains("Conversation so far:\nUser: hi\nBot: hello"));
        assert!(prompt.ends_with("Question: What is graded?\nAnswer:"));
    }
}
