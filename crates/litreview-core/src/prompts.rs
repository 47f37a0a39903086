//! Prompt builders for every LLM-backed step.
//!
//! Builders return full prompt strings; the schema preamble is appended
//! separately by the structured-completion layer.

use crate::schema::{ConversationMessage, Draft, MessageRole};

/// System prompt for keyword planning.
pub const KEYWORD_SYSTEM: &str = "You are a research librarian. Decompose the user's research \
query into 3-5 short English search keyword phrases suitable for scholarly search engines. \
Prefer established terminology over full sentences.";

/// Continuation addendum for keyword planning.
pub fn keyword_continuation_addendum(conversation_context: &str) -> String {
    format!(
        "\n\nThis is a follow-up request in an ongoing research conversation. \
         Recent conversation:\n{conversation_context}\n\
         Generate keywords for the follow-up request in that context."
    )
}

/// System prompt for one-sentence core-contribution extraction.
pub const CONTRIBUTION_SYSTEM: &str = "You are an expert research analyst. Summarize the single \
core contribution of the paper in exactly one sentence. Be specific about what the paper \
introduces or demonstrates.";

/// User prompt for core-contribution extraction.
pub fn contribution_user(title: &str, year: Option<i32>, abstract_text: &str) -> String {
    format!(
        "Title: {title}\nYear: {}\nAbstract: {abstract_text}",
        year.map_or_else(|| "N/A".to_string(), |y| y.to_string())
    )
}

/// System prompt for the 8-field structured extraction.
pub const STRUCTURED_EXTRACTION_SYSTEM: &str = "You are an expert research analyst. Extract a \
structured summary of the paper from its abstract. Set a field to null when the abstract does \
not state it; do not guess. Theoretical papers often have no dataset or baseline.";

/// User prompt for structured extraction (same shape as contribution_user).
pub fn structured_extraction_user(title: &str, year: Option<i32>, abstract_text: &str) -> String {
    contribution_user(title, year, abstract_text)
}

/// System prompt for the outline phase of a fresh draft.
pub fn outline_system(language_name: &str) -> String {
    format!(
        "You are an academic writing assistant composing a literature review in {language_name}. \
         Produce a review title and 4-6 section titles, ordered: an introduction, 2-4 thematic \
         sections, a methodology comparison, and a conclusion."
    )
}

/// System prompt for generating one section of the outline-based draft.
pub fn section_system(
    section_title: &str,
    section_num: usize,
    total_sections: usize,
    outline_titles: &[String],
    language_name: &str,
    num_papers: usize,
) -> String {
    format!(
        "You are an academic writing assistant composing a literature review in {language_name}. \
         The full outline is: {}. Write ONLY section {section_num} of {total_sections}, titled \
         \"{section_title}\". Cite papers inline with {{cite:N}} where N is the paper's 1-based \
         index (valid range 1-{num_papers}). Do not repeat content that belongs to other sections.",
        outline_titles.join(", ")
    )
}

/// System prompt for single-shot draft generation (retry and revision paths).
pub fn draft_system(language_name: &str, num_papers: usize) -> String {
    format!(
        "You are an academic writing assistant. Write a complete literature review in \
         {language_name} with a title and 4-6 sections: an introduction, thematic sections, a \
         methodology comparison, and a conclusion. Cite papers inline with {{cite:N}} where N is \
         the paper's 1-based index (valid range 1-{num_papers}). Every paper must be cited at \
         least once."
    )
}

/// Retry addendum: the top QA errors verbatim plus the citation mandate.
pub fn draft_retry_addendum(error_count: usize, top_errors: &[String], num_papers: usize) -> String {
    let error_list = top_errors
        .iter()
        .map(|e| format!("- {e}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "\n\nYour previous draft failed quality checks with {error_count} errors. \
         The most important ones:\n{error_list}\n\
         Fix all of them. Citation indices must stay within 1-{num_papers}, and every paper \
         from 1 to {num_papers} must be cited at least once."
    )
}

/// Revision addendum: existing draft summary, the new request, recent turns.
pub fn draft_revision_addendum(
    existing_draft: Option<&Draft>,
    user_query: &str,
    conversation_context: &str,
) -> String {
    let existing_summary = existing_draft.map_or_else(String::new, |draft| {
        let titles: Vec<&str> = draft.sections.iter().map(|s| s.heading.as_str()).collect();
        format!(
            "\nExisting draft title: {}\nSections: {}",
            draft.title,
            titles.join(", ")
        )
    });
    format!(
        "\n\nYou are revising an existing review, not writing a new one.{existing_summary}\n\
         The user's revision request: {user_query}\n\
         Recent conversation:\n{conversation_context}\n\
         Keep everything that is not affected by the request."
    )
}

/// Shared user prompt carrying the query and the indexed paper context.
pub fn draft_user(user_query: &str, paper_context: &str) -> String {
    format!("Research query: {user_query}\n\nPapers:\n{paper_context}")
}

/// System prompt for splitting a section into atomic claims.
pub const CLAIM_EXTRACTION_SYSTEM: &str = "You split academic text into atomic factual claims. \
Each claim must be a single self-contained assertion and must keep the {cite:N} markers of the \
sentence it came from. Skip sentences without citations.";

/// User prompt for claim extraction.
pub fn claim_extraction_user(section_title: &str, section_content: &str) -> String {
    format!("Section \"{section_title}\":\n{section_content}")
}

/// System prompt for verifying one claim against one cited paper.
pub const CLAIM_VERIFICATION_SYSTEM: &str = "You are a citation auditor. Judge whether the cited \
paper supports the claim. Answer with a label: \"entails\" when the paper's text supports the \
claim, \"contradicts\" when it contradicts it, \"insufficient\" when it does not provide enough \
evidence. Give a confidence between 0 and 1, the most relevant evidence snippet, and a short \
rationale.";

/// User prompt for claim verification.
pub fn claim_verification_user(
    claim_text: &str,
    citation_index: usize,
    paper_title: &str,
    paper_abstract: &str,
    paper_contribution: &str,
) -> String {
    format!(
        "Claim: {claim_text}\nCited paper [{citation_index}]: {paper_title}\n\
         Abstract: {paper_abstract}\nCore contribution: {paper_contribution}"
    )
}

/// Render the last `max_turns` user/assistant turn pairs as prompt context.
pub fn conversation_context(messages: &[ConversationMessage], max_turns: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let window = max_turns * 2;
    let start = messages.len().saturating_sub(window);
    messages[start..]
        .iter()
        .map(|m| {
            let label = match m.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
                MessageRole::System => "System",
            };
            format!("{label}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MessageRole;

    fn msg(role: MessageRole, content: &str) -> ConversationMessage {
        ConversationMessage::now(role, content, "test")
    }

    #[test]
    fn conversation_context_slices_last_turns() {
        let messages: Vec<ConversationMessage> = (0..14)
            .map(|i| {
                let role = if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                };
                msg(role, &format!("m{i}"))
            })
            .collect();

        let context = conversation_context(&messages, 5);
        let lines: Vec<&str> = context.lines().collect();
        // 5 turn pairs = last 10 messages.
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "User: m4");
        assert_eq!(lines[9], "Assistant: m13");
    }

    #[test]
    fn conversation_context_handles_short_history() {
        let messages = vec![msg(MessageRole::User, "hello")];
        assert_eq!(conversation_context(&messages, 5), "User: hello");
        assert_eq!(conversation_context(&[], 5), "");
    }

    #[test]
    fn retry_addendum_lists_errors_and_range() {
        let addendum = draft_retry_addendum(
            5,
            &["Section 1: bad".to_string(), "Missing citation".to_string()],
            3,
        );
        assert!(addendum.contains("5 errors"));
        assert!(addendum.contains("- Section 1: bad"));
        assert!(addendum.contains("1-3"));
    }

    #[test]
    fn section_system_names_ordinal_and_range() {
        let titles = vec!["Intro".to_string(), "Methods".to_string()];
        let prompt = section_system("Methods", 2, 2, &titles, "English", 7);
        assert!(prompt.contains("section 2 of 2"));
        assert!(prompt.contains("\"Methods\""));
        assert!(prompt.contains("1-7"));
    }
}
