//! Citation, snippet and grounding-prompt formatting.

use crate::models::SearchHit;

/// Default snippet length in characters.
pub const DEFAULT_SNIPPET_CHARS: usize = 250;

/// Returned instead of calling the model when retrieval found nothing.
pub const NO_CONTEXT_ANSWER: &str = "No context available: none of the indexed documents \
contain information relevant to this question. Try rephrasing it or upload more documents.";

/// Substituted when the model returns an empty completion.
pub const EMPTY_ANSWER_FALLBACK: &str = "Sorry, the language model returned an empty \
response. Please try asking the question differently.";

/// `[Source: report.pdf, chunk 3]`
pub fn render_citation(filename: &str, chunk_index: usize) -> String {
    format!("[Source: {}, chunk {}]", filename, chunk_index)
}

/// Truncate `text` to at most `max_chars` characters, appending `...` when
/// anything was cut. Never splits a UTF-8 code point.
pub fn format_snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_pos, _)) => format!("{}...", &text[..byte_pos]),
        None => text.to_string(),
    }
}

/// Build the grounding prompt sent to the language model.
///
/// Each hit becomes a block headed by its citation tag; blocks are
/// separated by blank lines so the model can quote the tags back.
pub fn build_prompt(question: &str, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .map(|hit| {
            format!(
                "{}\n{}",
                render_citation(&hit.chunk.filename, hit.chunk.chunk_index),
                hit.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the question using only the document excerpts below. \
If they do not contain enough information, say so plainly.\n\n\
Excerpts:\n\n{}\n\n\
Question: {}\n\n\
Rules:\n\
- Use only facts stated in the excerpts.\n\
- Cite the excerpts you rely on by their [Source: ...] tag.\n\
- Keep the answer short.\n\n\
Answer:",
        context,
        question.trim()
    )
}
