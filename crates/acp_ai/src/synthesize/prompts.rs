/// `sources` lists title and URL per contributing document; empty when none are known.
pub fn answer_prompt(question: &str, sources: &str, context_blocks: &str) -> String {
    let sources = if sources.is_empty() {
        String::new()
    } else {
        format!("Document information:\n{sources}\n\n")
    };
    format!(
        r#"You are answering a question about documents the user has ingested.

Rules (non-negotiable):
1) Use ONLY the context chunks provided below. Do not invent facts.
2) Every concrete claim MUST include an inline citation marker in the form [[chunk:<chunk_id>]].
3) If the context does not contain the answer, say that you do not know.

Question:
{question}

{sources}Context chunks:
{context_blocks}

Answer:
"#
    )
}

pub fn meeting_minutes_prompt(context_blocks: &str) -> String {
    format!(
        r#"Generate meeting minutes and a list of tasks based on the provided context.
Use ONLY the transcript chunks below and cite them inline as [[chunk:<chunk_id>]].

Context:
{context_blocks}

Please provide:

## Meeting Minutes
- Key points discussed
- Decisions made
- Important topics covered

## Task List
- Actionable items with assignees (if mentioned) and deadlines (if mentioned)
- Follow-up actions needed
"#
    )
}

pub fn summary_prompt(context_blocks: &str, max_words: Option<u32>) -> String {
    let length_instruction = match max_words {
        Some(n) => format!(" Keep the summary under {n} words."),
        None => String::new(),
    };
    format!(
        r#"Please provide a concise summary of the following text.{length_instruction}
Use ONLY the chunks below and cite them inline as [[chunk:<chunk_id>]].

Text:
{context_blocks}

Summary:
"#
    )
}
