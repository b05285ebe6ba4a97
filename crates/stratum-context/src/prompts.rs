//! Prompt templates for the shrink channel and the rendering of stored
//! summaries into window entries.

use stratum_core::messages::Role;
use stratum_core::summary::{SummaryLevel, SummaryRecord};

/// System prompt for anchor extraction.
pub fn anchor_system_prompt(level: SummaryLevel, anchors_count: usize) -> String {
    match level {
        SummaryLevel::One => format!(
            "You are an expert dialogue analyst. Extract the key moments of a \
             conversation as short anchors.\n\n\
             An anchor is a short phrase (3-7 words) that captures an important \
             topic or turning point of the conversation.\n\n\
             Rules:\n\
             1. Produce exactly {anchors_count} anchors\n\
             2. Keep each anchor short and informative\n\
             3. Cover the main topics and important moments\n\
             4. Use the same language as the dialogue\n\
             5. Reply with the anchors only, one per line, without numbering"
        ),
        SummaryLevel::Two => format!(
            "You are an expert dialogue analyst. Extract the key themes from a \
             set of conversation summaries as short anchors.\n\n\
             An anchor is a short phrase (3-7 words) that captures an important \
             theme or group of themes across the summaries.\n\n\
             Rules:\n\
             1. Produce exactly {anchors_count} anchors\n\
             2. Keep each anchor short and informative\n\
             3. Cover the main themes across all summaries\n\
             4. Use the same language as the summaries\n\
             5. Focus on the most significant, recurring themes\n\
             6. Reply with the anchors only, one per line, without numbering"
        ),
    }
}

/// System prompt for the prose summary, seeded with the extracted anchors.
pub fn summary_system_prompt(level: SummaryLevel, max_length: usize, anchors: &[String]) -> String {
    let anchor_list = anchors.join(", ");
    match level {
        SummaryLevel::One => format!(
            "You are an expert at writing concise dialogue summaries. Summarize \
             the conversation below.\n\n\
             Requirements:\n\
             1. The summary must be at most {max_length} characters\n\
             2. Use the same language as the dialogue\n\
             3. Capture the main topics and conclusions\n\
             4. Be specific and informative\n\
             5. Include important details and decisions\n\
             6. Use the provided anchors as guidance\n\n\
             Anchors: {anchor_list}\n\n\
             Reply with the summary text only, no commentary."
        ),
        SummaryLevel::Two => format!(
            "You are an expert at writing concise summaries. Merge the dialogue \
             summaries below into one.\n\n\
             Requirements:\n\
             1. The summary must be at most {max_length} characters\n\
             2. Use the same language as the source summaries\n\
             3. Capture the main themes and conclusions of all summaries\n\
             4. Be specific and informative\n\
             5. Produce one consolidated summary covering every important aspect\n\
             6. Use the provided anchors as guidance\n\n\
             Anchors: {anchor_list}\n\n\
             Reply with the summary text only, no commentary."
        ),
    }
}

/// Header line introducing the rendered content.
pub fn content_header(level: SummaryLevel) -> &'static str {
    match level {
        SummaryLevel::One => "Dialogue to analyze:",
        SummaryLevel::Two => "Summaries to analyze:",
    }
}

/// Display name of a role inside a rendered transcript.
pub fn role_display(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::System => "System",
        Role::Tool => "Tool",
    }
}

/// Render a stored summary as the text of an assistant-role window entry.
pub fn render_summary_entry(summary: &SummaryRecord) -> String {
    let label = match summary.level {
        SummaryLevel::One => "Summary of earlier conversation",
        SummaryLevel::Two => "Condensed summary of much earlier conversation",
    };

    let mut out = String::new();
    out.push_str(label);
    if !summary.anchors.is_empty() {
        out.push_str(" (key topics: ");
        out.push_str(&summary.anchors.join("; "));
        out.push(')');
    }
    out.push_str(":\n");
    out.push_str(&summary.text);
    out
}
