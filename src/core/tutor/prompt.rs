//! Instruction text sent to the models.
//!
//! Both modes start from the configured base prompt and append the current page
//! context followed by grounding rules. The turn-based prompt is rebuilt for
//! every turn because the page may have changed in between.

use super::page::{PageContent, truncate_chars};

/// Base prompt used when neither the client nor the server configures one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly, patient tutor helping a student work through the lesson they have open in their browser.";

/// Opening user message that asks the realtime model to speak first.
pub const REALTIME_GREETING_REQUEST: &str =
    "Greet the student warmly and ask what they need help with on this lesson. 1-2 sentences only!";

/// User message paired with the screenshot when asking for a turn-based greeting.
pub const GREETING_REQUEST: &str = "Greet the student and ask if they have started this lesson or need help getting started. Keep it to 1-2 sentences.";

/// Spoken when no screenshot is available or the greeting request fails.
pub const FALLBACK_GREETING: &str = "Hi! 👋 I'm here to help you learn! Have you started looking at this lesson yet, or would you like me to help you get started? 📚";

/// Maximum page text embedded in the turn-based prompt.
const TURN_CONTEXT_CHARS: usize = 3000;

const TUTORING_RULES: &str = "\
TUTORING RULES:

Accuracy:
1. Read the screenshot carefully and exactly.
2. Copy numbers exactly as shown and quote text without paraphrasing.
3. Never invent or change numbers, names or details.
4. If something is hard to read, say \"I'm not sure I can read that clearly\".

Approach:
- Keep responses short (2-3 sentences).
- Reference the exact text or numbers on the screen.
- Ask questions that make the student think instead of giving answers away.
- Break complex ideas into small steps and give hints when they are stuck.
- For math problems, state the exact problem first, then guide step by step.
- Celebrate progress and never rush the student.

The student may have moved to a different part of the lesson, so always base your answer on the current screenshot.";

const REALTIME_RULES: &str = "\
STRICT RULES:
1. Tutor based ONLY on what's shown on the page text above
2. Reference specific problems, examples, or text you can see
3. If asked about something not visible, say \"I don't see that on this page\"
4. Keep responses to 1-2 sentences maximum
5. Be enthusiastic and encouraging

GREETING: Look at the page content and greet the student based on what lesson they're viewing.";

const GREETING_GUIDANCE: &str = "\
This is your FIRST message to the student. Look at their screen and give them a warm, friendly greeting that:
1. Acknowledges the lesson or topic you can see
2. Asks if they've started or need help getting started
3. Is encouraging and supportive
4. Is 2-3 sentences max
Mention the actual lesson content you see rather than generic page labels.";

fn base_or_default(base: &str) -> &str {
    let trimmed = base.trim();
    if trimmed.is_empty() {
        DEFAULT_SYSTEM_PROMPT
    } else {
        trimmed
    }
}

/// System prompt for one turn of the vision-grounded conversation.
pub fn build_turn_prompt(base: &str, page: &PageContent) -> String {
    let mut prompt = String::with_capacity(TUTORING_RULES.len() + TURN_CONTEXT_CHARS + 256);
    prompt.push_str(base_or_default(base));
    prompt.push_str("\n\n===== CURRENT SCREEN =====\n\n");
    prompt.push_str(&format!("Lesson: {}\n", page.title));
    if !page.headings.is_empty() {
        prompt.push_str(&format!("Topics: {}\n\n", page.headings.join(", ")));
    }
    prompt.push_str("[You can see what the student is looking at RIGHT NOW in the screenshot]\n\n");
    prompt.push_str(&format!(
        "Context:\n{}\n\n",
        truncate_chars(&page.text_content, TURN_CONTEXT_CHARS)
    ));
    prompt.push_str("===== END =====\n\n");
    prompt.push_str(TUTORING_RULES);
    prompt
}

/// Prompt used to ask the vision model for an opening greeting.
pub fn build_greeting_prompt(base: &str, page: &PageContent) -> String {
    format!("{}\n\n{}", build_turn_prompt(base, page), GREETING_GUIDANCE)
}

/// Session instructions for the realtime model.
pub fn build_realtime_instructions(base: &str, page: &PageContent) -> String {
    format!(
        "{}\n\n===== WEBPAGE TEXT CONTENT =====\n\n{}\n\n===== END OF CONTENT =====\n\n{}",
        base_or_default(base),
        page.text_content,
        REALTIME_RULES
    )
}
