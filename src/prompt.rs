//! GLM-4 prompt formatting
//!
//! The chat template is fixed: one user turn followed by the assistant
//! marker. The template follows the upstream GLM-4 chat tokenizer
//! (https://huggingface.co/THUDM/glm-4-9b-chat).

/// Chat template wrapping a single user message.
pub const GLM4_PROMPT_FORMAT: &str = "<|user|>\n{prompt}\n<|assistant|>";

/// Render the GLM-4 chat template around the user text.
///
/// Pure string substitution; the user text is inserted verbatim.
pub fn format_prompt(prompt: &str) -> String {
    GLM4_PROMPT_FORMAT.replace("{prompt}", prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prompt_exact() {
        assert_eq!(
            format_prompt("What is AI?"),
            "<|user|>\nWhat is AI?\n<|assistant|>"
        );
    }

    #[test]
    fn test_format_prompt_unicode() {
        assert_eq!(
            format_prompt("AI是什么？"),
            "<|user|>\nAI是什么？\n<|assistant|>"
        );
    }

    #[test]
    fn test_format_prompt_idempotent_inputs() {
        let a = format_prompt("same text");
        let b = format_prompt("same text");
        assert_eq!(a, b);
    }

    #[test]
    fn test_format_prompt_empty() {
        assert_eq!(format_prompt(""), "<|user|>\n\n<|assistant|>");
    }

    #[test]
    fn test_format_prompt_braces_in_user_text() {
        // Braces in the user text must not be re-expanded
        assert_eq!(
            format_prompt("{prompt}"),
            "<|user|>\n{prompt}\n<|assistant|>"
        );
    }
}
