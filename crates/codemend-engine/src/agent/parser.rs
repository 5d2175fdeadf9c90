//! Parsing of agent replies.
//!
//! Two extractors drive the loop: the first fenced code block (a code
//! action for the sandbox) and the first `<result>` block (the agent's
//! terminal output for the step). Both return `None` cleanly when the
//! reply contains neither.

use std::sync::OnceLock;

use regex::Regex;

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:python)?\s*\n(.*?)\n```").expect("code block pattern"))
}

fn result_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<result>(.*?)</result>").expect("result pattern"))
}

/// Extract the first fenced code block (with or without a `python`
/// language tag) from an agent reply.
pub fn extract_code_block(response: &str) -> Option<String> {
    code_block_re()
        .captures(response)
        .map(|caps| caps[1].trim().to_string())
}

/// Extract the content of the first `<result>...</result>` block.
///
/// The agent writes this block when it has finished its role; the loop
/// accepts the first match and ignores later content.
pub fn extract_result(response: &str) -> Option<String> {
    result_re()
        .captures(response)
        .map(|caps| caps[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_block_with_python_fence() {
        let response = "I will list files first.\n```python\nimport os\nprint(os.listdir('.'))\n```\n";
        let code = extract_code_block(response).expect("code");
        assert!(code.contains("import os"));
        assert!(code.contains("os.listdir"));
    }

    #[test]
    fn test_code_block_with_unlabelled_fence() {
        let response = "```\nx = 1 + 1\n```\n";
        assert_eq!(extract_code_block(response).as_deref(), Some("x = 1 + 1"));
    }

    #[test]
    fn test_code_block_absent() {
        assert!(extract_code_block("I will now think about the problem.").is_none());
    }

    #[test]
    fn test_code_block_takes_first_of_many() {
        let response = "```python\nfirst_block()\n```\n```python\nsecond_block()\n```\n";
        let code = extract_code_block(response).expect("code");
        assert!(code.contains("first_block"));
        assert!(!code.contains("second_block"));
    }

    #[test]
    fn test_code_block_multiline() {
        let response = "```python\ndef fix():\n    x = 1\n    y = 2\n    return x + y\n```\n";
        let code = extract_code_block(response).expect("code");
        assert!(code.contains("def fix()"));
        assert!(code.contains("return x + y"));
    }

    #[test]
    fn test_result_with_tag() {
        let response = "After analysing the code I found the bug.\n<result>{\"fixed\": true, \"description\": \"Off-by-one in loop\"}</result>\n";
        let result = extract_result(response).expect("result");
        assert!(result.contains("Off-by-one"));
    }

    #[test]
    fn test_result_absent() {
        assert!(extract_result("Still working on it.").is_none());
    }

    #[test]
    fn test_result_multiline_is_trimmed() {
        let response = "<result>\n{\n  \"passed\": true,\n  \"tests_run\": 42\n}\n</result>\n";
        let result = extract_result(response).expect("result");
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
        assert!(result.contains("\"tests_run\": 42"));
    }

    #[test]
    fn test_result_with_surrounding_text() {
        let response = "Done! <result>success</result> That's all.";
        assert_eq!(extract_result(response).as_deref(), Some("success"));
    }

    #[test]
    fn test_result_only_reply_has_no_code_block() {
        // The extractors are disjoint on a pure-result reply.
        let response = "<result>{\"ok\":true}</result>";
        assert_eq!(extract_result(response).as_deref(), Some("{\"ok\":true}"));
        assert!(extract_code_block(response).is_none());
    }
}
