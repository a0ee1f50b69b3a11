//! Prompts for page classification.
//!
//! Kept in one place so the classifier's parsing rules and the wording the
//! model sees cannot drift apart unnoticed; the tests below pin the JSON keys
//! the parser looks for.

/// System prompt for classifying one page into a slide.
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You analyse a single page of a course document and describe it as one slide.

Respond with ONLY a JSON object, no prose and no code fences:

{
  "type": "regular" | "video" | "quiz" | "reference" | "resources",
  "title": "short title, at most 100 characters",
  "description": "what the page covers, at most 500 characters",
  "links": ["any URLs that appear on the page"]
}

Choose the type as follows:
- "quiz": questions, answers, exercises, self-checks
- "video": the page points to a video or asks the reader to watch something
- "reference": citations, bibliographies, further-reading lists
- "resources": downloads, tools, lists of useful links
- "regular": everything else

If the page is empty or unreadable, use "regular" and describe what you can see."#;

/// User message for one page.
pub fn classify_user_prompt(document_name: &str, page_number: usize, total_pages: usize, page_text: &str) -> String {
    let text = if page_text.trim().is_empty() {
        "(no extractable text; rely on the image if one is attached)"
    } else {
        page_text
    };
    format!(
        "Document: {document_name}\nPage {page_number} of {total_pages}\n\nPage text:\n\"\"\"\n{text}\n\"\"\""
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Category;

    #[test]
    fn prompt_names_every_category_and_key() {
        for c in Category::ALL {
            assert!(
                CLASSIFY_SYSTEM_PROMPT.contains(&format!("\"{}\"", c.as_str())),
                "missing {c}"
            );
        }
        for key in ["\"type\"", "\"title\"", "\"description\"", "\"links\""] {
            assert!(CLASSIFY_SYSTEM_PROMPT.contains(key), "missing {key}");
        }
    }

    #[test]
    fn empty_text_gets_a_hint() {
        let p = classify_user_prompt("deck.pdf", 2, 9, "  ");
        assert!(p.contains("Page 2 of 9"));
        assert!(p.contains("no extractable text"));
    }
}
