//! Model replies rendered as Telegram HTML.
//!
//! Everything the model writes is escaped first, so stray `<` or `&` can
//! never produce a "can't parse entities" rejection. A small subset of
//! Markdown is then mapped onto the tags Telegram understands:
//!
//! | Input              | Output                    |
//! |--------------------|---------------------------|
//! | ` ```code``` `     | `<pre>code</pre>`         |
//! | `` `code` ``       | `<code>code</code>`       |
//! | `**bold**`         | `<b>bold</b>`             |
//! | `# Title`          | `<b>Title</b>`            |
//! | `- item`           | `• item`                  |

use regex::Regex;
use std::sync::LazyLock;

static CODE_BLOCK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[a-zA-Z0-9_+-]*\n?([\s\S]*?)```").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`\n]+?)`").unwrap());
static BOLD_DOUBLE_ASTERISK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*\n]+?)\*\*").unwrap());
static HEADING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6} (.+)$").unwrap());
static LIST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\s*)[-*] (.*)$").unwrap());

/// Header placed above every successful answer.
pub const RESPONSE_HEADER: &str = "✅ <b>Response:</b>\n";

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

/// Render a model reply as Telegram HTML.
pub fn render_reply(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 16);
    let mut last = 0;

    for caps in CODE_BLOCK_PATTERN.captures_iter(input) {
        let (Some(whole), Some(code)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&render_prose(&input[last..whole.start()]));
        out.push_str("<pre>");
        out.push_str(&escape_html(code.as_str().trim_end()));
        out.push_str("</pre>");
        last = whole.end();
    }
    out.push_str(&render_prose(&input[last..]));
    out
}

/// Render text outside fenced code blocks.
fn render_prose(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in INLINE_CODE.captures_iter(text) {
        let (Some(whole), Some(code)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&render_inline(&text[last..whole.start()]));
        out.push_str("<code>");
        out.push_str(&escape_html(code.as_str()));
        out.push_str("</code>");
        last = whole.end();
    }
    out.push_str(&render_inline(&text[last..]));
    out
}

fn render_inline(text: &str) -> String {
    let escaped = escape_html(text);
    let headed = HEADING_PATTERN.replace_all(&escaped, "<b>$1</b>");
    let listed = LIST_PATTERN.replace_all(&headed, "$1• $2");
    BOLD_DOUBLE_ASTERISK
        .replace_all(&listed, "<b>$1</b>")
        .into_owned()
}
