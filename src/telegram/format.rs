use crate::models::ScoredItem;

/// Telegram rejects messages above 4096 characters; leave room for markup.
const MAX_SUMMARY_CHARS: usize = 3000;

/// Renders an accepted item as a Telegram HTML message.
pub fn format_alert(item: &ScoredItem) -> String {
    let summary: String = item.summary.chars().take(MAX_SUMMARY_CHARS).collect();
    let (headline, why_matters) = match summary.split_once("\n\n") {
        Some((headline, rest)) => (headline.trim(), Some(rest.trim())),
        None => (summary.trim(), None),
    };
    let headline = if headline.is_empty() {
        item.item.title.as_str()
    } else {
        headline
    };

    let mut message = format!("🤖 <b>AI News Alert</b>\n\n<b>{}</b>\n\n", escape(headline));

    if let Some(why) = why_matters.filter(|w| !w.is_empty()) {
        message.push_str(&format!("<b>Why it matters:</b>\n{}\n\n", escape(why)));
    }

    message.push_str(&format!(
        "<b>Source:</b> {}\n⏰ {}\n\n<a href=\"{}\">Read more</a>",
        escape(&item.item.source_name),
        item.item.published_at.format("%b %d, %Y - %I:%M %p UTC"),
        escape(&item.item.url),
    ));

    message
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
