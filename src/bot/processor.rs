use super::resolver::ResolvedUser;
use super::{BotContext, BotError};
use crate::channels::IncomingMessage;
use crate::submission::ThoughtRequest;
use regex::Regex;
use std::sync::LazyLock;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());

/// Like [`URL_RE`], plus the horizontal whitespace in front of the URL so
/// that "a URL b" collapses to "a b" rather than "a  b".
static URL_STRIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*https?://\S+").unwrap());

/// Message text split into the thought body and its source link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedThought {
    /// First URL in the message, or empty
    pub source_url: String,
    /// Message with every URL removed, trimmed
    pub body: String,
}

/// Take the first http(s) URL as the source and strip all URLs from the body.
pub fn extract_thought(text: &str) -> ExtractedThought {
    let source_url = URL_RE
        .find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let body = URL_STRIP_RE.replace_all(text, "").trim().to_string();
    ExtractedThought { source_url, body }
}

/// Free-text path: eligibility gate, URL extraction, one submission attempt,
/// then counter bookkeeping.
///
/// Counter updates are sequential read-modify-write on the user record; two
/// concurrent messages from one user can lose an increment.
pub(super) async fn process(
    ctx: &BotContext,
    msg: &IncomingMessage,
    mut user: ResolvedUser,
) -> Result<(), BotError> {
    if !user.record.has_credentials() {
        return Err(BotError::CredentialsNotConfigured);
    }

    let extracted = extract_thought(&msg.text);
    if !extracted.source_url.is_empty() {
        ctx.reply(
            msg,
            &format!(
                "I found a URL in your message: {}. I'll include it in the thought!",
                extracted.source_url
            ),
        )
        .await;
    }

    let request = ThoughtRequest {
        email: user.record.email.clone().unwrap_or_default(),
        token: user.record.token.clone(),
        thought: extracted.body,
        source_url: extracted.source_url,
    };

    let created = ctx.api.create_thought(&request).await?;

    user.record.thoughts = Some(user.record.thought_count() + 1);
    ctx.store.put_user(&user.username, &user.record).await?;
    let total = ctx.store.increment_system_counter().await?;
    tracing::info!(
        username = %user.username,
        user_thoughts = user.record.thought_count(),
        system_thoughts = total,
        "Thought created"
    );

    ctx.reply(
        msg,
        &format!("Thought sent successfully! Direct link: {}", created.url),
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_url_and_cleans_body() {
        let extracted = extract_thought("check https://x.io/a out");
        assert_eq!(extracted.source_url, "https://x.io/a");
        assert_eq!(extracted.body, "check out");
    }

    #[test]
    fn no_url_passes_through_trimmed() {
        let extracted = extract_thought("  just a thought \n");
        assert_eq!(extracted.source_url, "");
        assert_eq!(extracted.body, "just a thought");
    }

    #[test]
    fn first_url_is_source_and_all_are_stripped() {
        let extracted = extract_thought("https://a.io read with http://b.io/x?y=1 later");
        assert_eq!(extracted.source_url, "https://a.io");
        assert_eq!(extracted.body, "read with later");
    }

    #[test]
    fn only_http_schemes_are_urls() {
        let extracted = extract_thought("ftp://files.example and mailto:me@example.com");
        assert_eq!(extracted.source_url, "");
        assert_eq!(extracted.body, "ftp://files.example and mailto:me@example.com");
    }

    #[test]
    fn url_only_message_leaves_empty_body() {
        let extracted = extract_thought("https://x.io/a");
        assert_eq!(extracted.source_url, "https://x.io/a");
        assert_eq!(extracted.body, "");
    }

    #[test]
    fn newlines_around_urls_are_kept() {
        let extracted = extract_thought("first line\nhttps://x.io\nlast line");
        assert_eq!(extracted.source_url, "https://x.io");
        assert_eq!(extracted.body, "first line\n\nlast line");
    }
}
