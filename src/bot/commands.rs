use super::resolver::ResolvedUser;
use super::{BotContext, BotError};
use crate::channels::IncomingMessage;

/// Recognized bot commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetToken,
    SetEmail,
    CountMyThoughts,
    CountSystemThoughts,
    Help,
    Start,
}

/// Command marker included in each tag, matched case-sensitively
const COMMANDS: &[(&str, Command)] = &[
    ("/setToken", Command::SetToken),
    ("/setEmail", Command::SetEmail),
    ("/countMyThoughts", Command::CountMyThoughts),
    ("/countSystemThoughts", Command::CountSystemThoughts),
    ("/help", Command::Help),
    ("/start", Command::Start),
];

pub const HELP_TEXT: &str = "I can help you create thoughts in Napkin!

You can control your thoughts by sending these commands:

*Edit Settings:*
/setToken <token> - Set your Napkin token
/setEmail <email> - Set your Napkin email

*View Stats:*
/countMyThoughts - View your thought count
/countSystemThoughts - View the system thought count

*Create Thoughts:*
Just send me a message and I'll create a thought for you!
If you include a URL in your message, I'll include it in the thought.
After creating the thought, I'll also send you a direct link to view it in Napkin.";

/// A recognized command plus its single optional argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub argument: Option<String>,
}

impl Command {
    /// Look up a command tag such as `/setToken`.
    ///
    /// A trailing `@botname` (Telegram group syntax) is ignored.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.split_once('@').map_or(tag, |(head, _)| head);
        COMMANDS
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, command)| *command)
    }
}

/// Split `text` into a command tag and its argument.
///
/// Only the second whitespace-delimited token is kept as the argument;
/// further words are ignored. Returns `None` for unrecognized input, which
/// then goes to the message processor.
pub fn parse(text: &str) -> Option<ParsedCommand> {
    let mut tokens = text.split_whitespace();
    let command = Command::from_tag(tokens.next()?)?;
    let argument = tokens.next().map(str::to_string);
    Some(ParsedCommand { command, argument })
}

pub(super) async fn execute(
    ctx: &BotContext,
    msg: &IncomingMessage,
    mut user: ResolvedUser,
    parsed: ParsedCommand,
) -> Result<(), BotError> {
    match parsed.command {
        Command::SetToken => {
            let Some(value) = parsed.argument else {
                ctx.reply(msg, "⚠️ Please provide a token!").await;
                return Ok(());
            };
            user.record.token.clone_from(&value);
            ctx.store.put_user(&user.username, &user.record).await?;
            tracing::info!(username = %user.username, "Token updated");
            ctx.reply(msg, &format!("👍 Token set to: {value}")).await;
        }
        Command::SetEmail => {
            let Some(value) = parsed.argument else {
                ctx.reply(msg, "⚠️ Please provide an email!").await;
                return Ok(());
            };
            user.record.email = Some(value.clone());
            ctx.store.put_user(&user.username, &user.record).await?;
            tracing::info!(username = %user.username, "Email updated");
            ctx.reply(msg, &format!("👍 Email set to: {value}")).await;
        }
        Command::CountMyThoughts => {
            let count = user.record.thought_count();
            ctx.reply(msg, &format!("You have created {count} thoughts!"))
                .await;
        }
        Command::CountSystemThoughts => {
            let count = ctx.store.system_counter().await?;
            ctx.reply(msg, &format!("The system has created {count} thoughts!"))
                .await;
        }
        Command::Help => {
            ctx.reply_markdown(msg, HELP_TEXT).await;
        }
        Command::Start => {
            let greeting = ctx.greetings.get(&user.username).cloned().unwrap_or_else(|| {
                let name = msg.display_name.as_deref().unwrap_or(&user.username);
                format!("Welcome {name}! 🌟\nUse /help to see what I can do for you.")
            });
            ctx.reply(msg, &greeting).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_argument() {
        let parsed = parse("/setToken abc123").unwrap();
        assert_eq!(parsed.command, Command::SetToken);
        assert_eq!(parsed.argument.as_deref(), Some("abc123"));
    }

    #[test]
    fn ignores_words_after_the_argument() {
        let parsed = parse("/setEmail me@example.com and more").unwrap();
        assert_eq!(parsed.command, Command::SetEmail);
        assert_eq!(parsed.argument.as_deref(), Some("me@example.com"));
    }

    #[test]
    fn command_without_argument() {
        let parsed = parse("/setToken").unwrap();
        assert!(parsed.argument.is_none());

        let parsed = parse("/setToken   ").unwrap();
        assert!(parsed.argument.is_none());
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(parse("/settoken abc").is_none());
        assert!(parse("/HELP").is_none());
    }

    #[test]
    fn unknown_commands_fall_through() {
        assert!(parse("/unknown").is_none());
        assert!(parse("setToken abc").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn bot_name_suffix_is_stripped() {
        let parsed = parse("/countMyThoughts@NapkinBot").unwrap();
        assert_eq!(parsed.command, Command::CountMyThoughts);
    }

    #[test]
    fn every_command_tag_resolves() {
        for (tag, command) in COMMANDS {
            assert_eq!(Command::from_tag(tag), Some(*command));
        }
    }
}
