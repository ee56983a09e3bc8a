//! Stdin command parsing and execution.

use confidant_core::persistence::MessageDraft;
use confidant_core::{CompanionContext, EntityId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    /// Archive the session, then start a fresh one.
    Clear,
    /// Start a fresh session without archiving.
    Discard,
    History,
    Load(EntityId),
    Quit,
    Say(String),
    Empty,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        match (name, arg) {
            ("status", None) => Command::Status,
            ("clear", None) => Command::Clear,
            ("discard", None) => Command::Discard,
            ("history", None) => Command::History,
            ("quit" | "exit", None) => Command::Quit,
            ("load", Some(id)) => match id.parse() {
                Ok(id) => Command::Load(id),
                Err(_) => Command::Invalid(format!("Not a conversation id: {id}")),
            },
            ("load", None) => Command::Invalid("Usage: /load <id>".into()),
            _ => Command::Invalid(format!("Unknown command: {line}")),
        }
    }
}

pub enum Flow {
    Continue(String),
    Quit,
}

pub fn execute(ctx: &CompanionContext, command: Command) -> Flow {
    let reply = match command {
        Command::Quit => return Flow::Quit,
        Command::Empty => String::new(),
        Command::Invalid(message) => message,
        Command::Status => {
            let session = ctx.current_session();
            format!(
                "status: {} | session {} ({} messages) | {} archived",
                ctx.connection_status(),
                session.id,
                session.messages.len(),
                ctx.conversations().len()
            )
        }
        Command::Clear => {
            let session = ctx.clear_session(true);
            format!("Started session {}", session.id)
        }
        Command::Discard => {
            let session = ctx.clear_session(false);
            format!("Discarded; started session {}", session.id)
        }
        Command::History => {
            let conversations = ctx.conversations();
            if conversations.is_empty() {
                "No saved conversations".to_string()
            } else {
                conversations
                    .iter()
                    .map(|c| {
                        format!(
                            "{}  {}  {:>3} msgs  {}",
                            c.id,
                            c.created_at.format("%Y-%m-%d %H:%M"),
                            c.message_count,
                            c.preview
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Load(id) => match ctx.load_conversation(id) {
            Some(session) => format!(
                "Resumed conversation {id} as session {} ({} messages)",
                session.id,
                session.messages.len()
            ),
            None => format!("No conversation {id}"),
        },
        Command::Say(text) => {
            ctx.append_message(MessageDraft::new("user", text.as_str()));
            match ctx.connection_handle() {
                Some(handle) => match handle.send(text) {
                    Ok(()) => String::new(),
                    Err(e) => format!("Not sent ({e}); kept in session"),
                },
                None => "Not connected; kept in session".to_string(),
            }
        }
    };
    Flow::Continue(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confidant_core::connection::MemoryTransport;
    use confidant_core::persistence::MemoryStore;
    use std::sync::Arc;

    fn context() -> CompanionContext {
        CompanionContext::builder()
            .persistence(Arc::new(MemoryStore::new()))
            .transport(Arc::new(MemoryTransport::new()))
            .build()
            .unwrap()
    }

    fn reply(ctx: &CompanionContext, line: &str) -> String {
        match execute(ctx, Command::parse(line)) {
            Flow::Continue(reply) => reply,
            Flow::Quit => panic!("unexpected quit for {line:?}"),
        }
    }

    mod parsing {
        use super::*;

        #[test]
        fn plain_text_is_said() {
            assert_eq!(Command::parse("  hello there "), Command::Say("hello there".into()));
        }

        #[test]
        fn slash_commands() {
            assert_eq!(Command::parse("/status"), Command::Status);
            assert_eq!(Command::parse("/clear"), Command::Clear);
            assert_eq!(Command::parse("/discard"), Command::Discard);
            assert_eq!(Command::parse("/history"), Command::History);
            assert_eq!(Command::parse("/quit"), Command::Quit);
            assert_eq!(Command::parse("/load 1700000000123"), Command::Load(EntityId(1_700_000_000_123)));
        }

        #[test]
        fn bad_input_is_invalid() {
            assert!(matches!(Command::parse("/load"), Command::Invalid(_)));
            assert!(matches!(Command::parse("/load abc"), Command::Invalid(_)));
            assert!(matches!(Command::parse("/dance"), Command::Invalid(_)));
            assert!(matches!(Command::parse("/clear now"), Command::Invalid(_)));
            assert_eq!(Command::parse("   "), Command::Empty);
        }
    }

    mod executing {
        use super::*;

        #[test]
        fn say_without_connection_keeps_message() {
            let ctx = context();
            assert_eq!(reply(&ctx, "hi"), "Not connected; kept in session");
            assert_eq!(ctx.current_session().messages[0].role, "user");
            assert_eq!(ctx.current_session().messages[0].content, "hi");
        }

        #[test]
        fn clear_archives_and_discard_does_not() {
            let ctx = context();
            reply(&ctx, "first");
            reply(&ctx, "/clear");
            reply(&ctx, "second");
            reply(&ctx, "/discard");

            let archived = ctx.conversations();
            assert_eq!(archived.len(), 1);
            assert_eq!(archived[0].preview, "first");
            assert!(ctx.current_session().is_empty());
        }

        #[test]
        fn history_and_load() {
            let ctx = context();
            assert_eq!(reply(&ctx, "/history"), "No saved conversations");

            reply(&ctx, "tell me about owls");
            reply(&ctx, "/clear");
            let id = ctx.conversations()[0].id;

            assert!(reply(&ctx, "/history").contains("tell me about owls"));
            assert!(reply(&ctx, &format!("/load {id}")).starts_with("Resumed"));
            assert_eq!(ctx.current_session().loaded_from, Some(id));
            assert_eq!(reply(&ctx, "/load 1"), "No conversation 1");
        }

        #[test]
        fn status_reports_disconnected() {
            let ctx = context();
            assert!(reply(&ctx, "/status").starts_with("status: disconnected"));
        }

        #[test]
        fn quit_stops() {
            let ctx = context();
            assert!(matches!(execute(&ctx, Command::Quit), Flow::Quit));
        }
    }
}
