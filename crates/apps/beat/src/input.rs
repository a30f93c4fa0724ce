//! Typed command parsing
//!
//! Plain lines are drafts to submit; lines starting with `/` are commands.
//! Message numbers are the 1-based positions shown by the renderer.

use anyhow::{Context, Result, bail};

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Submit text as a send, reply or edit depending on composer mode
    Say(String),
    /// Show conversations, optionally filtered
    List(Option<String>),
    /// Open the nth conversation of the last listing
    Open(usize),
    Reply(usize),
    Edit(usize),
    Delete { index: usize, for_everyone: bool },
    React { index: usize, kind: String },
    /// Toggle the nth message in the forward selection
    Select(usize),
    Forward(Vec<String>),
    SendFile(String),
    /// Resend a failed message, or re-issue its failed change
    Retry(usize),
    /// Drop the failed change on a message
    Discard(usize),
    Cancel,
    Help,
    Quit,
}

pub const HELP: &str = "\
/list [filter]         show conversations
/open <n>              open conversation n
/reply <n>             reply to message n
/edit <n>              edit message n (type the new text next)
/delete <n> [all]      delete message n for you, or for everyone
/react <n> <kind>      like, love, laugh, wow, sad, angry
/select <n>            toggle message n for forwarding
/forward <user>...     forward the selection
/send-file <path>      upload an image, video, audio file or document
/retry <n>             resend failed message n, or retry its failed change
/discard <n>           undo the failed change on message n
/cancel                leave reply, edit or forward mode
/quit";

pub fn parse(line: &str) -> Result<Command> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let command = match name {
        "list" | "ls" => Command::List((!args.is_empty()).then(|| args.join(" "))),
        "open" => Command::Open(index(&args, 0)?),
        "reply" => Command::Reply(index(&args, 0)?),
        "edit" => Command::Edit(index(&args, 0)?),
        "delete" => Command::Delete {
            index: index(&args, 0)?,
            for_everyone: matches!(args.get(1), Some(&"all")),
        },
        "react" => Command::React {
            index: index(&args, 0)?,
            kind: args.get(1).context("missing reaction kind")?.to_string(),
        },
        "select" => Command::Select(index(&args, 0)?),
        "forward" => {
            if args.is_empty() {
                bail!("usage: /forward <user>...");
            }
            Command::Forward(args.iter().map(|a| a.to_string()).collect())
        }
        "send-file" => {
            if args.is_empty() {
                bail!("usage: /send-file <path>");
            }
            Command::SendFile(args.join(" "))
        }
        "retry" => Command::Retry(index(&args, 0)?),
        "discard" => Command::Discard(index(&args, 0)?),
        "cancel" => Command::Cancel,
        "help" | "?" => Command::Help,
        "quit" | "q" => Command::Quit,
        other => bail!("unknown command /{other}, try /help"),
    };
    Ok(command)
}

fn index(args: &[&str], pos: usize) -> Result<usize> {
    let raw = args.get(pos).context("missing number")?;
    let n: usize = raw
        .parse()
        .with_context(|| format!("not a number: {raw}"))?;
    if n == 0 {
        bail!("numbers start at 1");
    }
    Ok(n - 1)
}
