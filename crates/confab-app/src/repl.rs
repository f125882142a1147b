//! Interactive terminal chat driving the orchestrator.
//!
//! Plain lines are sent as messages. Slash commands manage attachments,
//! voice input and artifacts. Orchestrator events are rendered as they
//! arrive, so streamed text appears delta by delta.

use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use confab_chat::{extract_all, ChatError, ChatOrchestrator};
use confab_core::events::{ChatEvent, FinishReason, NoticeLevel};
use confab_core::types::{Attachment, Role};

/// Length of the silent buffer pushed for a recording. The stand-in
/// transcriber ignores the audio; the remote one needs a non-empty clip.
const SILENCE_SAMPLES: usize = 16_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    Attach { target: String, content_type: Option<String> },
    Detach(String),
    Record,
    Stop,
    Cancel,
    Artifacts,
    Artifact(String),
    Close,
    Input,
    State,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplCommand::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return ReplCommand::Send(line.to_string());
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::to_string);
        let extra = parts.next().map(str::to_string);

        match (name, arg) {
            ("attach", Some(target)) => ReplCommand::Attach {
                target,
                content_type: extra,
            },
            ("detach", Some(url)) => ReplCommand::Detach(url),
            ("record", _) => ReplCommand::Record,
            ("stop", _) => ReplCommand::Stop,
            ("cancel", _) => ReplCommand::Cancel,
            ("artifacts", _) => ReplCommand::Artifacts,
            ("artifact", Some(id)) => ReplCommand::Artifact(id),
            ("close", _) => ReplCommand::Close,
            ("input", _) => ReplCommand::Input,
            ("state", _) => ReplCommand::State,
            ("help", _) => ReplCommand::Help,
            ("quit", _) | ("exit", _) => ReplCommand::Quit,
            _ => ReplCommand::Unknown(line.to_string()),
        }
    }
}

const HELP: &str = "\
Type a message and press enter to send it.
  /attach <path|url> [type]  attach an image or file to the next message
  /detach <url>              remove a pending attachment
  /record, /stop             record voice; the transcript lands in the input buffer
  /cancel                    stop the streaming response
  /artifacts                 list artifacts in this conversation
  /artifact <id>, /close     show or close an artifact
  /input                     show the input buffer
  /state                     dump the session state as JSON
  /quit                      leave";

/// Guess a content type from a file extension.
pub fn content_type_for(target: &str) -> &'static str {
    let ext = Path::new(target)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Turn a local file into a data URL; anything else is used as a URL.
fn attachment_for(target: &str, content_type: Option<String>) -> std::io::Result<Attachment> {
    let content_type = content_type.unwrap_or_else(|| content_type_for(target).to_string());
    let path = Path::new(target);
    if path.is_file() {
        let bytes = std::fs::read(path)?;
        let url = format!("data:{};base64,{}", content_type, BASE64_STANDARD.encode(bytes));
        return Ok(Attachment::new(url, content_type));
    }
    Ok(Attachment::new(target, content_type))
}

fn render(event: &ChatEvent) {
    let mut out = std::io::stdout();
    match event {
        ChatEvent::TurnStarted { .. } => {
            let _ = write!(out, "assistant> ");
        }
        ChatEvent::DeltaReceived { text, .. } => {
            let _ = write!(out, "{}", text);
        }
        ChatEvent::TurnFinished { reason, .. } => match reason {
            FinishReason::Completed => {
                let _ = writeln!(out);
            }
            FinishReason::Cancelled => {
                let _ = writeln!(out, " [cancelled]");
            }
            FinishReason::Failed(_) => {
                let _ = writeln!(out, " [interrupted]");
            }
        },
        ChatEvent::ArtifactUpdated { artifact } if !artifact.generating => {
            let _ = write!(out, " [artifact {}: {}]", artifact.id, artifact.title);
        }
        ChatEvent::ArtifactSelected { artifact } => {
            let _ = writeln!(
                out,
                "--- {} ({:?}{}) ---\n{}\n---",
                artifact.id,
                artifact.kind,
                artifact
                    .language
                    .as_deref()
                    .map(|l| format!(", {}", l))
                    .unwrap_or_default(),
                artifact.content
            );
        }
        ChatEvent::SessionBound { session } => {
            if let Some(id) = session.id {
                let _ = writeln!(out, "[session {}]", id);
            }
        }
        ChatEvent::TranscriptAppended { text } => {
            let _ = writeln!(out, "[transcript] {}", text);
        }
        ChatEvent::AttachmentsChanged {
            attachments,
            artifact_refs,
        } => {
            let _ = writeln!(
                out,
                "[{} attachment(s), {} artifact ref(s) pending]",
                attachments.len(),
                artifact_refs.len()
            );
        }
        ChatEvent::VoiceStatus {
            recording,
            transcribing,
        } => {
            if *recording {
                let _ = writeln!(out, "[recording]");
            } else if *transcribing {
                let _ = writeln!(out, "[transcribing]");
            }
        }
        ChatEvent::Notice { level, message } => {
            let tag = match level {
                NoticeLevel::Info => "info",
                NoticeLevel::Warning => "warning",
                NoticeLevel::Error => "error",
            };
            eprintln!("\n[{}] {}", tag, message);
        }
        _ => {}
    }
    let _ = out.flush();
}

fn print_history(chat: &ChatOrchestrator) {
    for turn in chat.messages() {
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("{}> {}", who, turn.content);
    }
}

/// Run the chat loop until `/quit` or end of input.
pub async fn run(chat: ChatOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = BroadcastStream::new(chat.subscribe());
    let renderer = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => render(&event),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Renderer fell behind");
                }
            }
        }
    });

    print_history(&chat);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Send(text) => {
                let buffered = chat.input();
                let text = if buffered.is_empty() {
                    text
                } else {
                    format!("{} {}", buffered, text)
                };
                chat.set_input(text);
                match chat.submit_input() {
                    Ok(_) => {}
                    Err(ChatError::StreamInProgress) => {
                        println!("(still answering; /cancel to stop)");
                    }
                    // Already reported as a notice.
                    Err(ChatError::AuthConfig { .. }) => {}
                    Err(e) => println!("(not sent: {})", e),
                }
            }
            ReplCommand::Attach {
                target,
                content_type,
            } => match attachment_for(&target, content_type) {
                Ok(attachment) => chat.attach([attachment])?,
                Err(e) => println!("(cannot read {}: {})", target, e),
            },
            ReplCommand::Detach(url) => chat.remove_attachment(&url)?,
            ReplCommand::Record => {
                if let Err(e) = chat.start_recording() {
                    println!("({})", e);
                } else {
                    chat.push_audio(&vec![0.0; SILENCE_SAMPLES])?;
                }
            }
            ReplCommand::Stop => {
                if let Err(e) = chat.stop_recording().await {
                    println!("({})", e);
                }
            }
            ReplCommand::Cancel => {
                if !chat.cancel() {
                    println!("(nothing to cancel)");
                }
            }
            ReplCommand::Artifacts => {
                for turn in chat.messages().iter().filter(|t| t.role == Role::Assistant) {
                    for artifact in extract_all(&turn.content) {
                        println!("  {}  {:?}  {}", artifact.id, artifact.kind, artifact.title);
                    }
                }
            }
            ReplCommand::Artifact(id) => {
                if let Err(e) = chat.select_artifact(&id) {
                    println!("({})", e);
                }
            }
            ReplCommand::Close => chat.close_artifact(),
            ReplCommand::Input => println!("input: {:?}", chat.input()),
            ReplCommand::State => println!("{}", serde_json::to_string_pretty(&chat.snapshot())?),
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(line) => println!("(unknown command: {}; try /help)", line),
        }
    }

    chat.cancel();
    chat.wait_idle().await;
    renderer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_is_send() {
        assert_eq!(
            ReplCommand::parse("  hello there "),
            ReplCommand::Send("hello there".into())
        );
        assert_eq!(ReplCommand::parse("   "), ReplCommand::Empty);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ReplCommand::parse("/attach shot.png"),
            ReplCommand::Attach {
                target: "shot.png".into(),
                content_type: None
            }
        );
        assert_eq!(
            ReplCommand::parse("/attach https://x/y image/jpeg"),
            ReplCommand::Attach {
                target: "https://x/y".into(),
                content_type: Some("image/jpeg".into())
            }
        );
        assert_eq!(ReplCommand::parse("/artifact fib"), ReplCommand::Artifact("fib".into()));
        assert_eq!(ReplCommand::parse("/exit"), ReplCommand::Quit);
        assert!(matches!(ReplCommand::parse("/attach"), ReplCommand::Unknown(_)));
        assert!(matches!(ReplCommand::parse("/frobnicate"), ReplCommand::Unknown(_)));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a/b/photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("doc.pdf"), "application/pdf");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_attachment_for_local_file_is_data_url() {
        let dir = std::env::temp_dir().join(format!("confab-repl-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pixel.png");
        std::fs::write(&path, b"ABC").unwrap();

        let attachment = attachment_for(path.to_str().unwrap(), None).unwrap();
        assert_eq!(attachment.url, "data:image/png;base64,QUJD");
        assert!(attachment.is_image());

        let remote = attachment_for("https://example.com/cat.gif", None).unwrap();
        assert_eq!(remote.url, "https://example.com/cat.gif");
        assert_eq!(remote.content_type, "image/gif");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
