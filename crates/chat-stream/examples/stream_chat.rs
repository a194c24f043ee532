use std::io::Write as _;

use chat_stream::prelude::*;
use tokio::io::AsyncBufReadExt as _;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    let _ = dotenvy::dotenv();
    chat_stream::init_tracing();

    let mut conversation = Conversation::connect(ChatConfig::from_env()?)?;
    let mut events = conversation.subscribe();
    let handle = conversation.spawn();

    let printer = tokio::spawn(async move {
        let mut printed: Option<(MessageId, usize)> = None;
        while let Some(event) = events.recv().await {
            match event {
                TranscriptEvent::Updated(snapshot) => {
                    let Some(last) = snapshot.last().filter(|m| m.role() == Role::Assistant) else {
                        continue;
                    };
                    let already = match printed {
                        Some((id, len)) if id == last.id() => len,
                        _ => 0,
                    };
                    print!("{}", &last.text()[already..]);
                    if !last.is_pending() {
                        println!();
                    }
                    let _ = std::io::stdout().flush();
                    printed = Some((last.id(), last.text().len()));
                }
                TranscriptEvent::StreamFailed { failure, .. } => eprintln!("[stream failed: {failure}]"),
            }
        }
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        handle.submit(line)?;
    }

    handle.shutdown().await?;
    let _ = printer.await;
    Ok(())
}
