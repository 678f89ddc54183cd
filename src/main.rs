use std::io::{self, Write};
use std::time::Duration;

use colored::*;
use futures::StreamExt;

use shadow_agent_runtime::core::ProgressEvent;
use shadow_agent_runtime::logging;
use shadow_agent_runtime::runtime::{create_chunk_channel, LogObserver};
use shadow_agent_runtime::{
    text_message, AgentOutput, AgentRef, AgentResponseChunk, Context, FunctionAgent,
    InvokeOptions, Message, RuntimeConfig, TokenUsage,
};

/// Streams a canned answer word by word from its own task
fn billing_agent() -> AgentRef {
    FunctionAgent::new("billing", |input: Message, _ctx| async move {
        let question = input
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let (tx, stream) = create_chunk_channel();
        tokio::spawn(async move {
            let answer = format!(
                "Billing here. About \"{}\": I have refunded the duplicate charge.",
                question
            );
            for word in answer.split_inclusive(' ') {
                if tx.send_text("message", word).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
            let _ = tx.send_usage(TokenUsage::new(42, 17)).await;
        });
        Ok::<_, anyhow::Error>(stream)
    })
    .with_description("Answers billing and refund questions")
    .into_ref()
}

/// Routes anything about money to billing
fn triage_agent() -> AgentRef {
    FunctionAgent::new("triage", |input: Message, _ctx| async move {
        let text = input
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_lowercase();

        if ["charge", "refund", "invoice", "bill"]
            .iter()
            .any(|word| text.contains(word))
        {
            return Ok::<_, anyhow::Error>(AgentOutput::transfer_to_named("billing"));
        }
        Ok(AgentOutput::Message(text_message(
            "message",
            "Triage here. I could not find a team for that, try mentioning billing.",
        )))
    })
    .with_description("Sends each request to the right team")
    .into_ref()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env()?;
    let _guard = logging::init_logging_with(&config.log)?;

    let question = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let question = if question.is_empty() {
        "I was charged twice this month".to_string()
    } else {
        question
    };

    let ctx = Context::builder()
        .with_limits(config.limits)
        .with_skill(billing_agent())
        .with_observer(std::sync::Arc::new(LogObserver))
        .build();
    let triage = triage_agent();

    println!("{} {}", "User:".cyan().bold(), question);

    let mut stream = ctx.invoke_stream(
        &triage,
        text_message("message", question),
        InvokeOptions::new()
            .with_progress_chunks()
            .with_active_agent()
            .with_metadata(),
    )?;
    let active = stream.take_active_agent();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            AgentResponseChunk::Progress(progress) => match progress.event {
                ProgressEvent::Start { .. } => {
                    println!("{}", format!("[{} started]", progress.agent).bright_black())
                }
                ProgressEvent::End { .. } => {
                    println!("\n{}", format!("[{} finished]", progress.agent).bright_black())
                }
                ProgressEvent::Failed { error } => println!(
                    "\n{} {}",
                    format!("[{} failed]", progress.agent).red(),
                    error
                ),
            },
            AgentResponseChunk::Delta(delta) => {
                if let Some(text) = delta.text.as_ref().and_then(|t| t.get("message")) {
                    print!("{}", text.green());
                    io::stdout().flush()?;
                }
                if let Some(meta) = delta.json.as_ref().and_then(|j| j.get("$meta")) {
                    println!("{} {}", "Usage:".yellow().bold(), meta["usage"]);
                }
            }
        }
    }

    if let Some(active) = active {
        println!("{} {}", "Answered by:".yellow().bold(), active.await?.name());
    }
    Ok(())
}
