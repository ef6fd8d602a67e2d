//! Echo Bot Example
//!
//! Replies to `/start`, `/help` and `/ping`, echoes every other text
//! message, and acknowledges inline keyboard presses.
//!
//! # Usage
//!
//! ```bash
//! NECTAR_BOT__TOKEN=123456:ABC cargo run --package echo-bot
//! cargo run --package echo-bot -- --config nectar.toml --workers 4
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use nectar::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "echo-bot", about = "Echo bot built on Nectar")]
struct Args {
    /// Configuration file (defaults to nectar.toml in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bot token; overrides the configuration file and NECTAR_BOT__TOKEN
    #[arg(short, long, env = "BOT_TOKEN")]
    token: Option<String>,

    /// Configuration profile
    #[arg(short, long)]
    profile: Option<String>,
}

const HELP: &str = "\
/start - greeting
/help  - this text
/ping  - pong
Anything else is echoed back.";

// ============================================================================
// Handlers
// ============================================================================

/// Logs every message; registered first and never replies.
async fn log_message(ctx: Context, msg: Message) {
    let from = msg
        .from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .unwrap_or("unknown");
    info!(
        update_id = ctx.update_id(),
        chat = msg.chat.id,
        from,
        text = msg.text.as_deref().unwrap_or(""),
        "Message received"
    );
}

async fn start(ctx: Context, msg: Message) -> ApiResult<()> {
    let name = msg
        .from
        .as_ref()
        .map(|u| u.first_name.as_str())
        .unwrap_or("there");
    ctx.reply(format!("Hello, {name}! Send me anything and I will echo it.\n\n{HELP}"))
        .await?;
    Ok(())
}

async fn help(ctx: Context, _msg: Message) -> ApiResult<()> {
    ctx.reply(HELP).await?;
    Ok(())
}

async fn ping(ctx: Context, _msg: Message) -> ApiResult<Propagation> {
    ctx.reply("Pong!").await?;
    Ok(Propagation::Stop)
}

async fn echo(ctx: Context, msg: Message) -> ApiResult<()> {
    if let Some(text) = msg.text {
        ctx.send_chat_action(msg.chat.id, "typing").await?;
        ctx.reply(text).await?;
    }
    Ok(())
}

async fn button_pressed(ctx: Context, query: CallbackQuery) -> ApiResult<()> {
    let text = match query.data.as_deref() {
        Some(data) => format!("You pressed {data}"),
        None => "Pressed".to_string(),
    };
    ctx.answer_callback_query(&AnswerCallbackQuery::new(query.id).text(text))
        .await?;
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = NectarRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    if let Some(token) = args.token {
        builder = builder.token(token);
    }
    let runtime = builder.build()?;

    let commands = filters::command(["start", "help", "ping"]);
    let router = runtime.router();
    router.on_message(log_message).name("log");
    router
        .on_message(start)
        .filter(filters::command(["start"]))
        .name("start");
    router
        .on_message(help)
        .filter(filters::command(["help"]))
        .name("help");
    router
        .on_message(ping)
        .filter(filters::command(["ping"]))
        .name("ping");
    router
        .on_message(echo)
        .filter(filters::text() & !commands)
        .name("echo");
    router.on_callback_query(button_pressed).name("buttons");

    info!(handlers = router.len(), "Handlers registered");
    runtime.run().await?;
    Ok(())
}
