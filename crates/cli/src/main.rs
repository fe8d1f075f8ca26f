use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "speakbright")]
#[command(about = "SpeakBright server CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: SPEAKBRIGHT_CONFIG_PATH or ~/.speakbright/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the server (REST API + WebSocket real-time channel).
    Serve {
        /// Config file path (default: SPEAKBRIGHT_CONFIG_PATH or ~/.speakbright/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP and WebSocket port (default from config or 5000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat with the support companion over the server's WebSocket (interactive).
    Chat {
        /// Config file path (default: SPEAKBRIGHT_CONFIG_PATH or ~/.speakbright/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Bearer token (user id) to authenticate with an in-band auth frame.
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("speakbright {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, token }) => {
            if let Err(e) = run_chat(config, token).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!(
        "starting server on {}:{}",
        config.server.bind,
        config.server.port
    );
    lib::server::run_server(config).await
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    token: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = lib::config::load_config(config_path)?;
    let ws_url = format!("ws://{}:{}/ws", config.server.bind.trim(), config.server.port);
    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url).await?;

    if let Some(token) = token {
        let auth = serde_json::json!({ "type": "auth", "data": { "token": token } });
        ws.send(Message::Text(auth.to_string())).await?;
        match next_frame(&mut ws).await? {
            Some(frame) if frame.get("type").and_then(|t| t.as_str()) == Some("auth_success") => {
                let user_id = frame
                    .get("data")
                    .and_then(|d| d.get("userId"))
                    .and_then(|u| u.as_str())
                    .unwrap_or("-");
                println!("authenticated as {}", user_id);
            }
            Some(frame) => {
                anyhow::bail!(
                    "authentication failed: {}",
                    frame
                        .get("data")
                        .and_then(|d| d.get("message"))
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error")
                );
            }
            None => anyhow::bail!("connection closed during auth"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        let frame = serde_json::json!({ "type": "chat_message", "content": input });
        ws.send(Message::Text(frame.to_string())).await?;
        match next_frame(&mut ws).await? {
            Some(reply) if reply.get("type").and_then(|t| t.as_str()) == Some("ai_response") => {
                let data = reply.get("data").cloned().unwrap_or_default();
                println!(
                    "< {} [{} / {}]",
                    data.get("response").and_then(|r| r.as_str()).unwrap_or(""),
                    data.get("emotion").and_then(|e| e.as_str()).unwrap_or("-"),
                    data.get("supportType").and_then(|s| s.as_str()).unwrap_or("-"),
                );
            }
            Some(reply) => {
                eprintln!("chat error: {}", reply);
            }
            None => break,
        }
    }

    Ok(())
}

/// Next text frame parsed as JSON; None when the connection closes.
async fn next_frame<S>(ws: &mut S) -> anyhow::Result<Option<serde_json::Value>>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                return Ok(Some(serde_json::from_str(&text)?));
            }
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}
