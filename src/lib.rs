pub mod chat;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod history;
pub mod models;
pub mod server;

use async_trait::async_trait;
use log::{ error, info };
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

use chat::{ ChatSession, TranscriptPublisher };
use cli::Args;
use gateway::{ select_model, Endpoint, GatewayClient };
use history::{ initialize_conversation_store, ConversationStore };
use models::chat::{ Message, Role };
use server::{ ServerManager, ServerState };

/// Publisher for the terminal front end: prints only the not-yet-shown
/// suffix of the assistant reply, so deltas appear as they stream in.
struct StdoutPublisher {
    progress: Mutex<(usize, usize)>, // (message count seen, bytes printed)
}

impl StdoutPublisher {
    fn new() -> Self {
        Self { progress: Mutex::new((0, 0)) }
    }
}

#[async_trait]
impl TranscriptPublisher for StdoutPublisher {
    async fn publish(&self, messages: &[Message]) {
        let Some(last) = messages.last() else {
            return;
        };
        if last.role != Role::Assistant {
            return;
        }

        let Ok(mut progress) = self.progress.lock() else {
            return;
        };
        let (ref mut seen, ref mut printed) = *progress;
        if *seen != messages.len() {
            *seen = messages.len();
            *printed = 0;
        }

        let text = last.text();
        if let Some(suffix) = text.get(*printed..) {
            print!("{}", suffix);
            let _ = std::io::stdout().flush();
            *printed = text.len();
        }
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config_path = match &args.config_path {
        Some(p) => PathBuf::from(p),
        None => config::default_config_path()?,
    };
    let app_config = config::load_config(&config_path).await?;

    info!("--- Console Configuration ---");
    info!("Config Path: {}", config_path.display());
    info!("Gateway Host: {}", args.gateway_host.as_deref().unwrap_or(&app_config.server_host));
    info!("Gateway Port: {}", args.gateway_port.unwrap_or(app_config.server_port));
    info!("Requested Model: {}", args.model);
    info!("Spawn Backend: {}", args.spawn_backend);
    if args.spawn_backend {
        info!("Backend Executable: {}", args.backend_executable);
    }
    info!("-----------------------------");

    let store = initialize_conversation_store(&args)?;

    let mut manager = if args.spawn_backend {
        let mut m = ServerManager::new(PathBuf::from(&args.backend_executable));
        m.start(&app_config).await?;

        // One poll interval of grace, then verify it is still up.
        tokio::time::sleep(Duration::from_millis(args.status_poll_interval_ms)).await;
        let status = m.status();
        if status.status != ServerState::Running {
            for line in m.logs() {
                error!("[Server] {}", line);
            }
            return Err(
                format!(
                    "Backend failed to start: {}",
                    status.error.as_deref().unwrap_or("unknown error")
                ).into()
            );
        }
        Some(m)
    } else {
        None
    };

    let endpoint = Endpoint::new(
        args.gateway_host.clone().unwrap_or_else(|| app_config.server_host.clone()),
        args.gateway_port.unwrap_or(app_config.server_port)
    );
    let api_key = args.gateway_api_key
        .clone()
        .unwrap_or_else(|| app_config.proxy_api_key.clone());
    let client = GatewayClient::new(endpoint, &api_key)?;

    let available = client.list_models().await;
    let model = select_model(&args.model, &available);
    info!("Available models: {}", available.join(", "));
    info!("Using model: {}", model);

    let session = ChatSession::new(client, Arc::clone(&store), model);
    let result = repl(session, store, manager.as_mut()).await;

    if let Some(m) = manager.as_mut() {
        m.stop().await?;
    }

    result
}

async fn repl(
    mut session: ChatSession,
    store: Arc<dyn ConversationStore>,
    mut manager: Option<&mut ServerManager>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    println!("KiroaaS console. /new starts a conversation, /list shows saved ones,");
    println!("/open <n> resumes one, /status shows the backend, /quit exits.");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "/quit" => {
                break;
            }
            "/new" => {
                session.start_new();
                println!("Started a new conversation.");
            }
            "/list" => {
                let conversations = store.load_all().await?;
                if conversations.is_empty() {
                    println!("No saved conversations.");
                }
                for (i, conv) in conversations.iter().enumerate() {
                    println!("{}. {} ({} messages)", i + 1, conv.title, conv.messages.len());
                }
            }
            "/status" => {
                match manager.as_mut() {
                    Some(m) => {
                        let status = m.status();
                        println!("Backend: {:?}", status.status);
                        if let Some(err) = status.error {
                            println!("Error: {}", err);
                        }
                    }
                    None => println!("Backend: externally managed"),
                }
            }
            _ if input.starts_with("/open ") => {
                let conversations = store.load_all().await?;
                match input["/open ".len()..].trim().parse::<usize>() {
                    Ok(n) if n >= 1 && n <= conversations.len() => {
                        let conv = conversations[n - 1].clone();
                        println!("Resumed: {}", conv.title);
                        session.open(conv);
                    }
                    _ => println!("Usage: /open <number from /list>"),
                }
            }
            _ => {
                let publisher = StdoutPublisher::new();
                match session.send(input, &[], &publisher).await {
                    Ok(true) => println!(),
                    Ok(false) => {} // empty submission, nothing sent
                    Err(e) => error!("Failed to persist conversation: {}", e),
                }
            }
        }
    }

    Ok(())
}
