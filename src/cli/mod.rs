use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Storage Args ---
    /// Path to the application config JSON file. Defaults to the platform data directory.
    #[arg(long, env = "KIROAAS_CONFIG_PATH")]
    pub config_path: Option<String>,

    /// Path to the conversations JSON file. Defaults to the platform data directory.
    #[arg(long, env = "KIROAAS_CONVERSATIONS_PATH")]
    pub conversations_path: Option<String>,

    // --- Gateway Args ---
    /// Gateway host override. Falls back to the configured server host.
    #[arg(long, env = "GATEWAY_HOST")]
    pub gateway_host: Option<String>,

    /// Gateway port override. Falls back to the configured server port.
    #[arg(long, env = "GATEWAY_PORT")]
    pub gateway_port: Option<u16>,

    /// Bearer API key override for gateway requests. Falls back to the configured proxy API key.
    #[arg(long, env = "GATEWAY_API_KEY")]
    pub gateway_api_key: Option<String>,

    /// Model to request; validated against the gateway's model list on startup.
    #[arg(long, env = "CHAT_MODEL", default_value = "claude-sonnet-4-5")]
    pub model: String,

    // --- Backend Process Args ---
    /// Spawn the backend gateway process on startup and stop it on exit.
    #[arg(long, env = "SPAWN_BACKEND", default_value = "false")]
    pub spawn_backend: bool,

    /// Path to the backend gateway executable.
    #[arg(long, env = "BACKEND_EXECUTABLE", default_value = "kiro-gateway")]
    pub backend_executable: String,

    /// Interval in milliseconds between backend status polls.
    #[arg(long, env = "STATUS_POLL_INTERVAL_MS", default_value = "2000")]
    pub status_poll_interval_ms: u64,
}
