use log::{ error, info, warn };
use serde::{ Serialize, Deserialize };
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::io::{ AsyncBufReadExt, AsyncRead, BufReader };
use tokio::process::{ Child, Command };

use crate::config::{ AppConfig, AuthMethod };

const LOG_CAPACITY: usize = 1000;
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Error,
}

/// Snapshot of the backend process state, shaped for polling clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerStatus {
    pub status: ServerState,
    pub port: Option<u16>,
    pub error: Option<String>,
}

impl ServerStatus {
    fn stopped() -> Self {
        Self { status: ServerState::Stopped, port: None, error: None }
    }
}

type LogBuffer = Arc<Mutex<VecDeque<String>>>;

/// Controls the backend gateway process: spawn with config-derived
/// environment, capture its output into a capped log buffer, stop it
/// gracefully. Status reads check child liveness so a crashed backend
/// is noticed on the next poll.
pub struct ServerManager {
    executable: PathBuf,
    process: Option<Child>,
    status: ServerStatus,
    logs: LogBuffer,
}

impl ServerManager {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            process: None,
            status: ServerStatus::stopped(),
            logs: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn logs(&self) -> Vec<String> {
        match self.logs.lock() {
            Ok(logs) => logs.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn clear_logs(&self) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.clear();
        }
    }

    /// Spawn the backend with the given configuration, replacing any
    /// process already running.
    pub async fn start(
        &mut self,
        config: &AppConfig
    ) -> Result<ServerStatus, Box<dyn std::error::Error + Send + Sync>> {
        if self.process.is_some() {
            self.stop().await?;
        }

        self.status = ServerStatus {
            status: ServerState::Starting,
            port: None,
            error: None,
        };

        let mut cmd = Command::new(&self.executable);
        cmd.env("KIROAAS_MANAGED", "true")
            .env("PROXY_API_KEY", &config.proxy_api_key)
            .env("SERVER_HOST", &config.server_host)
            .env("SERVER_PORT", config.server_port.to_string())
            .env("KIRO_REGION", &config.kiro_region)
            .env("FIRST_TOKEN_TIMEOUT", config.first_token_timeout.to_string())
            .env("STREAMING_READ_TIMEOUT", config.streaming_read_timeout.to_string())
            .env("FAKE_REASONING", config.fake_reasoning.to_string())
            .env("FAKE_REASONING_MAX_TOKENS", config.fake_reasoning_max_tokens.to_string())
            .env("TRUNCATION_RECOVERY", config.truncation_recovery.to_string())
            .env("LOG_LEVEL", &config.log_level)
            .env("DEBUG_MODE", &config.debug_mode);

        match config.auth_method {
            AuthMethod::RefreshToken => {
                if let Some(token) = &config.refresh_token {
                    cmd.env("REFRESH_TOKEN", token);
                }
            }
            AuthMethod::CredsFile => {
                if let Some(file) = &config.kiro_creds_file {
                    cmd.env("KIRO_CREDS_FILE", file);
                }
            }
            AuthMethod::CliDb => {
                if let Some(db) = &config.kiro_cli_db_file {
                    cmd.env("KIRO_CLI_DB_FILE", db);
                }
            }
        }

        if let Some(proxy) = &config.vpn_proxy_url {
            cmd.env("VPN_PROXY_URL", proxy);
        }

        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());
        cmd.kill_on_drop(true);

        self.clear_logs();
        push_log(&self.logs, format!("[Debug] Starting server: {}", self.executable.display()));

        let mut child = cmd.spawn().map_err(|e| {
            push_log(&self.logs, format!("[Error] Failed to spawn: {}", e));
            format!("Failed to start server: {}", e)
        })?;

        if let Some(stdout) = child.stdout.take() {
            spawn_log_reader(stdout, Arc::clone(&self.logs), "Server");
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_reader(stderr, Arc::clone(&self.logs), "Server Error");
        }

        self.process = Some(child);
        self.status = ServerStatus {
            status: ServerState::Running,
            port: Some(config.server_port),
            error: None,
        };
        info!("Backend server started on port {}", config.server_port);

        Ok(self.status.clone())
    }

    /// Stop the backend: SIGTERM first, force kill after the deadline.
    pub async fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(mut child) = self.process.take() {
            terminate(&mut child);

            match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
                Ok(Ok(exit)) => {
                    info!("Backend server exited: {}", exit);
                }
                Ok(Err(e)) => {
                    return Err(format!("Error waiting for process: {}", e).into());
                }
                Err(_) => {
                    warn!("Backend server did not exit in time, killing");
                    child.kill().await.map_err(|e| format!("Failed to kill process: {}", e))?;
                }
            }
        }

        self.status = ServerStatus::stopped();
        Ok(())
    }

    /// Current status. Detects a child that exited on its own.
    pub fn status(&mut self) -> ServerStatus {
        if let Some(child) = &mut self.process {
            match child.try_wait() {
                Ok(Some(exit)) => {
                    self.process = None;
                    self.status = if exit.success() {
                        ServerStatus::stopped()
                    } else {
                        ServerStatus {
                            status: ServerState::Error,
                            port: None,
                            error: Some(format!("Backend exited: {}", exit)),
                        }
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to poll backend process: {}", e);
                }
            }
        }
        self.status.clone()
    }

    pub fn is_running(&mut self) -> bool {
        self.status().status == ServerState::Running
    }
}

fn push_log(logs: &LogBuffer, line: String) {
    if let Ok(mut logs) = logs.lock() {
        logs.push_back(line);
        while logs.len() > LOG_CAPACITY {
            logs.pop_front();
        }
    }
}

fn spawn_log_reader<R>(reader: R, logs: LogBuffer, tag: &'static str)
    where R: AsyncRead + Unpin + Send + 'static
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("[{}] {}", tag, line);
            push_log(&logs, line);
        }
    });
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    match child.id() {
        Some(pid) => unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_status_is_stopped() {
        let mut manager = ServerManager::new(PathBuf::from("kiro-gateway"));
        let status = manager.status();
        assert_eq!(status.status, ServerState::Stopped);
        assert!(status.port.is_none());
        assert!(!manager.is_running());
    }

    #[test]
    fn log_buffer_is_capped() {
        let logs: LogBuffer = Arc::new(Mutex::new(VecDeque::new()));
        for i in 0..(LOG_CAPACITY + 50) {
            push_log(&logs, format!("line {}", i));
        }
        let snapshot: Vec<String> = logs.lock().unwrap().iter().cloned().collect();
        assert_eq!(snapshot.len(), LOG_CAPACITY);
        assert_eq!(snapshot[0], "line 50");
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_error() {
        let mut manager = ServerManager::new(PathBuf::from("/nonexistent/kiro-gateway"));
        let result = manager.start(&AppConfig::default()).await;
        assert!(result.is_err());
        assert!(manager.logs().iter().any(|l| l.contains("Failed to spawn")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_and_stop_a_real_process() {
        // `yes` blocks forever with stdin closed, unlike `cat`.
        let mut manager = ServerManager::new(PathBuf::from("yes"));
        let status = manager.start(&AppConfig::default()).await.unwrap();
        assert_eq!(status.status, ServerState::Running);
        assert!(manager.is_running());

        manager.stop().await.unwrap();
        assert_eq!(manager.status().status, ServerState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_child_is_detected_on_poll() {
        let mut manager = ServerManager::new(PathBuf::from("true"));
        manager.start(&AppConfig::default()).await.unwrap();
        // `true` exits immediately; give it a moment.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.status().status, ServerState::Stopped);
    }
}
