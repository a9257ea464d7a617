use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use supervisor::config::{BackendEnv, DEFAULT_BASE_PORT};
use supervisor::ModelDescriptor;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub venv_path: PathBuf,
    pub server_bin: PathBuf,
    pub use_cuda: bool,
    pub base_port: u16,
    pub reclaim_port: bool,
    pub catalog: Vec<ModelDescriptor>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("TTS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let venv_path = expand_home(
            &std::env::var("TTS_VENV_PATH").unwrap_or_else(|_| "~/test/tts/.venv".to_string()),
        );
        let server_bin = PathBuf::from(
            std::env::var("TTS_SERVER_BIN").unwrap_or_else(|_| "tts-server".to_string()),
        );
        let use_cuda = flag("TTS_USE_CUDA", true);
        let reclaim_port = flag("TTS_RECLAIM_PORT", true);

        let base_port = match std::env::var("TTS_BASE_PORT") {
            Ok(v) => v
                .parse::<u16>()
                .with_context(|| format!("TTS_BASE_PORT is not a port number: {v}"))?,
            Err(_) => DEFAULT_BASE_PORT,
        };
        if base_port == 0 {
            bail!("TTS_BASE_PORT must be non-zero");
        }

        let catalog = match std::env::var("TTS_CATALOG") {
            Ok(path) => supervisor::load_catalog(&expand_home(&path))
                .with_context(|| format!("Failed to load catalog from {path}"))?,
            Err(_) => supervisor::default_catalog(),
        };

        Ok(Self {
            bind_addr,
            venv_path,
            server_bin,
            use_cuda,
            base_port,
            reclaim_port,
            catalog,
        })
    }

    pub fn backend_env(&self) -> BackendEnv {
        BackendEnv {
            program: self.server_bin.clone(),
            use_accelerator: self.use_cuda,
            reclaim_port: self.reclaim_port,
            ..BackendEnv::default()
        }
        .with_venv(&self.venv_path)
    }
}

fn flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(default)
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
