use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_PORT: u16 = 5002;

/// Default argv template for the backend server.
pub const DEFAULT_ARGS: &[&str] = &[
    "--model_name",
    "{model}",
    "--use_cuda",
    "{use_cuda}",
    "--port",
    "{port}",
];

/// How a backend process is launched: runtime environment plus command template.
#[derive(Clone, Debug)]
pub struct BackendEnv {
    /// Virtualenv root. `None` runs `program` from the inherited environment.
    pub venv: Option<PathBuf>,
    pub program: PathBuf,
    /// Argument template; `{model}`, `{port}` and `{use_cuda}` are substituted per argument.
    pub args: Vec<String>,
    pub use_accelerator: bool,
    pub extra_env: Vec<(String, String)>,
    /// Kill whatever listens on the target port before spawning.
    pub reclaim_port: bool,
}

impl Default for BackendEnv {
    fn default() -> Self {
        Self {
            venv: None,
            program: PathBuf::from("tts-server"),
            args: DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
            use_accelerator: true,
            extra_env: Vec::new(),
            reclaim_port: true,
        }
    }
}

impl BackendEnv {
    pub fn with_venv(mut self, venv: impl Into<PathBuf>) -> Self {
        self.venv = Some(venv.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    /// Relative programs are looked up in `<venv>/bin` first.
    pub fn resolved_program(&self) -> PathBuf {
        if self.program.is_absolute() {
            return self.program.clone();
        }
        if let Some(venv) = &self.venv {
            let candidate = venv.join("bin").join(&self.program);
            if candidate.exists() {
                return candidate;
            }
        }
        self.program.clone()
    }

    pub fn render_args(&self, model_name: &str, port: u16) -> Vec<String> {
        let port = port.to_string();
        let use_cuda = if self.use_accelerator { "true" } else { "false" };
        self.args
            .iter()
            .map(|a| {
                a.replace("{model}", model_name)
                    .replace("{port}", &port)
                    .replace("{use_cuda}", use_cuda)
            })
            .collect()
    }

    /// Variables injected into the child; equivalent to activating the venv.
    pub fn env_vars(&self) -> Vec<(String, OsString)> {
        let mut vars = Vec::new();
        if let Some(venv) = &self.venv {
            vars.push(("VIRTUAL_ENV".to_string(), venv.clone().into_os_string()));
            vars.push(("PATH".to_string(), prepend_path(&venv.join("bin"))));
        }
        vars.push(("PYTHONUNBUFFERED".to_string(), OsString::from("1")));
        for (k, v) in &self.extra_env {
            vars.push((k.clone(), OsString::from(v)));
        }
        vars
    }
}

fn prepend_path(dir: &Path) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_owned())
}

/// Polling budgets and retry delays.
#[derive(Clone, Debug)]
pub struct Timings {
    pub health_poll_interval: Duration,
    pub health_poll_attempts: u32,
    pub health_request_timeout: Duration,
    pub synth_timeout: Duration,
    pub synth_attempts: u32,
    pub synth_retry_delay: Duration,
    pub stop_grace: Duration,
    pub reclaim_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            health_poll_interval: Duration::from_secs(1),
            health_poll_attempts: 120,
            health_request_timeout: Duration::from_secs(5),
            synth_timeout: Duration::from_secs(30),
            synth_attempts: 3,
            synth_retry_delay: Duration::from_secs(1),
            stop_grace: Duration::from_secs(5),
            reclaim_grace: Duration::from_secs(1),
        }
    }
}
