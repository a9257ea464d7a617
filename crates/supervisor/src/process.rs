use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{BackendEnv, Timings};
use crate::discovery::parse_capabilities;
use crate::schema::Capabilities;

const STDERR_TAIL_LINES: usize = 50;

type StderrTail = Arc<StdMutex<VecDeque<String>>>;

enum Readiness {
    Healthy,
    Exited(std::process::ExitStatus),
    Exhausted,
}

/// One spawned backend server and its endpoint.
///
/// `start` needs exclusive access; once started the handle is shared behind
/// an `Arc` so synthesis calls can overlap with each other and with `stop`.
pub struct ProcessHandle {
    model_id: String,
    model_name: String,
    port: u16,
    url: String,
    timings: Timings,
    client: reqwest::Client,
    capabilities: Capabilities,
    process: Mutex<Option<Child>>,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn new(model_id: &str, model_name: &str, port: u16, timings: Timings) -> Self {
        Self {
            model_id: model_id.to_string(),
            model_name: model_name.to_string(),
            port,
            url: format!("http://localhost:{port}"),
            timings,
            client: reqwest::Client::new(),
            capabilities: Capabilities::default(),
            process: Mutex::new(None),
            stderr_tail: Arc::new(StdMutex::new(VecDeque::new())),
            stderr_task: None,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Last lines the backend wrote to stderr.
    pub fn stderr_tail(&self) -> Vec<String> {
        match self.stderr_tail.lock() {
            Ok(t) => t.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Pid of the held process, which is also its process group id.
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|c| c.id())
    }

    pub async fn is_running(&self) -> bool {
        let mut guard = self.process.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Spawns the backend and waits for it to answer `GET /` with 200.
    pub async fn start(&mut self, env: &BackendEnv) -> bool {
        if env.reclaim_port {
            crate::port::reclaim(self.port, self.timings.reclaim_grace).await;
        }

        let child = match self.spawn(env) {
            Ok(c) => c,
            Err(e) => {
                error!(model_id = %self.model_id, port = self.port, "failed to spawn backend: {e}");
                return false;
            }
        };
        info!(
            model_id = %self.model_id,
            port = self.port,
            pid = child.id(),
            "backend spawned, waiting for health"
        );
        *self.process.get_mut() = Some(child);

        if !self.wait_healthy().await {
            return false;
        }

        self.capabilities = self.discover().await;
        info!(
            model_id = %self.model_id,
            port = self.port,
            speakers = self.capabilities.speakers.len(),
            languages = self.capabilities.languages.len(),
            "backend ready"
        );
        true
    }

    fn spawn(&mut self, env: &BackendEnv) -> std::io::Result<Child> {
        let mut cmd = Command::new(env.resolved_program());
        cmd.args(env.render_args(&self.model_name, self.port))
            .envs(env.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = cmd.spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let tail = self.stderr_tail.clone();
            let model_id = self.model_id.clone();
            self.stderr_task = Some(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(model_id = %model_id, "backend: {line}");
                    if let Ok(mut t) = tail.lock() {
                        if t.len() == STDERR_TAIL_LINES {
                            t.pop_front();
                        }
                        t.push_back(line);
                    }
                }
            }));
        }
        Ok(child)
    }

    /// Polls `GET /` until healthy, the process exits, or the budget of
    /// `health_poll_interval * health_poll_attempts` runs out.
    async fn wait_healthy(&mut self) -> bool {
        let budget = self
            .timings
            .health_poll_interval
            .saturating_mul(self.timings.health_poll_attempts);

        let outcome = match timeout(budget, self.poll_health()).await {
            Ok(outcome) => outcome,
            Err(_) => Readiness::Exhausted,
        };

        match outcome {
            Readiness::Healthy => true,
            Readiness::Exited(status) => {
                self.process.get_mut().take();
                let tail = self.collect_stderr().await;
                error!(
                    model_id = %self.model_id,
                    port = self.port,
                    %status,
                    stderr = %tail,
                    "backend exited during startup"
                );
                false
            }
            Readiness::Exhausted => {
                self.stop().await;
                let tail = self.collect_stderr().await;
                error!(
                    model_id = %self.model_id,
                    port = self.port,
                    budget_ms = budget.as_millis() as u64,
                    stderr = %tail,
                    "timeout waiting for backend to become healthy"
                );
                false
            }
        }
    }

    async fn poll_health(&mut self) -> Readiness {
        let url = format!("{}/", self.url);
        let attempts = self.timings.health_poll_attempts;

        for attempt in 1..=attempts {
            if let Some(status) = self.exited() {
                return Readiness::Exited(status);
            }

            match self
                .client
                .get(&url)
                .timeout(self.timings.health_request_timeout)
                .send()
                .await
            {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    debug!(model_id = %self.model_id, attempt, "health check passed");
                    return Readiness::Healthy;
                }
                Ok(resp) => {
                    debug!(model_id = %self.model_id, attempt, status = %resp.status(), "backend not ready");
                }
                Err(e) => {
                    debug!(model_id = %self.model_id, attempt, "backend not reachable: {e}");
                }
            }

            if attempt < attempts {
                sleep(self.timings.health_poll_interval).await;
            }
        }
        Readiness::Exhausted
    }

    fn exited(&mut self) -> Option<std::process::ExitStatus> {
        let child = self.process.get_mut().as_mut()?;
        match child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(model_id = %self.model_id, "failed to poll backend status: {e}");
                None
            }
        }
    }

    async fn collect_stderr(&mut self) -> String {
        if let Some(task) = self.stderr_task.take() {
            let _ = timeout(Duration::from_millis(500), task).await;
        }
        self.stderr_tail().join("\n")
    }

    /// Scrapes speakers and languages from the index page; never fails.
    async fn discover(&self) -> Capabilities {
        let url = format!("{}/", self.url);
        let page = match self
            .client
            .get(&url)
            .timeout(self.timings.health_request_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.text().await,
            Err(e) => Err(e),
        };

        match page {
            Ok(html) => match parse_capabilities(&html) {
                Some(caps) => caps,
                None => {
                    warn!(model_id = %self.model_id, "no speaker/language selectors on index page, using defaults");
                    Capabilities::default()
                }
            },
            Err(e) => {
                warn!(model_id = %self.model_id, "capability discovery failed, using defaults: {e}");
                Capabilities::default()
            }
        }
    }

    /// SIGTERM to the process group, SIGKILL after the grace period.
    ///
    /// Returns `true` when nothing is held.
    pub async fn stop(&self) -> bool {
        let mut guard = self.process.lock().await;
        let Some(child) = guard.as_mut() else {
            return true;
        };
        let Some(pid) = child.id() else {
            // already reaped
            guard.take();
            return true;
        };
        let pgid = pid as i32;

        info!(model_id = %self.model_id, port = self.port, pid, "stopping backend");
        if let Err(e) = killpg(pgid, libc::SIGTERM) {
            if e.raw_os_error() == Some(libc::ESRCH) {
                let _ = child.try_wait();
                guard.take();
                return true;
            }
            error!(model_id = %self.model_id, pid, "failed to signal process group: {e}");
            return false;
        }

        let exited = matches!(timeout(self.timings.stop_grace, child.wait()).await, Ok(Ok(_)));
        if !exited {
            warn!(model_id = %self.model_id, pid, "backend did not exit after SIGTERM, killing");
            if let Err(e) = killpg(pgid, libc::SIGKILL) {
                if e.raw_os_error() != Some(libc::ESRCH) {
                    warn!(model_id = %self.model_id, pid, "SIGKILL failed: {e}");
                }
            }
            let _ = timeout(self.timings.stop_grace, child.wait()).await;
        }

        guard.take();
        info!(model_id = %self.model_id, port = self.port, "backend stopped");
        true
    }

    /// Calls `GET /api/tts`, retrying on connect errors, timeouts and 503.
    ///
    /// Unsupported speakers and languages are dropped from the request.
    /// `None` means retries ran out or the backend refused the request.
    pub async fn synthesize(
        &self,
        text: &str,
        speaker_id: Option<&str>,
        language_id: Option<&str>,
    ) -> Option<Bytes> {
        let mut params: Vec<(&str, &str)> = vec![("text", text), ("style_wav", "")];
        if let Some(speaker) = speaker_id {
            if self.capabilities.speakers.contains(speaker) {
                params.push(("speaker_id", speaker));
            } else {
                debug!(model_id = %self.model_id, speaker, "ignoring unsupported speaker");
            }
        }
        if let Some(language) = language_id {
            if self.capabilities.languages.contains(language) {
                params.push(("language_id", language));
            } else {
                debug!(model_id = %self.model_id, language, "ignoring unsupported language");
            }
        }

        let url = format!("{}/api/tts", self.url);
        let attempts = self.timings.synth_attempts;

        for attempt in 1..=attempts {
            let res = self
                .client
                .get(&url)
                .query(&params)
                .timeout(self.timings.synth_timeout)
                .send()
                .await;

            match res {
                Ok(resp) if resp.status() == StatusCode::OK => match resp.bytes().await {
                    Ok(body) => return Some(body),
                    Err(e) if e.is_timeout() => {
                        warn!(model_id = %self.model_id, attempt, "timed out reading audio: {e}");
                    }
                    Err(e) => {
                        error!(model_id = %self.model_id, "failed to read audio: {e}");
                        return None;
                    }
                },
                Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE => {
                    warn!(model_id = %self.model_id, attempt, "backend unavailable");
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    error!(model_id = %self.model_id, %status, body = %body, "synthesis failed");
                    return None;
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(model_id = %self.model_id, attempt, "synthesis request failed: {e}");
                }
                Err(e) => {
                    error!(model_id = %self.model_id, "synthesis request failed: {e}");
                    return None;
                }
            }

            if attempt < attempts {
                sleep(self.timings.synth_retry_delay).await;
            }
        }

        error!(model_id = %self.model_id, attempts, "synthesis retries exhausted");
        None
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(child) = self.process.get_mut().as_mut() {
            if let Some(pid) = child.id() {
                warn!(model_id = %self.model_id, pid, "handle dropped with live backend, killing");
                let _ = killpg(pid as i32, libc::SIGKILL);
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

fn killpg(pgid: i32, sig: libc::c_int) -> std::io::Result<()> {
    if unsafe { libc::killpg(pgid, sig) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
