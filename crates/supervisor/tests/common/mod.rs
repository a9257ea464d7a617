#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use supervisor::{BackendEnv, Timings};

pub const WAV: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt ";

pub const INDEX_PAGE: &str = r#"<html><body>
<select id="speaker_id" name=speaker_id>
  <option value="Ana Florence" SELECTED>Ana Florence</option>
  <option value="Viktor Eka">Viktor Eka</option>
</select>
<select id="language_id" name=language_id>
  <option value="en">en</option>
  <option value="de">de</option>
</select>
</body></html>"#;

/// Scripted reply for one `/api/tts` call.
#[derive(Clone, Debug)]
pub enum Reply {
    Audio,
    Status(u16),
    Delay(Duration),
}

#[derive(Default)]
pub struct BackendState {
    /// Number of initial `GET /` calls answered with 503.
    pub unhealthy_polls: usize,
    pub health_hits: usize,
    /// `GET /` accepts the connection but never answers.
    pub hang_index: bool,
    pub page: String,
    pub script: VecDeque<Reply>,
    pub synth_hits: usize,
    pub last_query: Option<HashMap<String, String>>,
}

#[derive(Clone)]
pub struct FakeBackend {
    pub port: u16,
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub async fn spawn(unhealthy_polls: usize, script: Vec<Reply>) -> Self {
        let state = Arc::new(Mutex::new(BackendState {
            unhealthy_polls,
            page: INDEX_PAGE.to_string(),
            script: script.into(),
            ..Default::default()
        }));
        let app = Router::new()
            .route("/", get(index))
            .route("/api/tts", get(tts))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { port, state }
    }

    pub fn set_page(&self, page: &str) {
        self.state.lock().unwrap().page = page.to_string();
    }

    pub fn hang_index(&self) {
        self.state.lock().unwrap().hang_index = true;
    }

    pub fn health_hits(&self) -> usize {
        self.state.lock().unwrap().health_hits
    }

    pub fn synth_hits(&self) -> usize {
        self.state.lock().unwrap().synth_hits
    }

    pub fn last_query(&self) -> HashMap<String, String> {
        self.state.lock().unwrap().last_query.clone().unwrap_or_default()
    }
}

async fn index(State(state): State<Arc<Mutex<BackendState>>>) -> Response {
    let (hang, response) = {
        let mut s = state.lock().unwrap();
        s.health_hits += 1;
        let response = if s.health_hits <= s.unhealthy_polls {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        } else {
            Html(s.page.clone()).into_response()
        };
        (s.hang_index, response)
    };
    if hang {
        std::future::pending::<()>().await;
    }
    response
}

async fn tts(
    State(state): State<Arc<Mutex<BackendState>>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let reply = {
        let mut s = state.lock().unwrap();
        s.synth_hits += 1;
        s.last_query = Some(query);
        s.script.pop_front().unwrap_or(Reply::Audio)
    };
    match reply {
        Reply::Audio => audio(),
        Reply::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            format!("backend error {code}"),
        )
            .into_response(),
        Reply::Delay(d) => {
            tokio::time::sleep(d).await;
            audio()
        }
    }
}

fn audio() -> Response {
    ([(header::CONTENT_TYPE, "audio/wav")], WAV.to_vec()).into_response()
}

/// Binds and releases an ephemeral port so nothing listens on it.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn fast_timings() -> Timings {
    Timings {
        health_poll_interval: Duration::from_millis(50),
        health_poll_attempts: 20,
        health_request_timeout: Duration::from_millis(500),
        synth_timeout: Duration::from_millis(300),
        synth_attempts: 3,
        synth_retry_delay: Duration::from_millis(20),
        stop_grace: Duration::from_millis(500),
        reclaim_grace: Duration::from_millis(10),
    }
}

/// A backend "process" that just stays alive; the fake server answers for it.
pub fn sleeper_env() -> BackendEnv {
    command_env("sleep", &["30"])
}

/// A long-running backend that writes its pid (and so its process group id) to `pidfile`.
pub fn pidfile_env(pidfile: &Path) -> BackendEnv {
    let script = format!("echo $$ > '{}'; exec sleep 30", pidfile.display());
    command_env("sh", &["-c", &script])
}

/// Waits for a pidfile written by [`pidfile_env`].
pub async fn read_pid(pidfile: &Path) -> i32 {
    for _ in 0..100 {
        if let Ok(s) = std::fs::read_to_string(pidfile) {
            if let Ok(pid) = s.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no pid written to {}", pidfile.display());
}

pub fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

pub fn command_env(program: &str, args: &[&str]) -> BackendEnv {
    BackendEnv {
        reclaim_port: false,
        ..BackendEnv::default()
    }
    .with_program(program, args.iter().map(|a| a.to_string()).collect())
}
