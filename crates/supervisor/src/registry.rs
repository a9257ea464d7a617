use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::{BackendEnv, Timings, DEFAULT_BASE_PORT};
use crate::error::{Result, SupervisorError};
use crate::process::ProcessHandle;
use crate::schema::{ModelDescriptor, ModelStatus};

#[derive(Default)]
struct ModelRuntimeState {
    loaded: bool,
    handle: Option<Arc<ProcessHandle>>,
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, ModelRuntimeState>,
    active_model: Option<String>,
}

/// Catalog of models with at most one backend running at a time.
///
/// `inner` is only held for short reads and writes. `lifecycle` serializes
/// load/unload so a slow startup never blocks `list` or synthesis.
pub struct ModelRegistry {
    catalog: Vec<ModelDescriptor>,
    env: BackendEnv,
    timings: Timings,
    base_port: u16,
    inner: RwLock<Inner>,
    lifecycle: Mutex<()>,
}

impl ModelRegistry {
    pub fn new(catalog: Vec<ModelDescriptor>, env: BackendEnv) -> Self {
        let states = catalog
            .iter()
            .map(|d| (d.id.clone(), ModelRuntimeState::default()))
            .collect();
        Self {
            catalog,
            env,
            timings: Timings::default(),
            base_port: DEFAULT_BASE_PORT,
            inner: RwLock::new(Inner {
                states,
                active_model: None,
            }),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    fn descriptor(&self, id: &str) -> Result<&ModelDescriptor> {
        self.catalog
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| SupervisorError::UnknownModel(id.to_string()))
    }

    pub async fn active_model(&self) -> Option<String> {
        self.inner.read().await.active_model.clone()
    }

    pub async fn list(&self) -> BTreeMap<String, ModelStatus> {
        let inner = self.inner.read().await;
        self.catalog
            .iter()
            .map(|d| {
                let handle = inner
                    .states
                    .get(&d.id)
                    .filter(|s| s.loaded)
                    .and_then(|s| s.handle.as_ref());
                let status = ModelStatus {
                    name: d.name.clone(),
                    model_name: d.model_name.clone(),
                    loaded: handle.is_some(),
                    port: handle.map(|h| h.port()),
                    speakers: handle.map(|h| h.capabilities().speakers.clone()),
                    languages: handle.map(|h| h.capabilities().languages.clone()),
                };
                (d.id.clone(), status)
            })
            .collect()
    }

    /// Starts `id`, unloading the active model first.
    ///
    /// `Ok(false)` when the previous model could not be stopped or the new
    /// backend never became healthy.
    pub async fn load_model(&self, id: &str) -> Result<bool> {
        let descriptor = self.descriptor(id)?.clone();
        let _op = self.lifecycle.lock().await;

        let previous = self.inner.read().await.active_model.clone();
        if let Some(prev) = previous {
            if !self.unload_locked(&prev).await {
                error!(model_id = %id, previous = %prev, "failed to unload active model, aborting load");
                return Ok(false);
            }
        }

        let loaded = {
            let inner = self.inner.read().await;
            inner.states.values().filter(|s| s.loaded).count()
        };
        let Some(port) = u16::try_from(loaded)
            .ok()
            .and_then(|n| self.base_port.checked_add(n))
        else {
            error!(model_id = %id, base_port = self.base_port, loaded, "no port available");
            return Ok(false);
        };

        let mut handle = ProcessHandle::new(
            &descriptor.id,
            &descriptor.model_name,
            port,
            self.timings.clone(),
        );
        if !handle.start(&self.env).await {
            error!(model_id = %id, port, "failed to load model");
            return Ok(false);
        }

        let mut inner = self.inner.write().await;
        let state = inner.states.entry(descriptor.id.clone()).or_default();
        state.loaded = true;
        state.handle = Some(Arc::new(handle));
        inner.active_model = Some(descriptor.id);
        info!(model_id = %id, port, "loaded model");
        Ok(true)
    }

    pub async fn unload_model(&self, id: &str) -> Result<bool> {
        self.descriptor(id)?;
        let _op = self.lifecycle.lock().await;
        Ok(self.unload_locked(id).await)
    }

    /// Caller holds `lifecycle`.
    async fn unload_locked(&self, id: &str) -> bool {
        let handle = {
            let inner = self.inner.read().await;
            match inner.states.get(id) {
                Some(s) if s.loaded => s.handle.clone(),
                _ => return true,
            }
        };

        if let Some(h) = &handle {
            if !h.stop().await {
                error!(model_id = %id, port = h.port(), "failed to unload model");
                return false;
            }
        }

        let mut inner = self.inner.write().await;
        if let Some(state) = inner.states.get_mut(id) {
            state.loaded = false;
            state.handle = None;
        }
        if inner.active_model.as_deref() == Some(id) {
            inner.active_model = None;
        }
        info!(model_id = %id, "unloaded model");
        true
    }

    /// Routes to `model_id`, or the active model when absent or empty.
    ///
    /// `Ok(None)` is a backend failure after retries.
    pub async fn synthesize(
        &self,
        text: &str,
        model_id: Option<&str>,
        speaker_id: Option<&str>,
        language_id: Option<&str>,
    ) -> Result<Option<Bytes>> {
        let (id, handle) = {
            let inner = self.inner.read().await;
            let id = match model_id.filter(|m| !m.is_empty()) {
                Some(m) => m.to_string(),
                None => inner
                    .active_model
                    .clone()
                    .ok_or(SupervisorError::NoActiveModel)?,
            };
            self.descriptor(&id)?;
            let handle = inner
                .states
                .get(&id)
                .filter(|s| s.loaded)
                .and_then(|s| s.handle.clone())
                .ok_or_else(|| SupervisorError::ModelNotLoaded(id.clone()))?;
            (id, handle)
        };

        let audio = handle.synthesize(text, speaker_id, language_id).await;
        if audio.is_none() {
            warn!(model_id = %id, "synthesis produced no audio");
        }
        Ok(audio)
    }

    /// Unloads whatever is active. Used on controller shutdown.
    pub async fn shutdown(&self) -> bool {
        let _op = self.lifecycle.lock().await;
        let active = self.inner.read().await.active_model.clone();
        match active {
            Some(id) => self.unload_locked(&id).await,
            None => true,
        }
    }
}
