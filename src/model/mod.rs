//! Model lifecycle management.
//!
//! The manager owns every heavy model and is the only component that can
//! change residency. It enforces strict mutual exclusion: at most one heavy
//! model is resident at any instant, so a stage transition always frees the
//! previous stage's device memory before the next load.

pub mod runner;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{JimakuError, Result};
use crate::hardware::{Device, PerformanceProfile};
use crate::providers::{SeparationProvider, TranscriptionProvider, TranslationProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelKind {
    Transcription,
    Translation,
    VocalSeparation,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Transcription => "transcription",
            ModelKind::Translation => "translation",
            ModelKind::VocalSeparation => "vocal-separation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Unloaded,
    Loading,
    Resident,
}

/// Lifecycle record for one managed model. Owned exclusively by the
/// manager; other components never hold a persistent reference.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub kind: ModelKind,
    pub residency: Residency,
    pub device: Option<Device>,
}

/// A loadable inference model. Implementations bind to exactly one explicit
/// device from the profile when loading.
#[async_trait]
pub trait ModelBackend: Send {
    async fn load(&mut self, profile: &PerformanceProfile) -> Result<()>;
    async fn unload(&mut self) -> Result<()>;

    fn as_transcription(&mut self) -> Option<&mut dyn TranscriptionProvider> {
        None
    }
    fn as_translation(&mut self) -> Option<&mut dyn TranslationProvider> {
        None
    }
    fn as_separation(&mut self) -> Option<&mut dyn SeparationProvider> {
        None
    }
}

struct ManagedModel {
    handle: ModelHandle,
    backend: Box<dyn ModelBackend>,
}

pub struct ModelManager {
    profile: PerformanceProfile,
    models: BTreeMap<ModelKind, ManagedModel>,
}

impl ModelManager {
    pub fn new(profile: PerformanceProfile) -> Self {
        Self {
            profile,
            models: BTreeMap::new(),
        }
    }

    /// Registers a backend for a model kind, initially unloaded.
    pub fn register(&mut self, kind: ModelKind, backend: Box<dyn ModelBackend>) {
        self.models.insert(
            kind,
            ManagedModel {
                handle: ModelHandle {
                    kind,
                    residency: Residency::Unloaded,
                    device: None,
                },
                backend,
            },
        );
    }

    pub fn profile(&self) -> &PerformanceProfile {
        &self.profile
    }

    /// Ensures `kind` is resident, releasing any other resident model first.
    /// Re-acquiring an already resident model is a no-op.
    pub async fn acquire(&mut self, kind: ModelKind) -> Result<&ModelHandle> {
        if !self.models.contains_key(&kind) {
            return Err(JimakuError::ModelLoad(format!(
                "no backend registered for {} model",
                kind.name()
            )));
        }

        if self.residency(kind) == Residency::Resident {
            debug!("{} model already resident", kind.name());
            return Ok(&self.models[&kind].handle);
        }

        // One heavy model at a time: evict everything else before loading.
        let resident: Vec<ModelKind> = self
            .models
            .values()
            .filter(|m| m.handle.residency != Residency::Unloaded && m.handle.kind != kind)
            .map(|m| m.handle.kind)
            .collect();
        for other in resident {
            self.release(other).await?;
        }

        let device = self.profile.device;
        let profile = self.profile.clone();
        let entry = self
            .models
            .get_mut(&kind)
            .ok_or_else(|| JimakuError::ModelLoad(format!("{} backend missing", kind.name())))?;

        info!("Loading {} model on {}", kind.name(), device);
        entry.handle.residency = Residency::Loading;

        if let Err(e) = entry.backend.load(&profile).await {
            // Partial loads must not leave resources behind.
            entry.handle.residency = Residency::Unloaded;
            entry.handle.device = None;
            if let Err(unload_err) = entry.backend.unload().await {
                warn!(
                    "Cleanup after failed {} load also failed: {}",
                    kind.name(),
                    unload_err
                );
            }
            return Err(JimakuError::ModelLoad(format!(
                "{} model failed to load: {}",
                kind.name(),
                e
            )));
        }

        entry.handle.residency = Residency::Resident;
        entry.handle.device = Some(device);
        Ok(&self.models[&kind].handle)
    }

    /// Releases the model if resident. Idempotent.
    pub async fn release(&mut self, kind: ModelKind) -> Result<()> {
        let Some(entry) = self.models.get_mut(&kind) else {
            return Ok(());
        };
        if entry.handle.residency == Residency::Unloaded {
            return Ok(());
        }

        info!("Releasing {} model", kind.name());
        entry.backend.unload().await?;
        entry.handle.residency = Residency::Unloaded;
        entry.handle.device = None;
        Ok(())
    }

    /// Releases every model. Called at run end and on error paths, so a
    /// failure to release one model never blocks releasing the rest.
    pub async fn release_all(&mut self) {
        let kinds: Vec<ModelKind> = self.models.keys().copied().collect();
        for kind in kinds {
            if let Err(e) = self.release(kind).await {
                warn!("Failed to release {} model: {}", kind.name(), e);
            }
        }
    }

    pub fn residency(&self, kind: ModelKind) -> Residency {
        self.models
            .get(&kind)
            .map(|m| m.handle.residency)
            .unwrap_or(Residency::Unloaded)
    }

    pub fn resident_count(&self) -> usize {
        self.models
            .values()
            .filter(|m| m.handle.residency == Residency::Resident)
            .count()
    }

    /// Resident transcription provider, acquiring the model if needed.
    pub async fn transcriber(&mut self) -> Result<&mut dyn TranscriptionProvider> {
        self.acquire(ModelKind::Transcription).await?;
        self.models
            .get_mut(&ModelKind::Transcription)
            .and_then(|m| m.backend.as_transcription())
            .ok_or_else(|| {
                JimakuError::ModelLoad("backend does not provide transcription".to_string())
            })
    }

    /// Resident translation provider, acquiring the model if needed.
    pub async fn translator(&mut self) -> Result<&mut dyn TranslationProvider> {
        self.acquire(ModelKind::Translation).await?;
        self.models
            .get_mut(&ModelKind::Translation)
            .and_then(|m| m.backend.as_translation())
            .ok_or_else(|| {
                JimakuError::ModelLoad("backend does not provide translation".to_string())
            })
    }

    /// Resident vocal separation provider, acquiring the model if needed.
    pub async fn separator(&mut self) -> Result<&mut dyn SeparationProvider> {
        self.acquire(ModelKind::VocalSeparation).await?;
        self.models
            .get_mut(&ModelKind::VocalSeparation)
            .and_then(|m| m.backend.as_separation())
            .ok_or_else(|| {
                JimakuError::ModelLoad("backend does not provide separation".to_string())
            })
    }
}
