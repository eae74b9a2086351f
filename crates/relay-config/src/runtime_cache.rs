use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Result;
use tracing::debug;

use relay_core::lock_unpoisoned;

use crate::{
    load_openapi_index, load_runtime_profile, OpenApiIndex, RuntimeProfile,
    RuntimeProfileOverrides,
};

/// Drops cached runtime configuration so later reads observe external edits.
pub trait RuntimeCacheInvalidator: Send + Sync {
    fn invalidate_runtime_caches(&self);
}

/// Source locations and overrides for a [`RuntimeCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCacheOptions {
    pub profile_path: PathBuf,
    pub overrides: RuntimeProfileOverrides,
}

/// Memoized runtime profile and OpenAPI index, loaded lazily on first use.
#[derive(Debug)]
pub struct RuntimeCache {
    options: RuntimeCacheOptions,
    profile: Mutex<Option<Arc<RuntimeProfile>>>,
    openapi: Mutex<Option<Arc<OpenApiIndex>>>,
}

impl RuntimeCache {
    pub fn new(options: RuntimeCacheOptions) -> Self {
        Self {
            options,
            profile: Mutex::new(None),
            openapi: Mutex::new(None),
        }
    }

    pub fn profile_path(&self) -> &Path {
        self.options.profile_path.as_path()
    }

    /// Returns the resolved profile, loading it from disk when not cached.
    pub fn profile(&self) -> Result<Arc<RuntimeProfile>> {
        let mut cached = lock_unpoisoned(&self.profile);
        if let Some(profile) = cached.as_ref() {
            return Ok(Arc::clone(profile));
        }
        let mut profile = load_runtime_profile(&self.options.profile_path)?;
        profile.apply_overrides(&self.options.overrides);
        debug!(
            path = %self.options.profile_path.display(),
            "loaded runtime profile"
        );
        let profile = Arc::new(profile);
        *cached = Some(Arc::clone(&profile));
        Ok(profile)
    }

    /// Returns the OpenAPI index for the profile's spec; empty when none is set.
    pub fn openapi_index(&self) -> Result<Arc<OpenApiIndex>> {
        let profile = self.profile()?;
        let mut cached = lock_unpoisoned(&self.openapi);
        if let Some(index) = cached.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = match profile.openapi_spec.as_ref() {
            Some(path) => load_openapi_index(path)?,
            None => OpenApiIndex::default(),
        };
        debug!(operations = index.len(), "indexed openapi operations");
        let index = Arc::new(index);
        *cached = Some(Arc::clone(&index));
        Ok(index)
    }

    pub fn invalidate(&self) {
        lock_unpoisoned(&self.profile).take();
        lock_unpoisoned(&self.openapi).take();
        debug!(
            path = %self.options.profile_path.display(),
            "invalidated runtime caches"
        );
    }
}

impl RuntimeCacheInvalidator for RuntimeCache {
    fn invalidate_runtime_caches(&self) {
        self.invalidate();
    }
}
