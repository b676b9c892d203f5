use std::sync::{Arc, Mutex};

/// Static mutex holding the global configuration, initialized lazily.
static GLOBAL_CONFIG: Mutex<Option<Arc<GlobalConfig>>> = Mutex::new(None);

/// Global planner configuration.
///
/// Loaded once from a `tenperm.toml` found in the current directory or
/// one of its parents; defaults apply field by field when the file or a
/// field is absent.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Autotuner settings.
    #[serde(default)]
    pub autotune: AutotuneConfig,

    /// Cost-model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Plan-cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Autotuner settings.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AutotuneConfig {
    /// How many of the analytically best candidates are measured.
    #[serde(default = "default_shortlist")]
    pub shortlist: usize,
}

/// Cost-model settings.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ModelConfig {
    /// Upper bound on the number of representative outer-volume positions
    /// the model samples when a tensor is too large to enumerate.
    #[serde(default = "default_mbar_samples")]
    pub mbar_samples: usize,
}

/// Plan-cache settings.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CacheConfig {
    /// Number of plans the cache retains.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_shortlist() -> usize {
    5
}

fn default_mbar_samples() -> usize {
    32
}

fn default_cache_capacity() -> usize {
    32
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            shortlist: default_shortlist(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            mbar_samples: default_mbar_samples(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl GlobalConfig {
    /// Retrieve the current global configuration, loading it from the
    /// current directory on first use.
    pub fn get() -> Arc<Self> {
        let mut state = match GLOBAL_CONFIG.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.is_none() {
            *state = Some(Arc::new(Self::from_current_dir()));
        }
        state
            .as_ref()
            .cloned()
            .unwrap_or_else(|| Arc::new(Self::default()))
    }

    /// Set the global configuration.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read; it
    /// cannot be overridden once observed.
    pub fn set(config: Self) {
        let mut state = match GLOBAL_CONFIG.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Load the configuration from `tenperm.toml` in the current
    /// directory or the closest parent holding one; defaults otherwise.
    pub fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            let file = dir.join("tenperm.toml");
            if let Ok(content) = std::fs::read_to_string(&file) {
                match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        log::warn!(
                            "Unable to parse config file {file:?}, using defaults ({err})."
                        );
                        return Self::default();
                    }
                }
            }
            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }
}
