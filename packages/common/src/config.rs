use serde::Deserialize;

/// Worker pool settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DispatcherConfig {
    /// Number of workers started at boot. Default: 8.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queue depth at which a saturation warning is logged. Default: 1000.
    #[serde(default = "default_saturation_threshold")]
    pub saturation_threshold: usize,
}

fn default_workers() -> usize {
    8
}
fn default_saturation_threshold() -> usize {
    1000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            saturation_threshold: default_saturation_threshold(),
        }
    }
}

/// Piece-commitment engine settings.
#[derive(Debug, Deserialize, Clone)]
pub struct CommpConfig {
    /// Concurrent leaf hashers. 0 means one per available CPU. Default: 0.
    #[serde(default)]
    pub parallelism: usize,
    /// Padded leaf size in bytes, a power of two. Default: 8 MiB.
    #[serde(default = "default_padded_leaf_size")]
    pub padded_leaf_size: u64,
}

fn default_padded_leaf_size() -> u64 {
    8 << 20
}

impl CommpConfig {
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for CommpConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            padded_leaf_size: default_padded_leaf_size(),
        }
    }
}
