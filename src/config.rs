//! Loader and upload configuration

/// Default upper bound on the raw buffer a container may declare (1 GiB).
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 1 << 30;

/// Configuration for loading and uploading a model
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Largest raw buffer size accepted from a container header
    pub max_buffer_size: u64,
    /// Upload meshlet, primitive, unique-index and cull streams alongside vertices
    pub upload_meshlets: bool,
    /// Prefix for GPU debug labels
    pub label: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            upload_meshlets: true,
            label: "model".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_buffer_size(mut self, size: u64) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn with_meshlet_upload(mut self, enabled: bool) -> Self {
        self.upload_meshlets = enabled;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
