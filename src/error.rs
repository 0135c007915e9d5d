use thiserror::Error;

/// Problems found in the configuration document before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("stream {stream}: encoder channel {channel}: unknown payload type {value:?}")]
    UnknownPayloadType {
        stream: String,
        channel: u32,
        value: String,
    },

    #[error("stream {stream}: encoder channel {channel}: unknown rate control mode {value:?}")]
    UnknownRcMode {
        stream: String,
        channel: u32,
        value: String,
    },

    #[error("stream {stream}: encoder channel {channel} already used by stream {owner}")]
    DuplicateChannel {
        stream: String,
        channel: u32,
        owner: String,
    },

    #[error("stream {stream}: capture group {group} out of range (max {max})")]
    GroupOutOfRange { stream: String, group: u32, max: u32 },

    #[error("stream {stream}: capture group {group} already used by stream {owner}")]
    DuplicateGroup {
        stream: String,
        group: u32,
        owner: String,
    },

    #[error("stream {stream}: zero frame rate {num}/{den}")]
    ZeroFrameRate { stream: String, num: u32, den: u32 },

    #[error("stream {stream}: encoder channel {channel}: missing v4l2 device path")]
    MissingDevicePath { stream: String, channel: u32 },

    #[error("stream {stream}: no encoders")]
    NoEncoders { stream: String },
}

/// Why an encoder worker stopped before shutdown was requested.
#[derive(Debug, Error)]
pub enum WorkerFailure {
    /// Binding, channel creation, activation or sink setup failed. The worker
    /// never entered its drain loop.
    #[error("setup failed: {0:#}")]
    Setup(anyhow::Error),

    /// Retrieval, release or sink write failed inside the drain loop.
    #[error("stream failed: {0:#}")]
    Stream(anyhow::Error),
}

impl WorkerFailure {
    pub fn is_setup(&self) -> bool {
        matches!(self, WorkerFailure::Setup(_))
    }
}
