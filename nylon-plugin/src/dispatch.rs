use async_trait::async_trait;
use nylon_core::error::NylonError;
use nylon_core::session::{DispatchFlags, Phase};

/// The single coupling point between the phase pipeline and a plugin: a
/// uniform, transport-agnostic call contract. FFI and messaging transports
/// are interchangeable implementations of this trait; the phase pipeline
/// never knows which one backs a given plugin.
#[async_trait]
pub trait PluginHandle: Send + Sync {
    fn name(&self) -> &str;

    /// `dispatch(entry, phase, session_id, request_id, payload_bytes,
    /// data_bytes) -> (flags, data_bytes)`.
    async fn dispatch(
        &self,
        entry: &str,
        phase: Phase,
        session_id: u32,
        request_id: &str,
        payload_bytes: &[u8],
        data_bytes: &[u8],
    ) -> Result<(DispatchFlags, Vec<u8>), NylonError>;

    /// Sent once on startup (FFI: library load; Messaging: first successful
    /// connect) carrying the plugin's `initial_config`.
    async fn initialize(&self, initial_config: &serde_json::Value) -> Result<(), NylonError>;

    /// Sent on shutdown; the host unloads (FFI) only after this completes
    /// and the phase pipeline has quiesced.
    async fn shutdown(&self) -> Result<(), NylonError>;
}
