//! In-process plugin transport: a dynamically loaded shared library whose
//! exported entry symbols implement the phase-dispatch contract.

use crate::dispatch::PluginHandle;
use async_trait::async_trait;
use libloading::{Library, Symbol};
use nylon_core::error::NylonError;
use nylon_core::session::{DispatchFlags, Phase, PhaseTerminal};
use std::sync::Arc;

/// Matches the `{ptr,len,flags}` return value the FFI export contract
/// requires. `flags` bit 0 is `http_end`; bits 1..3 carry the phase
/// terminal marker (0 = next, 1 = end, 2 = upgrade).
#[repr(C)]
struct PluginCallResult {
    ptr: *mut u8,
    len: i32,
    flags: u32,
}

type EntryFn = unsafe extern "C" fn(*const u8, i32) -> PluginCallResult;
type FreeFn = unsafe extern "C" fn(*mut u8);

fn decode_flags(flags: u32) -> DispatchFlags {
    let http_end = flags & 0b1 != 0;
    let terminal = match (flags >> 1) & 0b11 {
        1 => PhaseTerminal::End,
        2 => PhaseTerminal::Upgrade,
        _ => PhaseTerminal::Next,
    };
    DispatchFlags { http_end, terminal }
}

pub struct FfiTransport {
    name: String,
    library: Arc<Library>,
}

impl FfiTransport {
    /// # Safety
    /// Loading an arbitrary shared library executes its initializers; the
    /// caller is responsible for trusting `file_path`.
    pub unsafe fn load(name: String, file_path: &str) -> Result<Self, NylonError> {
        let library = Library::new(file_path)
            .map_err(|e| NylonError::PluginUnavailable(format!("{name}: load {file_path}: {e}")))?;
        Ok(Self { name, library: Arc::new(library) })
    }

    fn call_entry(&self, entry: &str, input: &[u8]) -> Result<(DispatchFlags, Vec<u8>), NylonError> {
        unsafe {
            let symbol: Symbol<EntryFn> = self
                .library
                .get(entry.as_bytes())
                .map_err(|e| NylonError::PluginProtocolError(format!("unresolved entry '{entry}': {e}")))?;
            let result = symbol(input.as_ptr(), input.len() as i32);
            let flags = decode_flags(result.flags);
            let bytes = if result.ptr.is_null() || result.len <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(result.ptr, result.len as usize).to_vec()
            };
            if !result.ptr.is_null() {
                if let Ok(free) = self.library.get::<FreeFn>(b"plugin_free") {
                    free(result.ptr);
                }
            }
            Ok((flags, bytes))
        }
    }
}

#[async_trait]
impl PluginHandle for FfiTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(
        &self,
        entry: &str,
        _phase: Phase,
        _session_id: u32,
        _request_id: &str,
        payload_bytes: &[u8],
        data_bytes: &[u8],
    ) -> Result<(DispatchFlags, Vec<u8>), NylonError> {
        // FFI calls are synchronous and must not block the worker thread
        // (§5): the invocation runs on the blocking-task pool.
        let library = Arc::clone(&self.library);
        let name = self.name.clone();
        let entry = entry.to_string();
        let mut input = Vec::with_capacity(payload_bytes.len() + data_bytes.len());
        input.extend_from_slice(payload_bytes);
        input.extend_from_slice(data_bytes);

        tokio::task::spawn_blocking(move || {
            let transport = FfiTransport { name, library };
            transport.call_entry(&entry, &input)
        })
        .await
        .map_err(|e| NylonError::Internal(format!("ffi blocking task panicked: {e}")))?
    }

    async fn initialize(&self, initial_config: &serde_json::Value) -> Result<(), NylonError> {
        let payload = serde_json::to_vec(initial_config).unwrap_or_default();
        self.call_entry("plugin_initialize", &payload).map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), NylonError> {
        self.call_entry("plugin_shutdown", &[]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_http_end_and_terminal_bits() {
        let flags = decode_flags(0b011);
        assert!(flags.http_end);
        assert_eq!(flags.terminal, PhaseTerminal::End);

        let flags = decode_flags(0b100);
        assert!(!flags.http_end);
        assert_eq!(flags.terminal, PhaseTerminal::Upgrade);

        let flags = decode_flags(0);
        assert!(!flags.http_end);
        assert_eq!(flags.terminal, PhaseTerminal::Next);
    }
}
