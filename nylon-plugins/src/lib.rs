pub mod request_header_modifier;
pub mod response_header_modifier;

use nylon_plugin::PluginHandle;
use std::collections::HashMap;
use std::sync::Arc;

/// The built-in modifiers, keyed by the plugin name a `MiddlewareStep::Call`
/// references them by. The host merges this map with the FFI/messaging
/// plugins `PluginRegistry::build` resolves from config before constructing
/// the final registry.
pub fn builtins() -> HashMap<String, Arc<dyn PluginHandle>> {
    let mut map: HashMap<String, Arc<dyn PluginHandle>> = HashMap::new();
    map.insert(request_header_modifier::NAME.to_string(), Arc::new(request_header_modifier::RequestHeaderModifier));
    map.insert(response_header_modifier::NAME.to_string(), Arc::new(response_header_modifier::ResponseHeaderModifier));
    map
}
