#![no_main]

use devtools_runtime::HandlerRegistry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut registry = HandlerRegistry::new();

    if let Ok(method) = std::str::from_utf8(data) {
        // Lookups and removals on arbitrary method names must not panic.
        let _ = registry.has_handler(method);
        let _ = registry.unregister(method);
    }

    // Edge shapes.
    let _ = registry.has_handler("");
    let long_name = "a".repeat(10_000);
    let _ = registry.has_handler(&long_name);
    assert!(registry.is_empty());
    assert!(registry.method_names().is_empty());
});
