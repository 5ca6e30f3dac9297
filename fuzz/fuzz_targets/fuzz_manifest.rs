//! Fuzz target for manifest loading and planning.
//!
//! Arbitrary YAML must never panic the parser, the validator or the plan
//! engine.

#![no_main]

use libfuzzer_sys::fuzz_target;
use reconcile_core::model::{validate_spec, Manifest};
use reconcile_core::plan::{plan, Observed};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(manifests) = Manifest::parse_str(text) else {
        return;
    };
    for manifest in manifests {
        if validate_spec(manifest.identity.kind, &manifest.spec).is_err() {
            continue;
        }
        let record = manifest.to_record();
        let _ = plan(Some(&record), &Observed::absent());
    }
});
