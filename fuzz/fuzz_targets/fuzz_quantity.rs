//! Fuzz target for resource quantity parsing.
//!
//! Arbitrary strings must parse or fail cleanly, and every accepted
//! quantity must re-parse from its canonical form to the same value.

#![no_main]

use libfuzzer_sys::fuzz_target;
use reconcile_core::model::Quantity;

fuzz_target!(|input: &str| {
    if let Ok(quantity) = Quantity::parse(input) {
        let canonical = quantity.to_string();
        let reparsed = Quantity::parse(&canonical).expect("canonical form parses");
        assert_eq!(reparsed, quantity);
    }
});
