//! Checks that `GenericFunction::arbitrary` produces functions that pass
//! validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use regbanksel::debug_utils;
use regbanksel_fuzz::TestCase;

fuzz_target!(|t: TestCase| {
    // Ensure the logger is initialized.
    let _ = pretty_env_logger::try_init();

    debug_utils::validate_function(&t.func).unwrap();
});
