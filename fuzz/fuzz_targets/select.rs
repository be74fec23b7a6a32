//! Runs bank selection on arbitrary functions and checks that the result only
//! uses legal bank combinations.

#![no_main]

use libfuzzer_sys::fuzz_target;
use regbanksel::regbank::BANK_CATALOG;
use regbanksel::{RegBankSelect, debug_utils};
use regbanksel_fuzz::TestCase;

fuzz_target!(|t: TestCase| {
    // Ensure the logger is initialized.
    let _ = pretty_env_logger::try_init();

    let mut func = t.func;
    let mut regbanksel = RegBankSelect::new();
    if regbanksel.run(&mut func, &BANK_CATALOG, &t.options).is_ok() {
        debug_utils::validate_function(&func).unwrap();
        debug_utils::check_bank_assignment(&func, &BANK_CATALOG).unwrap();
    }
});
