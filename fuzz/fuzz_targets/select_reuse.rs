//! Checks that re-using `RegBankSelect` for multiple functions works.

#![no_main]

use libfuzzer_sys::fuzz_target;
use regbanksel::regbank::BANK_CATALOG;
use regbanksel::{RegBankSelect, debug_utils};
use regbanksel_fuzz::TestCase;

fuzz_target!(|ts: [TestCase; 4]| {
    // Ensure the logger is initialized.
    let _ = pretty_env_logger::try_init();

    let mut regbanksel = RegBankSelect::new();
    for t in ts {
        let mut func = t.func;
        if regbanksel.run(&mut func, &BANK_CATALOG, &t.options).is_ok() {
            debug_utils::check_bank_assignment(&func, &BANK_CATALOG).unwrap();
        }
    }
});
