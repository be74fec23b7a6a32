//! Checks that running bank selection on its own output changes nothing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use regbanksel::debug_utils::DisplayFunction;
use regbanksel::regbank::BANK_CATALOG;
use regbanksel::RegBankSelect;
use regbanksel_fuzz::TestCase;

fuzz_target!(|t: TestCase| {
    // Ensure the logger is initialized.
    let _ = pretty_env_logger::try_init();

    let mut func = t.func;
    let mut regbanksel = RegBankSelect::new();
    if regbanksel.run(&mut func, &BANK_CATALOG, &t.options).is_err() {
        return;
    }
    let before = format!("{}", DisplayFunction(&func));
    regbanksel
        .run(&mut func, &BANK_CATALOG, &t.options)
        .expect("second run failed on legal input");
    let after = format!("{}", DisplayFunction(&func));
    assert_eq!(before, after);
});
