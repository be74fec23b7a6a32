#![allow(dead_code)]

use regbanksel::debug_utils::{self, DisplayFunction, GenericFunction};
use regbanksel::function::{Function, Inst, Opcode};
use regbanksel::regbank::BANK_CATALOG;
use regbanksel::{Mode, Options, RegBankError, RegBankSelect};

/// Validates `func`, runs bank selection on it and checks the result.
pub fn select(func: &mut GenericFunction, mode: Mode) -> Result<(), RegBankError> {
    let _ = pretty_env_logger::try_init();

    debug_utils::validate_function(&*func).unwrap();
    let mut regbanksel = RegBankSelect::new();
    regbanksel.run(func, &BANK_CATALOG, &Options { mode })?;
    log::debug!("{}", regbanksel.stats());
    debug_utils::validate_function(&*func).unwrap();
    debug_utils::check_bank_assignment(&*func, &BANK_CATALOG).unwrap();
    Ok(())
}

/// Runs bank selection on an already processed function and asserts that
/// nothing changes.
pub fn assert_idempotent(func: &mut GenericFunction, mode: Mode) {
    let before = DisplayFunction(&*func).to_string();
    select(func, mode).unwrap();
    let after = DisplayFunction(&*func).to_string();
    assert_eq!(before, after);
}

/// All instructions of the function in program order.
pub fn insts(func: &GenericFunction) -> Vec<Inst> {
    func.blocks()
        .flat_map(|block| func.block_insts(block).iter().copied())
        .collect()
}

/// Instructions with the given opcode in program order.
pub fn insts_with(func: &GenericFunction, opcode: Opcode) -> Vec<Inst> {
    insts(func)
        .into_iter()
        .filter(|&inst| func.inst_opcode(inst) == opcode)
        .collect()
}
