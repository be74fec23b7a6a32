//! Bank selection on randomly generated functions.

#![cfg(feature = "arbitrary")]

mod common;

use arbitrary::Unstructured;
use common::{assert_idempotent, select};
use regbanksel::function::Opcode;
use regbanksel::{Mode, RegBankError};
use regbanksel::debug_utils::{ArbitraryFunctionConfig, GenericFunction, validate_function};

/// Deterministic byte stream so failures can be reproduced from the seed.
fn random_bytes(mut seed: u64, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed >> 24) as u8
        })
        .collect()
}

fn generate(seed: u64, config: &ArbitraryFunctionConfig) -> GenericFunction {
    let bytes = random_bytes(seed, 4096);
    let mut u = Unstructured::new(&bytes);
    GenericFunction::arbitrary_with_config(&mut u, config.clone()).unwrap()
}

#[test]
fn generated_functions_are_valid() {
    let config = ArbitraryFunctionConfig::default();
    for seed in 1..=64 {
        let func = generate(seed, &config);
        validate_function(&func).unwrap_or_else(|err| panic!("seed {seed}: {err}\n{func}"));
    }
}

/// Without pinned banks, only export intrinsics can fail since they require
/// some of their inputs in scalar registers.
#[test]
fn unassigned_functions_select() {
    let config = ArbitraryFunctionConfig {
        preassigned_bank_chance: 0,
        ..Default::default()
    };
    for seed in 1..=64 {
        for mode in [Mode::Fast, Mode::Greedy] {
            let mut func = generate(seed, &config);
            match select(&mut func, mode) {
                Ok(()) => assert_idempotent(&mut func, mode),
                Err(RegBankError::InvalidMapping {
                    opcode: Opcode::IntrinsicSideEffects,
                    ..
                }) => {}
                Err(err) => panic!("seed {seed}: {err}"),
            }
        }
    }
}

#[test]
fn preassigned_functions_select_or_fail_cleanly() {
    let config = ArbitraryFunctionConfig::default();
    let mut selected = 0;
    for seed in 1..=64 {
        for mode in [Mode::Fast, Mode::Greedy] {
            let mut func = generate(seed, &config);
            if select(&mut func, mode).is_ok() {
                assert_idempotent(&mut func, mode);
                selected += 1;
            }
        }
    }
    assert!(selected > 0);
}
