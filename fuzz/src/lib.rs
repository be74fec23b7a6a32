use std::fmt;

use arbitrary::{Arbitrary, Result, Unstructured};
use regbanksel::Options;
use regbanksel::debug_utils::GenericFunction;

/// Common implementation of a test case used by all fuzz targets.
pub struct TestCase {
    pub func: GenericFunction,
    pub options: Options,
}

impl Arbitrary<'_> for TestCase {
    fn arbitrary(u: &mut Unstructured) -> Result<Self> {
        // Ensure the logger is initialized.
        let _ = pretty_env_logger::try_init();

        let options = u.arbitrary()?;
        log::trace!("Using options: {options:?}");
        let func = GenericFunction::arbitrary_with_config(u, Default::default())?;
        Ok(TestCase { func, options })
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?}", self.options)?;
        writeln!(f, "{}", self.func)
    }
}
