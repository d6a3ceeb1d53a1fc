use bitcoin::Script;

use crate::error::Error;

/// Derivation path of a wallet-owned script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Path {
    pub account: u32,
    pub branch: u32,
    pub index: u32,
}

/// Maps an output script to the wallet account path that controls it.
///
/// Implemented by the key/address layer; a script that no wallet key
/// controls resolves to `None`, which is a benign no-match rather than an
/// error.
pub trait PathResolver: Send + Sync {
    fn path(&self, script: &Script) -> Result<Option<Path>, Error>;

    fn has_path(&self, script: &Script) -> Result<bool, Error> {
        Ok(self.path(script)?.is_some())
    }
}
