//! UTF-16 environment blocks for `CREATE_UNICODE_ENVIRONMENT`.
//!
//! A block is a sequence of `NAME=VALUE` strings, each terminated by a NUL,
//! with one more NUL closing the block.

use rtspawn_core::{EnvSource, Environment, MAX_ENV_ENTRIES, Result};
use std::ffi::OsStr;

/// UTF-16 code units of `s`, without a terminator
pub(crate) fn wide(s: &OsStr) -> Vec<u16> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        s.encode_wide().collect()
    }
    #[cfg(not(windows))]
    {
        s.to_string_lossy().encode_utf16().collect()
    }
}

/// UTF-16 code units of `s` followed by a NUL
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn wide_nul(s: &OsStr) -> Vec<u16> {
    let mut units = wide(s);
    units.push(0);
    units
}

pub fn encode_env_block(env: &Environment) -> Vec<u16> {
    let mut block = Vec::new();
    for (name, value) in env.iter() {
        block.extend(wide(name));
        block.push(u16::from(b'='));
        block.extend(wide(value));
        block.push(0);
    }
    // An empty block still needs both terminators
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}

/// Resolve an environment source into a block, or `None` to inherit the
/// parent's environment unchanged.
///
/// The table holds at most [`MAX_ENV_ENTRIES`] entries and directives may
/// only grow it to one less; anything larger is rejected with `TooLarge`.
pub fn env_block_for(source: EnvSource<'_>) -> Result<Option<Vec<u16>>> {
    let env = source.resolve(Some(MAX_ENV_ENTRIES))?;
    Ok(env.as_ref().map(encode_env_block))
}
