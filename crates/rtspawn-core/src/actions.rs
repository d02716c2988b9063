use crate::env::EnvSource;
use crate::error::{Result, SpawnError};
use crate::flags::StdStream;

/// Caller supplied adjustments applied by the launcher.
///
/// `H` is the platform's borrowed descriptor or handle type. A redirect slot
/// holding `None` means "let the launcher decide" and can never collide with
/// descriptors 0, 1 or 2. The inherit list and the environment lists are
/// borrowed, never copied: they must outlive the actions, which in turn must
/// outlive the launch call.
#[derive(Debug, Clone)]
pub struct SpawnActions<'a, H: Copy> {
    redirect: [Option<H>; 3],
    inherit: &'a [H],
    env_changes: Option<&'a [&'a str]>,
    environ: Option<&'a [&'a str]>,
}

impl<H: Copy> Default for SpawnActions<'_, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, H: Copy> SpawnActions<'a, H> {
    pub fn new() -> Self {
        Self {
            redirect: [None; 3],
            inherit: &[],
            env_changes: None,
            environ: None,
        }
    }

    /// Overwrite all three redirect slots; `None` leaves a slot to the launcher
    pub fn set_redirect(&mut self, stdin: Option<H>, stdout: Option<H>, stderr: Option<H>) {
        self.redirect = [stdin, stdout, stderr];
    }

    pub fn redirect(&self, stream: StdStream) -> Option<H> {
        self.redirect[stream.index()]
    }

    /// Extra descriptors or handles the child must inherit
    pub fn set_inherit(&mut self, handles: &'a [H]) {
        self.inherit = handles;
    }

    pub fn inherit(&self) -> &'a [H] {
        self.inherit
    }

    /// Ordered `NAME=VALUE` / `NAME` directives applied to the parent environment
    pub fn set_env_changes(&mut self, directives: &'a [&'a str]) {
        self.env_changes = Some(directives);
    }

    /// Give the child exactly these `NAME=VALUE` entries
    pub fn set_environ(&mut self, entries: &'a [&'a str]) {
        self.environ = Some(entries);
    }

    pub fn env_source(&self) -> Result<EnvSource<'a>> {
        match (self.env_changes, self.environ) {
            (Some(_), Some(_)) => Err(SpawnError::InvalidArgument(
                "environment changes and a replacement environment are exclusive".to_string(),
            )),
            (Some(changes), None) => Ok(EnvSource::Changes(changes)),
            (None, Some(entries)) => Ok(EnvSource::Replace(entries)),
            (None, None) => Ok(EnvSource::Inherit),
        }
    }
}
