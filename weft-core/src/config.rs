use std::path::PathBuf;

/// Bitset over the recognized options passed to the server as-is.
///
/// Kept as a plain transparent `u32` rather than pulling in `bitflags`:
/// the set is small and fixed, and no crate in this workspace already
/// depends on `bitflags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientFlags(u32);

impl ClientFlags {
    pub const NONE: ClientFlags = ClientFlags(0);
    pub const LOGIN: ClientFlags = ClientFlags(1 << 0);
    pub const CONTROL_CONTROL: ClientFlags = ClientFlags(1 << 1);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: ClientFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn insert(self, other: ClientFlags) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ClientFlags {
    type Output = ClientFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.insert(rhs)
    }
}

/// What to do once attached: run a single command, or hand the user an
/// interactive default. Mutually exclusive with [`ClientConfig::shellcmd`]
/// by construction, not by folding the two into one enum — the wire shape
/// the identity sender produces (`COMMAND` xor `SHELL`) maps directly onto
/// "one of these two fields is set."
#[derive(Debug, Clone)]
pub enum Command {
    /// `-c`-style: a single shell command string, forwarded as a `SHELL`
    /// frame and executed by the server-chosen shell.
    ShellCmd(String),
    /// An ordered sequence of command tokens, forwarded as a `COMMAND`
    /// frame (packed argc + NUL-separated argv blob). Empty means "no
    /// explicit command", i.e. attach to the default session behavior.
    Argv(Vec<String>),
}

/// Immutable client configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub flags: ClientFlags,
    pub socket_path: PathBuf,
    pub command: Command,
}

#[bon::bon]
impl ClientConfig {
    pub fn new(socket_path: impl Into<PathBuf>, command: Command) -> Self {
        Self {
            flags: ClientFlags::empty(),
            socket_path: socket_path.into(),
            command,
        }
    }

    #[builder]
    pub fn build(
        socket_path: PathBuf,
        command: Command,
        #[builder(default = ClientFlags::empty())] flags: ClientFlags,
    ) -> Self {
        Self {
            flags,
            socket_path,
            command,
        }
    }

    pub fn with_flags(mut self, flags: ClientFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn shellcmd(&self) -> Option<&str> {
        match &self.command {
            Command::ShellCmd(s) => Some(s),
            Command::Argv(_) => None,
        }
    }

    pub fn argv(&self) -> Option<&[String]> {
        match &self.command {
            Command::Argv(v) => Some(v),
            Command::ShellCmd(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_additive_bits() {
        let flags = ClientFlags::LOGIN | ClientFlags::CONTROL_CONTROL;
        assert!(flags.contains(ClientFlags::LOGIN));
        assert!(flags.contains(ClientFlags::CONTROL_CONTROL));
        assert!(!ClientFlags::LOGIN.contains(ClientFlags::CONTROL_CONTROL));
    }

    #[test]
    fn builder_defaults_flags_to_empty() {
        let cfg = ClientConfig::builder()
            .socket_path("/tmp/s".into())
            .command(Command::Argv(vec!["new-session".into()]))
            .build();
        assert_eq!(cfg.flags, ClientFlags::empty());
    }

    #[test]
    fn command_and_shellcmd_are_mutually_exclusive_accessors() {
        let cfg = ClientConfig::new("/tmp/s", Command::ShellCmd("echo hi".into()));
        assert_eq!(cfg.shellcmd(), Some("echo hi"));
        assert_eq!(cfg.argv(), None);

        let cfg = ClientConfig::new("/tmp/s", Command::Argv(vec!["new-session".into()]));
        assert_eq!(cfg.shellcmd(), None);
        assert_eq!(cfg.argv(), Some(&["new-session".to_string()][..]));
    }
}
