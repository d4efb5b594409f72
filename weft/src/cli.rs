//! Command-line surface: translates argv into a [`weft_core::ClientConfig`].
//! Deliberately thin — the flag set this client recognizes is small and
//! fixed, so there is no subcommand tree here the way a larger CLI needs.

use std::path::PathBuf;

use clap::Parser;
use weft_core::{ClientConfig, ClientFlags, Command};

#[derive(Parser)]
#[command(name = "weft", version, about = "attach to or start a weft session")]
pub struct Cli {
    /// Named socket under the per-user runtime directory, mutually
    /// exclusive with `-S`.
    #[arg(short = 'L', long = "socket-name", value_name = "NAME")]
    socket_name: Option<String>,

    /// Explicit path to the server's listening socket.
    #[arg(short = 'S', long = "socket-path", value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Run `shell -c COMMAND` on the server instead of attaching
    /// interactively.
    #[arg(short = 'c', long = "command", value_name = "COMMAND")]
    shell_command: Option<String>,

    /// Control-mode: drive this client over stdio from another program
    /// using the `%exit`-framed textual protocol.
    #[arg(short = 'C', long = "control")]
    control: bool,

    /// Mark the eventual exec'd shell as a login shell (argv0 prefixed
    /// with `-`).
    #[arg(short = 'l', long = "login")]
    login: bool,

    /// Trailing command tokens, forwarded as a `COMMAND` frame.
    #[arg(trailing_var_arg = true)]
    argv: Vec<String>,
}

impl Cli {
    pub fn into_config(self) -> ClientConfig {
        let socket_path = self.socket_path.unwrap_or_else(|| default_socket_path(self.socket_name.as_deref()));

        let mut flags = ClientFlags::empty();
        if self.control {
            flags = flags | ClientFlags::CONTROL_CONTROL;
        }
        if self.login {
            flags = flags | ClientFlags::LOGIN;
        }

        let command = match self.shell_command {
            Some(cmd) => Command::ShellCmd(cmd),
            None => Command::Argv(self.argv),
        };

        ClientConfig::new(socket_path, command).with_flags(flags)
    }
}

fn default_socket_path(name: Option<&str>) -> PathBuf {
    let name = name.unwrap_or("default");
    // SAFETY: getuid has no preconditions and always succeeds.
    let uid = unsafe { libc::getuid() };
    std::env::temp_dir().join(format!("weft-{uid}")).join(name)
}
