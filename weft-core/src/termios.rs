//! Raw-mode toggling for `CONTROL_CONTROL` clients. See spec §6.

use std::io;

use rustix::termios::{
    self, ControlModes, InputModes, LocalModes, OptionalActions, OutputModes, Termios, VMIN, VTIME,
};

/// Puts `fd` into the raw mode this client uses while driven over stdio by
/// another program. Starts from the `cfmakeraw` baseline (local mode
/// cleared of `ICANON`/`ECHO`/`ISIG`/`IEXTEN`, control mode set to
/// `CS8`/`CREAD`/`HUPCL`) before layering on the spec's specific overrides:
/// `ICRNL`/`IXANY` on input, `OPOST`/`ONLCR` on output, `VMIN=1`/`VTIME=0`,
/// baud rates copied from whatever was already set.
///
/// Returns the previous termios so the caller can restore it with
/// [`restore`] on exit.
pub fn enter_control_mode(fd: impl rustix::fd::AsFd) -> io::Result<Termios> {
    let saved = termios::tcgetattr(&fd)?;
    let mut raw = saved.clone();

    raw.local_modes
        .remove(LocalModes::ICANON | LocalModes::ECHO | LocalModes::ISIG | LocalModes::IEXTEN);
    raw.control_modes.remove(ControlModes::CSIZE);
    raw.control_modes |= ControlModes::CS8 | ControlModes::CREAD | ControlModes::HUPCL;

    raw.input_modes |= InputModes::ICRNL | InputModes::IXANY;
    raw.output_modes |= OutputModes::OPOST | OutputModes::ONLCR;
    raw.control_chars[VMIN] = 1;
    raw.control_chars[VTIME] = 0;

    termios::tcsetattr(&fd, OptionalActions::Now, &raw)?;
    Ok(saved)
}

/// Restores `saved` via `TCSAFLUSH`, discarding unread input the way a
/// clean exit from raw mode should.
pub fn restore(fd: impl rustix::fd::AsFd, saved: &Termios) -> io::Result<()> {
    termios::tcsetattr(&fd, OptionalActions::Flush, saved)?;
    Ok(())
}
