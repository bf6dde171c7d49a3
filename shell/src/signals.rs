//! Signal dispositions of the shell and of the children it spawns.
//!
//! The shell ignores SIGINT for its whole life: Ctrl-C at the prompt does
//! nothing, and during a foreground wait the terminal delivers it to the
//! children while the shell keeps waiting. SIGCHLD drives the background
//! reaper in `job`.

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use tracing::debug;

use crate::error::{Result, ShellError};
use crate::job;

extern "C" fn on_sigchld(_: libc::c_int) {
	let saved = Errno::last_raw();
	job::reap_async();
	Errno::set_raw(saved);
}

/// Installs the shell's own handlers. Call once at startup.
pub fn install() -> Result<()> {
	let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
	let reap = SigAction::new(
		SigHandler::Handler(on_sigchld),
		SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
		SigSet::empty(),
	);
	unsafe {
		signal::sigaction(Signal::SIGINT, &ignore).map_err(ShellError::Signal)?;
		signal::sigaction(Signal::SIGCHLD, &reap).map_err(ShellError::Signal)?;
	}
	debug!("signal handlers installed");
	Ok(())
}

/// How a spawned child treats SIGINT. Children inherit the shell's "ignore",
/// so foreground stages have to ask for the default back.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InterruptDisposition {
	Default,
	Ignore,
}

impl InterruptDisposition {
	pub fn for_background(is_background: bool) -> InterruptDisposition {
		if is_background { InterruptDisposition::Ignore } else { InterruptDisposition::Default }
	}

	/// Runs in the child between fork and exec.
	pub fn apply(self) -> nix::Result<()> {
		let handler = match self {
			InterruptDisposition::Default => SigHandler::SigDfl,
			InterruptDisposition::Ignore => SigHandler::SigIgn,
		};
		unsafe { signal::signal(Signal::SIGINT, handler) }.map(|_| ())
	}
}

/// The Rust runtime ignores SIGPIPE, and ignored signals survive exec.
/// Runs in the child between fork and exec.
pub fn restore_pipe_default() -> nix::Result<()> {
	unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) }.map(|_| ())
}

/// Keeps SIGCHLD blocked for the calling thread while alive.
#[derive(Debug)]
pub struct SigchldBlock {
	previous: SigSet,
}

impl SigchldBlock {
	pub fn new() -> Result<SigchldBlock> {
		let mut set = SigSet::empty();
		set.add(Signal::SIGCHLD);
		let mut previous = SigSet::empty();
		signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))
			.map_err(ShellError::Signal)?;
		Ok(SigchldBlock { previous: previous })
	}

	/// Mask in force before the block, for children to restore before exec.
	pub fn previous(&self) -> &SigSet {
		&self.previous
	}
}

impl Drop for SigchldBlock {
	fn drop(&mut self) {
		let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
	}
}
