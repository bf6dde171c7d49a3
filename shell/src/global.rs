use tracing::debug;

use crate::job;

/// Everything the shell carries from one line to the next.
#[derive(Debug)]
pub struct State {
	pub job_set: job::JobSet,
	mode: job::Mode,
}

impl State {
	pub fn new() -> State {
		State { job_set: job::JobSet::new(), mode: job::Mode::Idle }
	}

	/// Prompt checkpoint: collects finished background children and settles
	/// the mode for reading the next line.
	pub fn reap(&mut self) -> Vec<job::Completion> {
		let done = self.job_set.drain();
		let mode = self.job_set.mode_after_wait();
		self.set_mode(mode);
		done
	}

	pub fn mode(&self) -> job::Mode {
		self.mode
	}

	pub fn set_mode(&mut self, mode: job::Mode) {
		if mode != self.mode {
			debug!(from = ?self.mode, to = ?mode, "mode");
			self.mode = mode;
		}
	}
}

impl Default for State {
	fn default() -> State {
		State::new()
	}
}
