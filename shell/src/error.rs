use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

use crate::types::Direction;

pub type Result<T> = std::result::Result<T, ShellError>;

/// Everything that can go wrong between a parsed line and its exit status.
/// None of these end the shell; only the `exit` built-in does.
#[derive(Debug, Error)]
pub enum ShellError {
	#[error("parse error: {0}")]
	ParseRejected(String),

	#[error("{}: cannot open for {direction}: {source}", .path.display())]
	RedirectionFailure {
		path: PathBuf,
		direction: Direction,
		#[source]
		source: io::Error,
	},

	#[error("cannot create pipe: {0}")]
	Pipe(#[source] nix::Error),

	#[error("{program}: argument contains a NUL byte")]
	InvalidArgument { program: String },

	#[error("{program}: cannot fork: {source}{}", left_running(.background))]
	SpawnFailure {
		program: String,
		#[source]
		source: nix::Error,
		/// Earlier stages of a background line that were already running and
		/// now belong to the job set.
		background: Vec<Pid>,
	},

	#[error("{program}: {}", exec_reason(.source))]
	ExecFailure {
		program: String,
		#[source]
		source: nix::Error,
	},

	#[error("{builtin}: {message}")]
	UsageError { builtin: &'static str, message: String },

	#[error("cd: {}: {source}", .path.display())]
	ChangeDirectory {
		path: PathBuf,
		#[source]
		source: nix::Error,
	},

	#[error("wait for {pid} failed: {source}")]
	Wait {
		pid: Pid,
		#[source]
		source: nix::Error,
	},

	#[error("cannot install signal handler: {0}")]
	Signal(#[source] nix::Error),
}

fn exec_reason(e: &nix::Error) -> &'static str {
	match *e {
		Errno::ENOENT => "command not found",
		Errno::EACCES => "permission denied",
		e => e.desc(),
	}
}

fn left_running(pids: &[Pid]) -> String {
	if pids.is_empty() {
		return String::new();
	}
	let pids: Vec<String> = pids.iter().map(|p| p.to_string()).collect();
	format!(" (left running in background: {})", pids.join(" "))
}

impl ShellError {
	/// Exit status the shell reports for a line that failed with this error.
	pub fn status(&self) -> i32 {
		match *self {
			ShellError::ExecFailure { source: Errno::ENOENT, .. } => 127,
			ShellError::ExecFailure { .. } => 126,
			ShellError::UsageError { .. } | ShellError::ParseRejected(_) => 2,
			_ => 1,
		}
	}
}
