//! Works out, before anything is forked, which descriptor every stage of a
//! pipeline reads from and writes to.
//!
//! All pipes are allocated up front and every descriptor is close-on-exec,
//! so a child that fails to close something still cannot leak it past
//! `execvp`.

use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::unistd;
use tracing::debug;

use crate::error::{Result, ShellError};
use crate::types::{Direction, Pipeline};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Source {
	/// Index `k` of the pipe joining stage `k` and stage `k + 1`.
	Pipe(usize),
	File(PathBuf),
}

#[derive(Debug)]
pub enum Binding {
	/// Keep whatever the shell itself has on that slot.
	Inherit,
	Fd(OwnedFd, Source),
}

impl Binding {
	pub fn raw_fd(&self) -> Option<RawFd> {
		match *self {
			Binding::Inherit => None,
			Binding::Fd(ref fd, _) => Some(fd.as_raw_fd()),
		}
	}

	pub fn source(&self) -> Option<&Source> {
		match *self {
			Binding::Inherit => None,
			Binding::Fd(_, ref source) => Some(source),
		}
	}
}

#[derive(Debug)]
pub struct StageBinding {
	pub stdin: Binding,
	pub stdout: Binding,
}

/// Owns every descriptor a pipeline needs. Dropping a `StageBinding` (or the
/// whole plan) closes the ends it holds.
#[derive(Debug)]
pub struct BindingPlan {
	stages: Vec<Option<StageBinding>>,
	pipes: usize,
}

impl BindingPlan {
	pub fn len(&self) -> usize {
		self.stages.len()
	}

	pub fn pipe_count(&self) -> usize {
		self.pipes
	}

	#[cfg(test)]
	fn get(&self, i: usize) -> Option<&StageBinding> {
		self.stages.get(i).and_then(|s| s.as_ref())
	}

	/// Hands stage `i`'s ends over to the caller; the plan stops holding them.
	pub fn take(&mut self, i: usize) -> Option<StageBinding> {
		self.stages.get_mut(i).and_then(|s| s.take())
	}

	/// Raw descriptors the plan still holds. Does not allocate, so it is
	/// usable between fork and exec.
	pub fn held_fds<'a>(&'a self) -> impl Iterator<Item = RawFd> + 'a {
		self.stages.iter()
			.filter_map(|s| s.as_ref())
			.flat_map(|s| s.stdin.raw_fd().into_iter().chain(s.stdout.raw_fd()))
	}
}

fn open_redirect(path: &Path, direction: Direction) -> Result<Binding> {
	let mut oopt = fs::OpenOptions::new();
	let _ = match direction {
		Direction::Input => oopt.read(true),
		Direction::Output => oopt.write(true).create(true).truncate(true).mode(0o644),
	};
	let file = oopt.open(path).map_err(|e| ShellError::RedirectionFailure {
		path: path.to_path_buf(),
		direction: direction,
		source: e,
	})?;
	Ok(Binding::Fd(OwnedFd::from(file), Source::File(path.to_path_buf())))
}

/// Builds the binding plan for `pipeline`: N - 1 pipes, redirection files at
/// the two open ends, the inherited terminal everywhere else.
pub fn build(pipeline: &Pipeline) -> Result<BindingPlan> {
	let n = pipeline.len();
	assert!(n > 0);

	let first_stdin = match pipeline.stdin_path {
		Some(ref path) => open_redirect(path, Direction::Input)?,
		None => Binding::Inherit,
	};
	let last_stdout = match pipeline.stdout_path {
		Some(ref path) => open_redirect(path, Direction::Output)?,
		None => Binding::Inherit,
	};

	let mut stdins: Vec<Binding> = Vec::with_capacity(n);
	let mut stdouts: Vec<Binding> = Vec::with_capacity(n);
	stdins.push(first_stdin);
	for k in 0 .. n - 1 {
		let (pipe_read, pipe_write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
		debug!(pipe = k, read = pipe_read.as_raw_fd(), write = pipe_write.as_raw_fd(), "pipe created");
		stdouts.push(Binding::Fd(pipe_write, Source::Pipe(k)));
		stdins.push(Binding::Fd(pipe_read, Source::Pipe(k)));
	}
	stdouts.push(last_stdout);

	let stages = stdins.into_iter().zip(stdouts)
		.map(|(stdin, stdout)| Some(StageBinding { stdin: stdin, stdout: stdout }))
		.collect();
	Ok(BindingPlan { stages: stages, pipes: n - 1 })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::Stage;
	use serial_test::serial;
	use std::fs::File;
	use std::io::{Read, Write};

	fn open_fd_count() -> usize {
		fs::read_dir("/proc/self/fd").unwrap().count()
	}

	fn pipeline(n: usize) -> Pipeline {
		Pipeline::new((0 .. n).map(|i| Stage::new(format!("cmd{}", i))).collect())
	}

	#[test]
	#[serial]
	fn one_pipe_per_adjacent_pair() {
		for n in 1 .. 6 {
			let plan = build(&pipeline(n)).unwrap();
			assert_eq!(plan.len(), n);
			assert_eq!(plan.pipe_count(), n - 1);
			assert_eq!(plan.held_fds().count(), 2 * (n - 1));
		}
	}

	#[test]
	#[serial]
	fn interior_stages_use_neighbouring_pipes() {
		let plan = build(&pipeline(3)).unwrap();
		let s0 = plan.get(0).unwrap();
		let s1 = plan.get(1).unwrap();
		let s2 = plan.get(2).unwrap();
		assert!(s0.stdin.source().is_none());
		assert_eq!(s0.stdout.source(), Some(&Source::Pipe(0)));
		assert_eq!(s1.stdin.source(), Some(&Source::Pipe(0)));
		assert_eq!(s1.stdout.source(), Some(&Source::Pipe(1)));
		assert_eq!(s2.stdin.source(), Some(&Source::Pipe(1)));
		assert!(s2.stdout.source().is_none());
	}

	#[test]
	#[serial]
	fn pipe_carries_bytes_downstream() {
		let mut plan = build(&pipeline(2)).unwrap();
		let writer = plan.take(0).unwrap();
		let reader = plan.take(1).unwrap();
		assert_eq!(plan.held_fds().count(), 0);

		let mut w = match writer.stdout { Binding::Fd(fd, _) => File::from(fd), _ => panic!() };
		w.write_all(b"hello").unwrap();
		drop(w);
		let mut r = match reader.stdin { Binding::Fd(fd, _) => File::from(fd), _ => panic!() };
		let mut s = String::new();
		r.read_to_string(&mut s).unwrap();
		assert_eq!(s, "hello");
	}

	#[test]
	#[serial]
	fn single_stage_honours_both_redirections() {
		let dir = tempfile::tempdir().unwrap();
		let input = dir.path().join("in");
		let output = dir.path().join("out");
		fs::write(&input, "x").unwrap();
		fs::write(&output, "stale contents").unwrap();

		let mut p = pipeline(1);
		p.stdin_path = Some(input.clone());
		p.stdout_path = Some(output.clone());
		let plan = build(&p).unwrap();
		assert_eq!(plan.pipe_count(), 0);
		let s = plan.get(0).unwrap();
		assert_eq!(s.stdin.source(), Some(&Source::File(input)));
		assert_eq!(s.stdout.source(), Some(&Source::File(output.clone())));
		assert_eq!(fs::read(&output).unwrap().len(), 0);
	}

	#[test]
	#[serial]
	fn missing_input_is_a_redirection_failure() {
		let before = open_fd_count();
		let dir = tempfile::tempdir().unwrap();
		let mut p = pipeline(3);
		p.stdin_path = Some(dir.path().join("absent"));
		p.stdout_path = Some(dir.path().join("out"));
		match build(&p) {
			Err(ShellError::RedirectionFailure { path, direction, .. }) => {
				assert_eq!(path, dir.path().join("absent"));
				assert_eq!(direction, Direction::Input);
			},
			other => panic!("unexpected {:?}", other),
		}
		assert!(!dir.path().join("out").exists());
		assert_eq!(open_fd_count(), before);
	}

	#[test]
	#[serial]
	fn unwritable_output_is_a_redirection_failure() {
		let mut p = pipeline(2);
		p.stdout_path = Some(PathBuf::from("/nonexistent-dir/out"));
		match build(&p) {
			Err(ShellError::RedirectionFailure { direction, .. }) => assert_eq!(direction, Direction::Output),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	#[serial]
	fn dropping_the_plan_closes_everything() {
		let before = open_fd_count();
		let plan = build(&pipeline(4)).unwrap();
		assert_eq!(open_fd_count(), before + 6);
		drop(plan);
		assert_eq!(open_fd_count(), before);
	}
}
