//! Background job bookkeeping.
//!
//! The table of running background children is a fixed array of atomics so
//! the SIGCHLD handler can reap into it without locking or allocating. The
//! main loop only touches it with SIGCHLD blocked (see `SigchldBlock`), which
//! makes it the single writer during those windows.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::signals::SigchldBlock;

pub const MAX_JOBS: usize = 64;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExitStatus {
	Exited(i32),
	Signaled(Signal),
}

impl ExitStatus {
	/// Status in the usual shell convention: signals map to 128 + signo.
	pub fn code(self) -> i32 {
		match self {
			ExitStatus::Exited(code) => code,
			ExitStatus::Signaled(sig) => 128 + sig as i32,
		}
	}

	pub fn success(self) -> bool {
		self == ExitStatus::Exited(0)
	}

	fn encode(self) -> i32 {
		match self {
			ExitStatus::Exited(code) => code,
			ExitStatus::Signaled(sig) => -(sig as i32),
		}
	}

	fn decode(raw: i32) -> Option<ExitStatus> {
		if raw == LOST {
			None
		} else if raw >= 0 {
			Some(ExitStatus::Exited(raw))
		} else {
			Signal::try_from(-raw).ok().map(ExitStatus::Signaled)
		}
	}
}

impl fmt::Display for ExitStatus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			ExitStatus::Exited(code) => write!(f, "exit {}", code),
			ExitStatus::Signaled(sig) => write!(f, "killed by {}", sig),
		}
	}
}

pub trait WaitStatusExt {
	/// `None` unless the status reports termination.
	fn exit_status(self) -> Option<ExitStatus>;
}

impl WaitStatusExt for WaitStatus {
	fn exit_status(self) -> Option<ExitStatus> {
		match self {
			WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
			WaitStatus::Signaled(_, sig, _) => Some(ExitStatus::Signaled(sig)),
			_ => None,
		}
	}
}

/// What the shell is paying attention to right now.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mode {
	/// Reading input, nothing in the background.
	Idle,
	/// Blocked waiting for a foreground pipeline.
	Foreground,
	/// Reading input while background jobs are outstanding.
	BackgroundOnly,
}

const EMPTY: u8 = 0;
const RUNNING: u8 = 1;
const REAPING: u8 = 2;
const REAPED: u8 = 3;

// Status of a child someone else already collected.
const LOST: i32 = i32::MIN;

struct Slot {
	state: AtomicU8,
	pid: AtomicI32,
	status: AtomicI32,
}

#[allow(clippy::declare_interior_mutable_const)]
const SLOT_INIT: Slot = Slot {
	state: AtomicU8::new(EMPTY),
	pid: AtomicI32::new(0),
	status: AtomicI32::new(0),
};

static SLOTS: [Slot; MAX_JOBS] = [SLOT_INIT; MAX_JOBS];

fn try_reap(pid: Pid) -> Option<i32> {
	match wait::waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
		Ok(status) => status.exit_status().map(ExitStatus::encode),
		Err(Errno::ECHILD) => Some(LOST),
		Err(_) => None,
	}
}

/// Reaps finished background children recorded in the table. Only calls
/// `waitpid(pid, WNOHANG)` and atomic stores, so it is safe to run from the
/// SIGCHLD handler. Children that are not in the table (foreground stages)
/// are never touched.
pub fn reap_async() {
	for slot in SLOTS.iter() {
		if slot.state.compare_exchange(RUNNING, REAPING, Ordering::AcqRel, Ordering::Acquire).is_err() {
			continue;
		}
		let pid = Pid::from_raw(slot.pid.load(Ordering::Relaxed));
		match try_reap(pid) {
			Some(raw) => {
				slot.status.store(raw, Ordering::Relaxed);
				slot.state.store(REAPED, Ordering::Release);
			},
			None => slot.state.store(RUNNING, Ordering::Release),
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Completion {
	pub pid: Pid,
	/// `None` if the status could not be collected.
	pub status: Option<ExitStatus>,
}

#[cfg(test)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum JobState {
	Running,
	Reaped(Option<ExitStatus>),
}

/// Handle on the process-wide set of unreaped background children.
#[derive(Debug, Default)]
pub struct JobSet {
	// Children that did not fit in the table; polled at the prompt only.
	overflow: Vec<Pid>,
}

impl JobSet {
	pub fn new() -> JobSet {
		JobSet { overflow: vec![] }
	}

	/// Records a background child. Taking the guard proves SIGCHLD is
	/// blocked, so the handler cannot miss a child that exits right away.
	pub fn insert(&mut self, pid: Pid, _blocked: &SigchldBlock) {
		match SLOTS.iter().find(|s| s.state.load(Ordering::Acquire) == EMPTY) {
			Some(slot) => {
				slot.pid.store(pid.as_raw(), Ordering::Relaxed);
				slot.status.store(0, Ordering::Relaxed);
				slot.state.store(RUNNING, Ordering::Release);
			},
			None => {
				warn!(%pid, "job table full, reaping at the next prompt only");
				self.overflow.push(pid);
			},
		}
	}

	#[cfg(test)]
	fn lookup(&self, pid: Pid) -> Option<JobState> {
		if self.overflow.contains(&pid) {
			return Some(JobState::Running);
		}
		SLOTS.iter()
			.find(|s| s.state.load(Ordering::Acquire) != EMPTY && s.pid.load(Ordering::Relaxed) == pid.as_raw())
			.map(|s| match s.state.load(Ordering::Acquire) {
				REAPED => JobState::Reaped(ExitStatus::decode(s.status.load(Ordering::Relaxed))),
				_ => JobState::Running,
			})
	}

	/// Number of background children not yet reported.
	pub fn len(&self) -> usize {
		self.overflow.len() + SLOTS.iter().filter(|s| s.state.load(Ordering::Acquire) != EMPTY).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Collects every finished background child without blocking. Each one is
	/// returned exactly once and then forgotten.
	pub fn drain(&mut self) -> Vec<Completion> {
		let _blocked = match SigchldBlock::new() {
			Ok(b) => b,
			Err(e) => {
				warn!(error = %e, "cannot block SIGCHLD, skipping reap");
				return vec![];
			},
		};
		reap_async();

		let mut done = vec![];
		for slot in SLOTS.iter() {
			if slot.state.load(Ordering::Acquire) != REAPED {
				continue;
			}
			let completion = Completion {
				pid: Pid::from_raw(slot.pid.load(Ordering::Relaxed)),
				status: ExitStatus::decode(slot.status.load(Ordering::Relaxed)),
			};
			slot.state.store(EMPTY, Ordering::Release);
			debug!(pid = %completion.pid, status = ?completion.status, "background child reaped");
			done.push(completion);
		}

		self.overflow.retain(|&pid| match try_reap(pid) {
			Some(raw) => {
				done.push(Completion { pid: pid, status: ExitStatus::decode(raw) });
				false
			},
			None => true,
		});
		done
	}

	pub fn mode_after_wait(&self) -> Mode {
		if self.is_empty() { Mode::Idle } else { Mode::BackgroundOnly }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serial_test::serial;
	use std::process::Command;
	use std::thread::sleep;
	use std::time::{Duration, Instant};

	fn spawn(script: &str) -> std::process::Child {
		Command::new("sh").arg("-c").arg(script).spawn().unwrap()
	}

	fn drain_until(job_set: &mut JobSet, pid: Pid) -> Completion {
		let deadline = Instant::now() + Duration::from_secs(5);
		loop {
			if let Some(c) = job_set.drain().into_iter().find(|c| c.pid == pid) {
				return c;
			}
			assert!(Instant::now() < deadline, "{} never reaped", pid);
			sleep(Duration::from_millis(10));
		}
	}

	#[test]
	fn exit_status_codes() {
		assert_eq!(ExitStatus::Exited(3).code(), 3);
		assert_eq!(ExitStatus::Signaled(Signal::SIGINT).code(), 130);
		assert!(ExitStatus::Exited(0).success());
		assert_eq!(ExitStatus::decode(ExitStatus::Signaled(Signal::SIGKILL).encode()),
			Some(ExitStatus::Signaled(Signal::SIGKILL)));
		assert_eq!(ExitStatus::decode(LOST), None);
		assert_eq!(ExitStatus::Signaled(Signal::SIGTERM).to_string(), "killed by SIGTERM");
	}

	#[test]
	#[serial]
	fn drain_reports_each_child_once() {
		let mut job_set = JobSet::new();
		let child = spawn("exit 3");
		let pid = Pid::from_raw(child.id() as i32);
		{
			let blocked = SigchldBlock::new().unwrap();
			job_set.insert(pid, &blocked);
		}
		assert!(job_set.lookup(pid).is_some());

		// the signal path records the status; the checkpoint reports it
		let deadline = Instant::now() + Duration::from_secs(5);
		while job_set.lookup(pid) == Some(JobState::Running) {
			assert!(Instant::now() < deadline, "{} never reaped", pid);
			sleep(Duration::from_millis(10));
			reap_async();
		}
		assert_eq!(job_set.lookup(pid), Some(JobState::Reaped(Some(ExitStatus::Exited(3)))));

		let c = drain_until(&mut job_set, pid);
		assert_eq!(c.status, Some(ExitStatus::Exited(3)));
		assert_eq!(job_set.lookup(pid), None);
		assert!(job_set.drain().iter().all(|c| c.pid != pid));
	}

	#[test]
	#[serial]
	fn running_children_stay_in_the_set() {
		let mut job_set = JobSet::new();
		let mut child = spawn("sleep 0.3");
		let pid = Pid::from_raw(child.id() as i32);
		{
			let blocked = SigchldBlock::new().unwrap();
			job_set.insert(pid, &blocked);
		}
		assert!(job_set.drain().iter().all(|c| c.pid != pid));
		assert_eq!(job_set.lookup(pid), Some(JobState::Running));
		assert_eq!(job_set.mode_after_wait(), Mode::BackgroundOnly);

		let c = drain_until(&mut job_set, pid);
		assert_eq!(c.status, Some(ExitStatus::Exited(0)));
		// already collected by the reaper
		assert!(child.try_wait().is_err());
	}

	#[test]
	#[serial]
	fn reaper_ignores_unregistered_children() {
		let mut child = spawn("exit 5");
		sleep(Duration::from_millis(200));
		reap_async();
		let status = child.wait().unwrap();
		assert_eq!(status.code(), Some(5));
	}

	#[test]
	#[serial]
	fn overflow_children_are_reported_once() {
		let mut job_set = JobSet::new();
		let mut pids = vec![];
		{
			let blocked = SigchldBlock::new().unwrap();
			for _ in 0..MAX_JOBS + 6 {
				let pid = Pid::from_raw(spawn("exit 0").id() as i32);
				job_set.insert(pid, &blocked);
				pids.push(pid);
			}
		}
		assert!(job_set.overflow.len() >= 6);

		let mut seen = std::collections::HashMap::new();
		let deadline = Instant::now() + Duration::from_secs(10);
		while seen.len() < pids.len() || !job_set.is_empty() {
			for c in job_set.drain() {
				assert_eq!(c.status, Some(ExitStatus::Exited(0)));
				*seen.entry(c.pid).or_insert(0) += 1;
			}
			assert!(Instant::now() < deadline, "{} of {} reaped", seen.len(), pids.len());
			sleep(Duration::from_millis(10));
		}
		for pid in &pids {
			assert_eq!(seen.get(pid), Some(&1), "{}", pid);
		}
		assert_eq!(job_set.len(), 0);
		assert!(job_set.overflow.is_empty());
	}
}
