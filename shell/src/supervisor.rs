//! Spawns one process per stage and wires it according to a binding plan.

use std::convert::Infallible;
use std::ffi::CString;
use std::io;
use std::io::Write;

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FdFlag};
use nix::sys::signal::{self, SigSet, SigmaskHow};
use nix::sys::wait;
use nix::unistd::{self, ForkResult, Pid};
use tracing::{debug, warn};

use crate::error::{Result, ShellError};
use crate::global;
use crate::job::{ExitStatus, Mode, WaitStatusExt};
use crate::signals::{self, InterruptDisposition, SigchldBlock};
use crate::topology::{Binding, BindingPlan, StageBinding};
use crate::types::{Pipeline, Stage};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PipelineResult {
	/// Pids of the stages, in pipeline order, now owned by the job set.
	Backgrounded(Vec<Pid>),
	/// Exit statuses of the stages, in pipeline order.
	Completed(Vec<ExitStatus>),
}

// argv prepared in the parent, so the child does not convert anything.
struct Invocation {
	name: String,
	program: CString,
	argv: Vec<CString>,
}

impl Invocation {
	fn new(stage: &Stage) -> Result<Invocation> {
		let invalid = |_| ShellError::InvalidArgument { program: stage.display_name() };
		let program = CString::new(stage.name.clone()).map_err(invalid)?;
		let mut argv = Vec::with_capacity(stage.arguments.len() + 1);
		argv.push(program.clone());
		for arg in &stage.arguments {
			argv.push(CString::new(arg.clone()).map_err(invalid)?);
		}
		Ok(Invocation { name: stage.display_name(), program: program, argv: argv })
	}
}

fn bind(binding: &Binding, slot: libc::c_int) -> nix::Result<()> {
	if let Some(fd) = binding.raw_fd() {
		if fd == slot {
			// dup2 onto itself keeps close-on-exec set
			fcntl::fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
		} else {
			unistd::dup2(fd, slot)?;
		}
	}
	Ok(())
}

fn do_exec_stage(inv: &Invocation, binding: &StageBinding, plan: &BindingPlan,
                 mask: &SigSet, disposition: InterruptDisposition) -> nix::Result<Infallible> {
	bind(&binding.stdin, libc::STDIN_FILENO)?;
	bind(&binding.stdout, libc::STDOUT_FILENO)?;

	// Originals of what was just duplicated, plus every end of later stages.
	let own = binding.stdin.raw_fd().into_iter().chain(binding.stdout.raw_fd());
	for fd in own.chain(plan.held_fds()) {
		if fd > libc::STDERR_FILENO {
			let _ = unistd::close(fd);
		}
	}

	signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(mask), None)?;
	disposition.apply()?;
	signals::restore_pipe_default()?;
	unistd::execvp(inv.program.as_c_str(), &inv.argv)
}

fn exec_stage(inv: &Invocation, binding: &StageBinding, plan: &BindingPlan,
              mask: &SigSet, disposition: InterruptDisposition) -> ! {
	let e = match do_exec_stage(inv, binding, plan, mask, disposition) {
		Ok(never) => match never {},
		Err(e) => e,
	};
	let err = ShellError::ExecFailure { program: inv.name.clone(), source: e };
	let mut stderr = io::stderr();
	let _ = writeln!(stderr, "psh: {}", err);
	let _ = stderr.flush();
	unsafe { libc::_exit(err.status()) }
}

fn wait_for(pid: Pid) -> Result<ExitStatus> {
	loop {
		match wait::waitpid(pid, None) {
			Ok(status) => {
				if let Some(exit) = status.exit_status() {
					return Ok(exit);
				}
			},
			Err(Errno::EINTR) => {},
			Err(e) => return Err(ShellError::Wait { pid: pid, source: e }),
		}
	}
}

/// Waits for exactly the given children, in order. Never collects anyone
/// else, so background jobs finishing meanwhile stay with the reaper.
fn wait_all(pids: &[Pid]) -> Result<Vec<ExitStatus>> {
	let mut statuses = Vec::with_capacity(pids.len());
	let mut failure = None;
	for &pid in pids {
		match wait_for(pid) {
			Ok(status) => {
				debug!(%pid, %status, "foreground child reaped");
				statuses.push(status);
			},
			Err(e) => {
				warn!(error = %e, "lost track of foreground child");
				failure.get_or_insert(e);
			},
		}
	}
	match failure {
		Some(e) => Err(e),
		None => Ok(statuses),
	}
}

/// Forks every stage in ascending order, then either waits for all of them
/// (foreground) or hands them to the job set (background).
pub fn run(state: &mut global::State, pipeline: &Pipeline, mut plan: BindingPlan) -> Result<PipelineResult> {
	assert_eq!(pipeline.len(), plan.len());
	let invocations = pipeline.stages.iter().map(Invocation::new).collect::<Result<Vec<_>>>()?;
	let disposition = InterruptDisposition::for_background(pipeline.is_background);

	let blocked = SigchldBlock::new()?;
	let mut pids: Vec<Pid> = Vec::with_capacity(invocations.len());
	let mut failure = None;
	for (i, inv) in invocations.iter().enumerate() {
		let binding = match plan.take(i) {
			Some(binding) => binding,
			None => break,
		};
		match unsafe { unistd::fork() } {
			Ok(ForkResult::Child) => exec_stage(inv, &binding, &plan, blocked.previous(), disposition),
			Ok(ForkResult::Parent { child }) => {
				debug!(pid = %child, stage = i, program = %inv.name, "spawned");
				pids.push(child);
				// the parent has no use for this stage's ends any more
				drop(binding);
			},
			Err(e) => {
				failure = Some(ShellError::SpawnFailure { program: inv.name.clone(), source: e, background: vec![] });
				break;
			},
		}
	}
	// Whatever is left belongs to stages that were never spawned.
	drop(plan);

	let result = if pipeline.is_background {
		for &pid in &pids {
			state.job_set.insert(pid, &blocked);
		}
		drop(blocked);
		let mode = state.job_set.mode_after_wait();
		state.set_mode(mode);
		Ok(PipelineResult::Backgrounded(pids))
	} else {
		drop(blocked);
		state.set_mode(Mode::Foreground);
		let statuses = wait_all(&pids);
		let mode = state.job_set.mode_after_wait();
		state.set_mode(mode);
		statuses.map(PipelineResult::Completed)
	};

	match failure {
		Some(e) => Err(with_background(e, &result)),
		None => result,
	}
}

/// A spawn failure in a background line leaves the stages forked before it
/// running; name them so the user can still find them.
fn with_background(e: ShellError, result: &Result<PipelineResult>) -> ShellError {
	match (e, result) {
		(ShellError::SpawnFailure { program, source, .. }, Ok(PipelineResult::Backgrounded(pids))) => {
			ShellError::SpawnFailure { program, source, background: pids.clone() }
		},
		(e, _) => e,
	}
}
