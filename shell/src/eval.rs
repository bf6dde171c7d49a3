use std::io;
use std::io::Write;

use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::builtin;
use crate::error::{Result, ShellError};
use crate::global;
use crate::supervisor::{self, PipelineResult};
use crate::topology;
use crate::types::Pipeline;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum EvalResult {
	/// The line finished with this status.
	Done(i32),
	/// `exit` was run; the shell should terminate with this status.
	Exit(i32),
	/// The line went to the background as these processes.
	Running(Vec<Pid>),
}

fn eval_pipeline(state: &mut global::State, pipeline: &Pipeline) -> Result<EvalResult> {
	if pipeline.len() == 1 {
		let stage = pipeline.first();
		if let Some((name, func)) = builtin::match_builtin(&stage.name) {
			if pipeline.stdin_path.is_some() || pipeline.stdout_path.is_some() || pipeline.is_background {
				warn!(builtin = name, "redirections and '&' are ignored for built-ins");
			}
			return func(state, &stage.arguments);
		}
	} else if let Some((name, _)) = pipeline.stages.iter().find_map(|s| builtin::match_builtin(&s.name)) {
		return Err(ShellError::UsageError { builtin: name, message: "cannot be used in a pipeline".to_string() });
	}

	let plan = topology::build(pipeline)?;
	debug!(stages = plan.len(), pipes = plan.pipe_count(), background = pipeline.is_background, "running pipeline");
	match supervisor::run(state, pipeline, plan)? {
		PipelineResult::Backgrounded(pids) => Ok(EvalResult::Running(pids)),
		PipelineResult::Completed(statuses) => Ok(EvalResult::Done(statuses.last().map_or(0, |s| s.code()))),
	}
}

/// Reports `e` on stderr the way every failed line is reported.
pub fn report(e: &ShellError) {
	let _ = writeln!(&mut io::stderr(), "psh: {}", e);
}

/// Runs one parsed line. Errors are reported here and become a non-zero
/// status; only `exit` asks the caller to stop.
pub fn eval(state: &mut global::State, pipeline: &Pipeline) -> EvalResult {
	match eval_pipeline(state, pipeline) {
		Ok(r) => r,
		Err(e) => {
			debug!(error = ?e, "line failed");
			report(&e);
			EvalResult::Done(e.status())
		},
	}
}
