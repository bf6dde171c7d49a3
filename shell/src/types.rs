use std::fmt;
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Direction { Input, Output }

impl fmt::Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Direction::Input => f.write_str("input"),
			Direction::Output => f.write_str("output"),
		}
	}
}

/// One program invocation: the name is kept apart from the arguments, so a
/// stage can never be empty.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stage {
	pub name: Vec<u8>,
	pub arguments: Vec<Vec<u8>>,
}

impl Stage {
	pub fn new<N: Into<Vec<u8>>>(name: N) -> Stage {
		Stage { name: name.into(), arguments: vec![] }
	}

	pub fn arg<A: Into<Vec<u8>>>(mut self, arg: A) -> Stage {
		self.arguments.push(arg.into());
		self
	}

	pub fn display_name(&self) -> String {
		String::from_utf8_lossy(&self.name).into_owned()
	}
}

/// Redirections live on the pipeline, not on stages: input feeds the first
/// stage and output drains the last one.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Pipeline {
	pub stages: Vec<Stage>,
	pub stdin_path: Option<PathBuf>,
	pub stdout_path: Option<PathBuf>,
	pub is_background: bool,
}

impl Pipeline {
	pub fn new(stages: Vec<Stage>) -> Pipeline {
		assert!(!stages.is_empty());
		Pipeline { stages: stages, stdin_path: None, stdout_path: None, is_background: false }
	}

	pub fn len(&self) -> usize {
		self.stages.len()
	}

	pub fn first(&self) -> &Stage {
		&self.stages[0]
	}

	pub fn last(&self) -> &Stage {
		&self.stages[self.stages.len() - 1]
	}
}
