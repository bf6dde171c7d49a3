use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use crate::error::{Result, ShellError};
use crate::types::*;

fn rejected<T, S: Into<String>>(reason: S) -> Result<T> {
	Err(ShellError::ParseRejected(reason.into()))
}

struct Parser<'a> {
	line: &'a [u8],
	i: usize,
	stdin_path: Option<PathBuf>,
	stdout_path: Option<(usize, PathBuf)>,
}

impl<'a> Parser<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.line.get(self.i) {
			if !f(*c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		match c {
			b' ' | b'\t' | b'\n' | b'\r' => true,
			_ => false,
		}
	}

	fn is_letter(c: u8) -> bool {
		match c {
			b'>' | b'<' | b'&' | b'|' => false,
			_ => !Parser::is_whitespace(c),
		}
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Parser::is_whitespace);
	}

	fn read_word(&mut self) -> &'a [u8] {
		let orig = self.i;
		self.proceed_while(Parser::is_letter);
		&self.line[orig .. self.i]
	}

	// Returns false when the next token is not a redirection.
	fn parse_redirect(&mut self, stage_idx: usize) -> Result<bool> {
		let typ = match self.line.get(self.i) {
			Some(&b'<') => Direction::Input,
			Some(&b'>') => Direction::Output,
			_ => return Ok(false),
		};
		self.i += 1;
		self.skip_whitespaces();
		let target = self.read_word();
		if target.is_empty() {
			return rejected("empty redirect");
		}
		let path = PathBuf::from(OsStr::from_bytes(target));

		match typ {
			Direction::Input => {
				if stage_idx != 0 {
					return rejected("input redirect is only allowed on the first command");
				}
				if self.stdin_path.is_some() {
					return rejected("duplicated input redirect");
				}
				self.stdin_path = Some(path);
			},
			Direction::Output => {
				if self.stdout_path.is_some() {
					return rejected("duplicated output redirect");
				}
				self.stdout_path = Some((stage_idx, path));
			},
		}
		Ok(true)
	}

	fn parse_redirects(&mut self, stage_idx: usize) -> Result<()> {
		while self.parse_redirect(stage_idx)? {
			self.skip_whitespaces();
		}
		Ok(())
	}

	fn parse_stage(&mut self, stage_idx: usize) -> Result<Stage> {
		self.parse_redirects(stage_idx)?;

		let name = self.read_word();
		if name.is_empty() {
			return rejected("empty command");
		}
		let mut stage = Stage::new(name);

		loop {
			self.skip_whitespaces();
			self.parse_redirects(stage_idx)?;
			let word = self.read_word();
			if word.is_empty() {
				break;
			}
			stage.arguments.push(word.to_vec());
		}
		Ok(stage)
	}

	fn parse_pipeline(&mut self) -> Result<Option<Pipeline>> {
		let mut stages: Vec<Stage> = vec![];
		let mut is_background = false;

		self.skip_whitespaces();
		if self.i == self.line.len() {
			return Ok(None);
		}

		loop {
			self.skip_whitespaces();
			let stage = self.parse_stage(stages.len())?;
			stages.push(stage);
			match self.line.get(self.i) {
				Some(&b'|') => { self.i += 1; },
				Some(&b'&') => {
					self.i += 1;
					is_background = true;
					self.skip_whitespaces();
					if let Some(&c) = self.line.get(self.i) {
						return rejected(format!("character after '&': '{}'", c as char));
					}
					break;
				},
				Some(&c) => return rejected(format!("unknown command separator: '{}'", c as char)),
				None => break,
			}
		}

		let stdout_path = match self.stdout_path.take() {
			Some((idx, _)) if idx != stages.len() - 1 => {
				return rejected("output redirect is only allowed on the last command");
			},
			Some((_, path)) => Some(path),
			None => None,
		};
		Ok(Some(Pipeline {
			stages: stages,
			stdin_path: self.stdin_path.take(),
			stdout_path: stdout_path,
			is_background: is_background,
		}))
	}
}

/// Turns one input line into a pipeline. A blank line is `Ok(None)`.
pub fn parse(line: &[u8]) -> Result<Option<Pipeline>> {
	let mut parser = Parser { line: line, i: 0, stdin_path: None, stdout_path: None };
	parser.parse_pipeline()
}

/// Debug dump of a parsed pipeline, printed by `--print-parse`.
pub fn describe(pipeline: &Pipeline) -> String {
	fn path_or_none(p: &Option<PathBuf>) -> String {
		p.as_ref().map_or("<none>".to_string(), |p| p.display().to_string())
	}
	let mut out = String::new();
	out.push_str("------------------------------\n");
	out.push_str(&format!("stdin:      {}\n", path_or_none(&pipeline.stdin_path)));
	out.push_str(&format!("stdout:     {}\n", path_or_none(&pipeline.stdout_path)));
	out.push_str(&format!("background: {}\n", pipeline.is_background));
	out.push_str("stages:\n");
	for stage in &pipeline.stages {
		out.push_str("            * [ ");
		out.push_str(&String::from_utf8_lossy(&stage.name));
		for arg in &stage.arguments {
			out.push(' ');
			out.push_str(&String::from_utf8_lossy(arg));
		}
		out.push_str(" ]\n");
	}
	out.push_str("------------------------------");
	out
}
