use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use directories::BaseDirs;
use nix::unistd;
use tracing::debug;

use crate::error::{Result, ShellError};
use crate::eval::EvalResult;
use crate::global;

pub type Builtin = fn(&mut global::State, &[Vec<u8>]) -> Result<EvalResult>;

fn home_dir() -> Option<PathBuf> {
	BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

pub fn builtin_cd(_: &mut global::State, args: &[Vec<u8>]) -> Result<EvalResult> {
	let path = match args.len() {
		0 => home_dir().ok_or_else(|| ShellError::UsageError {
			builtin: "cd",
			message: "cannot determine home directory".to_string(),
		})?,
		1 => PathBuf::from(OsStr::from_bytes(&args[0])),
		_ => return Err(ShellError::UsageError { builtin: "cd", message: "too many arguments".to_string() }),
	};
	unistd::chdir(path.as_path()).map_err(|e| ShellError::ChangeDirectory { path: path.clone(), source: e })?;
	debug!(path = %path.display(), "changed directory");
	Ok(EvalResult::Done(0))
}

pub fn builtin_exit(_: &mut global::State, args: &[Vec<u8>]) -> Result<EvalResult> {
	if !args.is_empty() {
		return Err(ShellError::UsageError { builtin: "exit", message: "too many arguments".to_string() });
	}
	Ok(EvalResult::Exit(0))
}

pub fn match_builtin(name: &[u8]) -> Option<(&'static str, Builtin)> {
	match name {
		b"cd" => Some(("cd", builtin_cd)),
		b"exit" => Some(("exit", builtin_exit)),
		_ => None,
	}
}
