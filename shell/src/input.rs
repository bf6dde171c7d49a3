//! Reading command lines without stealing input from children.
//!
//! Stages with an inherited stdin share fd 0 with the shell, so when input is
//! not a terminal the shell must not read past the end of the current line.

use std::io;
use std::io::{BufRead, Write};
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::unistd;

pub enum LineReader {
	/// A terminal hands over one line per read anyway.
	Buffered(io::StdinLock<'static>),
	/// Pipes and files: one byte per read, stopping right after `\n`.
	Unbuffered(RawFd),
}

impl LineReader {
	pub fn stdin(interactive: bool) -> LineReader {
		if interactive {
			LineReader::Buffered(io::stdin().lock())
		} else {
			LineReader::Unbuffered(libc::STDIN_FILENO)
		}
	}

	/// Appends the next line, newline included, to `line`. Returns the number
	/// of bytes read; 0 means end of input.
	pub fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<usize> {
		match *self {
			LineReader::Buffered(ref mut locked) => locked.read_until(b'\n', line),
			LineReader::Unbuffered(fd) => {
				let mut n = 0;
				let mut byte = [0u8; 1];
				loop {
					match unistd::read(fd, &mut byte) {
						Ok(0) => break,
						Ok(_) => {
							n += 1;
							line.push(byte[0]);
							if byte[0] == b'\n' { break; }
						},
						Err(Errno::EINTR) => {},
						Err(e) => return Err(io::Error::from(e)),
					}
				}
				Ok(n)
			},
		}
	}
}

/// Says goodbye the same way whether the shell stops at end of input or on
/// `exit`. Only a terminal gets the line; after end of input the cursor still
/// sits behind the prompt.
pub fn farewell<W: Write>(out: &mut W, interactive: bool, at_eof: bool) {
	if !interactive {
		return;
	}
	let _ = if at_eof { writeln!(out, "\nexit") } else { writeln!(out, "exit") };
	let _ = out.flush();
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs::File;
	use std::io::{Read, Write};
	use std::os::unix::io::AsRawFd;

	#[test]
	fn unbuffered_stops_at_the_newline() {
		let (r, w) = unistd::pipe().unwrap();
		let mut w = File::from(w);
		w.write_all(b"first\nsecond\nrest").unwrap();
		drop(w);

		let mut reader = LineReader::Unbuffered(r.as_raw_fd());
		let mut line = vec![];
		assert_eq!(reader.read_line(&mut line).unwrap(), 6);
		assert_eq!(line, b"first\n");

		// whatever the shell did not consume is still there for a child
		let mut left = String::new();
		File::from(r).read_to_string(&mut left).unwrap();
		assert_eq!(left, "second\nrest");
	}

	#[test]
	fn unbuffered_end_of_input() {
		let (r, w) = unistd::pipe().unwrap();
		let mut w = File::from(w);
		w.write_all(b"no newline").unwrap();
		drop(w);

		let mut reader = LineReader::Unbuffered(r.as_raw_fd());
		let mut line = vec![];
		assert_eq!(reader.read_line(&mut line).unwrap(), 10);
		assert_eq!(line, b"no newline");
		line.clear();
		assert_eq!(reader.read_line(&mut line).unwrap(), 0);
		drop(r);
	}

	#[test]
	fn farewell_is_the_same_for_exit_and_eof() {
		let mut on_exit: Vec<u8> = vec![];
		farewell(&mut on_exit, true, false);
		let mut on_eof: Vec<u8> = vec![];
		farewell(&mut on_eof, true, true);
		assert_eq!(on_exit, b"exit\n");
		assert_eq!(on_eof, b"\nexit\n");

		let mut quiet: Vec<u8> = vec![];
		farewell(&mut quiet, false, false);
		farewell(&mut quiet, false, true);
		assert!(quiet.is_empty());
	}
}
