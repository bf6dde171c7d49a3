use std::io;
use std::io::Write;
use std::process;

use clap::Parser;
use nix::unistd;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use psh::eval::{self, EvalResult};
use psh::input::{self, LineReader};
use psh::{global, job, parser, signals};

#[derive(Debug, Parser)]
#[command(name = "psh", version, about = "A small Unix shell")]
struct Cli {
	/// Prompt shown before each line when reading from a terminal
	#[arg(long, env = "PSH_PROMPT", default_value = "psh> ")]
	prompt: String,

	/// Print every parsed pipeline before running it
	#[arg(long)]
	print_parse: bool,

	/// Run one line and exit with its status
	#[arg(short = 'c', value_name = "COMMAND")]
	command: Option<String>,
}

enum Flow {
	Continue(i32),
	Exit(i32),
}

fn init_tracing() {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_env("PSH_LOG")
				.unwrap_or_else(|_| "warn".into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(io::stderr).with_target(false))
		.init();
}

fn notify(completions: &[job::Completion]) {
	let mut stdout = io::stdout();
	for c in completions {
		let _ = match c.status {
			Some(status) => writeln!(stdout, "[bg] {} done ({})", c.pid, status),
			None => writeln!(stdout, "[bg] {} done", c.pid),
		};
	}
	let _ = stdout.flush();
}

fn run_line(state: &mut global::State, cli: &Cli, line: &[u8]) -> Flow {
	let pipeline = match parser::parse(line) {
		Ok(Some(p)) => p,
		Ok(None) => return Flow::Continue(0),
		Err(e) => {
			eval::report(&e);
			return Flow::Continue(e.status());
		},
	};
	if cli.print_parse {
		println!("{}", parser::describe(&pipeline));
	}
	match eval::eval(state, &pipeline) {
		EvalResult::Done(s) => Flow::Continue(s),
		EvalResult::Exit(s) => Flow::Exit(s),
		EvalResult::Running(pids) => {
			let pids: Vec<String> = pids.iter().map(|p| p.to_string()).collect();
			let mut stdout = io::stdout();
			let _ = writeln!(stdout, "[bg] {}", pids.join(" "));
			let _ = stdout.flush();
			Flow::Continue(0)
		},
	}
}

fn main() {
	let cli = Cli::parse();
	init_tracing();

	if let Err(e) = signals::install() {
		eval::report(&e);
		process::exit(1);
	}
	let mut state = global::State::new();

	if let Some(ref command) = cli.command {
		let status = match run_line(&mut state, &cli, command.as_bytes()) {
			Flow::Continue(s) | Flow::Exit(s) => s,
		};
		notify(&state.reap());
		process::exit(status);
	}

	let interactive = unistd::isatty(libc::STDIN_FILENO).unwrap_or(false);
	let mut stdout = io::stdout();
	let mut reader = LineReader::stdin(interactive);
	loop {
		notify(&state.reap());
		if interactive {
			let _ = stdout.write_all(cli.prompt.as_bytes());
			let _ = stdout.flush();
		}

		let mut line: Vec<u8> = vec![];
		match reader.read_line(&mut line) {
			Ok(0) => {
				input::farewell(&mut stdout, interactive, true);
				process::exit(0);
			},
			Ok(_) => {},
			Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => {
				let _ = writeln!(&mut io::stderr(), "psh: cannot read input: {}", e);
				process::exit(1);
			},
		}

		if let Flow::Exit(s) = run_line(&mut state, &cli, &line) {
			input::farewell(&mut stdout, interactive, false);
			process::exit(s);
		}
	}
}
