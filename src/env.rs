//! Kernel command line parsing (spec §6).
//!
//! The command line is a flat string of `-flag [args...]` tokens, with
//! arguments for a flag optionally grouped inside double quotes (so a single
//! argument can contain spaces). Parsing is a small explicit state machine
//! rather than a generic tokenizer, mirroring the teacher's `environment.rs`
//! approach of keeping boot-time parsing allocation-light and panic-free.

use alloc::string::String;
use alloc::vec::Vec;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::errno::{Error, Result};

/// A handler registered for one command line flag.
pub type FlagHandler = fn(args: &[&str]) -> Result<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Scanning,
	NameConsume,
	ArgsFind,
	ArgsConsume,
	SubargsConsume,
}

/// Table of flag name -> handler, consulted once the whole command line has
/// been tokenized.
pub struct FlagRegistry {
	handlers: HashMap<&'static str, FlagHandler, RandomState>,
}

impl FlagRegistry {
	pub fn new() -> Self {
		Self {
			handlers: HashMap::with_hasher(RandomState::with_seeds(0, 0, 0, 0)),
		}
	}

	/// Registers `handler` to run when `name` (without its leading `-`) is
	/// seen on the command line. Re-registering the same name overwrites the
	/// previous handler.
	pub fn register(&mut self, name: &'static str, handler: FlagHandler) {
		self.handlers.insert(name, handler);
	}

	/// Tokenizes `cmdline` and invokes every registered handler whose flag
	/// appears, in the order the flags appear. Unknown flags are ignored
	/// rather than treated as an error, since a kernel command line is
	/// routinely shared across several build configurations.
	pub fn parse_and_dispatch(&self, cmdline: &str) -> Result<()> {
		for (name, args) in tokenize(cmdline)? {
			if let Some(handler) = self.handlers.get(name.as_str()) {
				let refs: Vec<&str> = args.iter().map(String::as_str).collect();
				handler(&refs)?;
			}
		}
		Ok(())
	}
}

impl Default for FlagRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Runs the state machine described in spec §6 and returns `(flag name,
/// argument list)` pairs in the order they occur.
fn tokenize(cmdline: &str) -> Result<Vec<(String, Vec<String>)>> {
	let mut out = Vec::new();
	let mut state = State::Scanning;
	let mut name = String::new();
	let mut args: Vec<String> = Vec::new();
	let mut current_arg = String::new();

	let mut chars = cmdline.chars().peekable();
	let mut have_flag = false;

	macro_rules! flush {
		() => {
			if have_flag {
				out.push((core::mem::take(&mut name), core::mem::take(&mut args)));
				have_flag = false;
			}
		};
	}

	loop {
		let c = chars.peek().copied();

		match state {
			State::Scanning => match c {
				None => break,
				Some('-') => {
					chars.next();
					name.clear();
					args.clear();
					have_flag = true;
					state = State::NameConsume;
				}
				Some(_) => {
					chars.next();
				}
			},
			State::NameConsume => match c {
				None | Some('-') => {
					flush!();
					state = State::Scanning;
				}
				Some(ch) if ch.is_whitespace() => {
					chars.next();
					state = State::ArgsFind;
				}
				Some(ch) => {
					chars.next();
					name.push(ch);
				}
			},
			State::ArgsFind => match c {
				None | Some('-') => {
					flush!();
					state = State::Scanning;
				}
				Some(ch) if ch.is_whitespace() => {
					chars.next();
				}
				Some('"') => {
					chars.next();
					current_arg.clear();
					state = State::SubargsConsume;
				}
				Some(_) => {
					current_arg.clear();
					state = State::ArgsConsume;
				}
			},
			State::ArgsConsume => match c {
				None => {
					args.push(core::mem::take(&mut current_arg));
					flush!();
					state = State::Scanning;
				}
				Some(ch) if ch.is_whitespace() => {
					args.push(core::mem::take(&mut current_arg));
					chars.next();
					state = State::ArgsFind;
				}
				Some(ch) => {
					chars.next();
					current_arg.push(ch);
				}
			},
			State::SubargsConsume => match c {
				None => return Err(Error::BadParameter),
				Some('"') => {
					chars.next();
					args.push(core::mem::take(&mut current_arg));
					state = State::ArgsFind;
				}
				Some(ch) => {
					chars.next();
					current_arg.push(ch);
				}
			},
		}
	}

	flush!();

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_args_flag() {
		let tokens = tokenize("-verbose").unwrap();
		assert_eq!(tokens, alloc::vec![("verbose".into(), alloc::vec![])]);
	}

	#[test]
	fn single_arg_flag() {
		let tokens = tokenize("-loglevel debug").unwrap();
		assert_eq!(
			tokens,
			alloc::vec![("loglevel".into(), alloc::vec!["debug".into()])]
		);
	}

	#[test]
	fn quoted_subargs_with_spaces() {
		let tokens = tokenize(r#"-root "/dev/my disk""#).unwrap();
		assert_eq!(
			tokens,
			alloc::vec![("root".into(), alloc::vec!["/dev/my disk".into()])]
		);
	}

	#[test]
	fn multiple_flags() {
		let tokens = tokenize("-smp 4 -verbose -root /dev/sda").unwrap();
		assert_eq!(
			tokens,
			alloc::vec![
				("smp".into(), alloc::vec!["4".into()]),
				("verbose".into(), alloc::vec![]),
				("root".into(), alloc::vec!["/dev/sda".into()]),
			]
		);
	}

	#[test]
	fn unterminated_quote_is_bad_parameter() {
		assert_eq!(tokenize(r#"-root "unterminated"#), Err(Error::BadParameter));
	}

	#[test]
	fn dispatch_invokes_registered_handler() {
		use core::sync::atomic::{AtomicBool, Ordering};
		static CALLED: AtomicBool = AtomicBool::new(false);
		fn handler(args: &[&str]) -> Result<()> {
			assert_eq!(args, ["4"]);
			CALLED.store(true, Ordering::SeqCst);
			Ok(())
		}

		let mut registry = FlagRegistry::new();
		registry.register("smp", handler);
		registry.parse_and_dispatch("-smp 4").unwrap();
		assert!(CALLED.load(Ordering::SeqCst));
	}
}
