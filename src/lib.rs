//! # cubescript
//!
//! An embeddable interpreter for the CubeScript configuration language:
//! a single-pass compiler emitting packed 32-bit opcodes, and a stack-based
//! VM dispatching them against a table of aliases, variables and
//! host-registered commands.
//!
//! ## Modules
//!
//! - [`value`] - tagged runtime values and forcing rules
//! - [`code`] - refcounted bytecode blocks
//! - [`compile`] - the byte-level single-pass compiler (via [`State::compile`])
//! - [`state`] - interpreter state, registration and thread handles
//! - [`list`] - the list tokenizer used by the list command family
//!
//! ## Example
//!
//! ```
//! use cubescript::{State, Value};
//!
//! let mut cs = State::new();
//! assert_eq!(cs.run_int("+ 1 2 3"), 6);
//!
//! cs.run("alias greet [format \"hi %1\" $arg1]");
//! assert_eq!(cs.run_str("greet world"), "hi world");
//!
//! cs.new_command("double", "i", |_, args, res| {
//!     *res = Value::Int(args[0].get_int() * 2);
//!     Ok(())
//! })
//! .unwrap();
//! assert_eq!(cs.run_int("double 21"), 42);
//! ```

pub mod code;
pub mod errors;
pub mod list;
pub mod value;

mod compile;
mod ident;
mod pool;
mod state;
mod stdlib;
mod vm;

pub use code::{CodeRef, MacroStr, MAX_ARGUMENTS, MAX_COM_ARGS, MAX_RESULTS, MAX_RUN_DEPTH};
pub use compile::{escape_string, unescape_string};
pub use errors::{CmdResult, Control, CsError, ErrorReport};
pub use ident::{
    Builtin, CommandFn, VarFn, IDF_ARG, IDF_HEX, IDF_OVERRIDDEN, IDF_OVERRIDE, IDF_PERSIST,
    IDF_READONLY, IDF_UNKNOWN,
};
pub use state::{HookFn, State};
pub use value::Value;
