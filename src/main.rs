use std::cell::RefCell;
use std::process;
use std::rc::Rc;

use ariadne::{Color, Label, Report, ReportKind, Source};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use cubescript::{ErrorReport, State, Value};

#[derive(Parser)]
#[command(name = "cubescript")]
#[command(about = "A CubeScript interpreter")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Expression to evaluate (if no subcommand is given)
    #[arg(value_name = "EXPRESSION")]
    expression: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file
    Run {
        /// Script file to execute
        file: String,
    },
    /// Evaluate a one-line expression
    Eval {
        /// Expression to evaluate
        expression: String,
    },
    /// Start an interactive session
    Repl,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { file }) => {
            if run_file(&file).is_err() {
                process::exit(1);
            }
        }
        Some(Commands::Eval { expression }) => eval_expression(&expression),
        Some(Commands::Repl) => repl(),
        None => {
            if let Some(expression) = cli.expression {
                eval_expression(&expression);
            } else {
                repl();
            }
        }
    }
}

fn run_file(path: &str) -> Result<(), ()> {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("could not read {}: {}", path, e);
            return Err(());
        }
    };

    let reports: Rc<RefCell<Vec<ErrorReport>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);

    let mut cs = State::new();
    cs.set_error_hook(move |report| {
        sink.borrow_mut().push(report.clone());
    });
    let result = cs.run_file(path);

    for report in reports.borrow().iter() {
        render_report(path, &source, report);
    }
    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            eprintln!("{}", e);
            Err(())
        }
    }
}

/// Pretty-prints a diagnostic against the source when it carries an offset,
/// otherwise falls back to the plain prefixed form.
fn render_report(path: &str, source: &str, report: &ErrorReport) {
    let Some(offset) = report.offset.filter(|&o| o <= source.len()) else {
        eprintln!("{}", report);
        return;
    };
    let end = (offset + 1).min(source.len());
    let first_line = report.message.lines().next().unwrap_or("");
    let _ = Report::build(ReportKind::Error, (path, offset..end))
        .with_message(first_line)
        .with_label(
            Label::new((path, offset..end))
                .with_message(first_line)
                .with_color(Color::Red),
        )
        .finish()
        .eprint((path, Source::from(source)));
}

fn eval_expression(expression: &str) {
    let mut cs = State::new();
    match cs.run(expression) {
        Value::Null => {}
        v => println!("{}", v.get_str()),
    }
}

fn repl() {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("could not start line editor: {}", e);
            return;
        }
    };
    let mut cs = State::new();
    println!("cubescript interactive session, :quit to exit");

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == ":quit" || line == ":q" {
                    break;
                }
                let _ = rl.add_history_entry(line);
                match cs.run(line) {
                    Value::Null => {}
                    v => println!("{}", v.get_str()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("input error: {}", e);
                break;
            }
        }
    }
}
