use std::env;
use std::fs;
use std::mem;
use std::path::PathBuf;
use std::process;

use lorikeet_parser::parse_program;
use lorikeet_syntax::Program;
use lorikeet_vm::{compile, run_source, EvalError, Limits, Object, Session};

const PROMPT: &str = ">> ";
const CONTINUATION_PROMPT: &str = ".. ";

fn print_usage() {
    eprintln!("lorikeet - The Lorikeet programming language");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  lorikeet                        Start interactive REPL");
    eprintln!("  lorikeet repl                   Start interactive REPL");
    eprintln!("  lorikeet <file>                 Run a file");
    eprintln!("  lorikeet run <file>             Run a file");
    eprintln!("  lorikeet --file <file>          Run a file");
    eprintln!("  lorikeet ast <file>             Print the syntax tree as JSON");
    eprintln!("  lorikeet disasm <file>          Print compiled bytecode");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --stack-size <n>  Operand stack slots (default 2048)");
    eprintln!("  --max-frames <n>  Maximum call depth (default 1024)");
    eprintln!("  -h, --help        Show this help message");
    eprintln!("  -V, --version     Show version information");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (limits, args) = match split_limits(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    };

    let command = args.first().map(String::as_str);
    match command {
        None | Some("repl") => run_repl(limits),
        Some("-h" | "--help") => print_usage(),
        Some("-V" | "--version" | "-v") => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Some(command @ ("run" | "--file" | "ast" | "disasm")) => {
            let Some(path) = args.get(1) else {
                eprintln!("usage: lorikeet {command} <file>");
                process::exit(1);
            };
            match command {
                "ast" => print_ast(path),
                "disasm" => print_disassembly(path),
                _ => run_file(path, limits),
            }
        }
        Some(flag) if flag.starts_with('-') => {
            eprintln!("error: unknown option `{flag}`");
            print_usage();
            process::exit(1);
        }
        Some(path) => run_file(path, limits),
    }
}

/// Pulls `--stack-size` and `--max-frames` out of the argument list,
/// returning the limits and the remaining arguments.
fn split_limits(args: &[String]) -> Result<(Limits, Vec<String>), String> {
    let mut limits = Limits::default();
    let mut rest = Vec::new();
    let mut index = 0;
    while index < args.len() {
        let flag = args[index].as_str();
        let target = match flag {
            "--stack-size" => &mut limits.stack_size,
            "--max-frames" => &mut limits.max_frames,
            _ => {
                rest.push(args[index].clone());
                index += 1;
                continue;
            }
        };
        let value = args
            .get(index + 1)
            .ok_or_else(|| format!("{flag} requires a value"))?;
        *target = match value.parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => return Err(format!("{flag} expects a positive integer, got `{value}`")),
        };
        index += 2;
    }
    Ok((limits, rest))
}

fn run_repl(limits: Limits) {
    println!("The Lorikeet programming language!");
    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(editor) => editor,
        Err(_) => {
            eprintln!("failed to start line editor");
            return;
        }
    };
    let history_path = env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".lorikeet_history"));
    if let Some(path) = history_path.as_ref() {
        let _ = rl.load_history(path);
    }

    let mut session = Session::new().with_limits(limits);
    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() {
            PROMPT
        } else {
            CONTINUATION_PROMPT
        };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(_) => break,
        };

        if buffer.is_empty() && line.trim() == "exit" {
            break;
        }
        if let Some(continued) = line.strip_suffix('\\') {
            buffer.push_str(continued);
            buffer.push('\n');
            continue;
        }
        buffer.push_str(&line);

        let source = mem::take(&mut buffer);
        if source.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(source.as_str());
        match session.eval(&source) {
            Ok(value) => println!("{value}"),
            Err(err) => eprintln!("{}", format_eval_error(&err, None)),
        }
    }

    if let Some(path) = history_path.as_ref() {
        let _ = rl.append_history(path);
    }
}

fn run_file(path: &str, limits: Limits) {
    let source = read_source(path);
    log::debug!("running {path} with {limits:?}");
    if let Err(err) = run_source(&source, limits) {
        eprintln!("{}", format_eval_error(&err, Some(path)));
        process::exit(1);
    }
}

fn print_ast(path: &str) {
    let program = parse_file(path);
    match serde_json::to_string_pretty(&program) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("error: failed to serialize syntax tree: {err}");
            process::exit(1);
        }
    }
}

fn print_disassembly(path: &str) {
    let program = parse_file(path);
    let bytecode = match compile(&program) {
        Ok(bytecode) => bytecode,
        Err(errors) => {
            eprintln!("{}", format_eval_error(&EvalError::Compile(errors), Some(path)));
            process::exit(1);
        }
    };

    println!("== main ==");
    print!("{}", bytecode.instructions);
    for (index, constant) in bytecode.constants.iter().enumerate() {
        let Object::CompiledFunction(function) = constant else {
            continue;
        };
        println!();
        println!(
            "== constant {index}: {} (params={}, locals={}) ==",
            function.name.as_deref().unwrap_or("<anonymous>"),
            function.num_parameters,
            function.num_locals
        );
        print!("{}", function.instructions);
    }
}

fn parse_file(path: &str) -> Program {
    let source = read_source(path);
    match parse_program(&source) {
        Ok(program) => program,
        Err(errors) => {
            eprintln!("{}", format_eval_error(&EvalError::Parse(errors), Some(path)));
            process::exit(1);
        }
    }
}

fn read_source(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: could not read {path}: {err}");
            process::exit(1);
        }
    }
}

fn format_eval_error(err: &EvalError, path: Option<&str>) -> String {
    let message = err.to_string();
    match path {
        Some(path) => message
            .lines()
            .map(|line| format!("{path}: {line}"))
            .collect::<Vec<_>>()
            .join("\n"),
        None => message,
    }
}
