use std::{env, fs, path::Path, process};

use tracing_subscriber::EnvFilter;

use fourst::bytecode::disasm::print_program;
use fourst::bytecode::{BuildMode, Compiler, Program, is_main_word, is_test_word};
use fourst::frontend::{FsReader, Lexer, token_dumper::TokenDumper};
use fourst::runtime::{HaltingReason, Machine, VmConfig, VmState, run_exports};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("FOURST_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let bytecode = args.contains(&"--bc".to_string());
    let run_main = args.contains(&"--main".to_string());
    let mode = if args.contains(&"--release".to_string()) {
        BuildMode::Release
    } else {
        BuildMode::Debug
    };

    let mut config = VmConfig::default();
    if let Some(i) = args.iter().position(|a| a == "--cycles") {
        match args.get(i + 1).and_then(|n| n.parse::<i64>().ok()) {
            Some(n) if n > 0 => config.cycle_budget = n,
            _ => {
                eprintln!("Error: --cycles expects a positive number");
                process::exit(1);
            }
        }
    }

    // first non-flag argument is the filename, skipping the --cycles value
    let filename = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with('-') && args[i - 1] != "--cycles")
        .map(|(_, a)| a);

    let Some(filename) = filename else {
        print_usage();
        process::exit(1);
    };
    ensure_extension(filename);

    if tokens_only {
        dump_tokens(filename, no_color, pretty);
        return;
    }

    let program = build(filename, mode, run_main);
    if bytecode {
        print_program(&program);
        return;
    }

    let machine = Machine::new(program);
    let ok = if run_main {
        run_mains(&machine, &config)
    } else {
        run_tests(&machine, &config)
    };
    if !ok {
        process::exit(1);
    }
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("4st") {
        eprintln!("Error: expected a .4st file, got {}", filename);
        process::exit(1);
    }
}

fn dump_tokens(filename: &str, no_color: bool, pretty: bool) {
    let source = match fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            process::exit(1);
        }
    };

    match Lexer::new(filename, &source).tokenize() {
        Ok(tokens) => {
            let mut dumper = TokenDumper::new();
            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }
            dumper.dump(&tokens);
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            process::exit(1);
        }
    }
}

fn build(filename: &str, mode: BuildMode, run_main: bool) -> Program {
    let path = Path::new(filename);
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let entry = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    let unit = match Compiler::new(FsReader::new(dir)).compile(entry, mode) {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("Compile error: {}", e);
            process::exit(1);
        }
    };

    let traced = if run_main {
        unit.trace(is_main_word)
    } else {
        unit.trace(is_test_word)
    };
    match traced {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Link error: {}", e);
            process::exit(1);
        }
    }
}

fn run_tests(machine: &Machine, config: &VmConfig) -> bool {
    let reports = run_exports(machine, config);
    if reports.is_empty() {
        println!("no test_ words found");
        return true;
    }

    let width = reports.iter().map(|r| r.path.len()).max().unwrap_or(0);
    let mut failed = 0;
    for report in &reports {
        println!("{:<width$} {}", report.path, report.outcome, width = width + 2);
        if !report.outcome.passed() {
            failed += 1;
        }
    }
    println!();
    println!("{} passed, {} failed", reports.len() - failed, failed);
    failed == 0
}

fn print_dump(state: &VmState) {
    println!("dump: {:?}", state.tagged_stack());
}

fn run_mains(machine: &Machine, config: &VmConfig) -> bool {
    let mut ok = true;
    for (index, export) in machine.program().root_exports() {
        let mut state = match machine.start(index, config) {
            Ok(state) => state,
            Err(e) => {
                eprintln!("{}: {}", export.path, e);
                ok = false;
                continue;
            }
        };

        let reason = loop {
            match machine.run_with(&mut state, None, &mut print_dump) {
                HaltingReason::Brk | HaltingReason::UsrBrk => continue,
                reason => break reason,
            }
        };

        match reason {
            HaltingReason::End => {
                println!("{}: {:?}", export.path, state.tagged_stack());
            }
            reason => {
                eprintln!(
                    "{}: halted with {} at {}",
                    export.path,
                    reason,
                    machine.position_human(&state)
                );
                ok = false;
            }
        }
    }
    ok
}

fn print_usage() {
    println!("4ST - stack language compiler and bytecode VM");
    println!();
    println!("Usage:");
    println!("  fourst <file.4st>             Run every test_ word as a test");
    println!("  fourst --main <file.4st>      Run every main_ word and print its stack");
    println!("  fourst --bc <file.4st>        Print the linked bytecode");
    println!("  fourst --tokens <file.4st>    Show tokens only (--no-color, --pretty)");
    println!("  fourst --release <file.4st>   Build without debug instructions");
    println!("  fourst --cycles N <file.4st>  Cycle budget per export");
    println!("  fourst --help, -h             Show this help");
    println!();
    println!("Set FOURST_LOG (e.g. FOURST_LOG=debug) to control logging.");
}
