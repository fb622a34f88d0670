use std::{env, fs, path::Path};

use tracing_subscriber::EnvFilter;

use bigton::bytecode::compile::emit;
use bigton::bytecode::decode::LoadedProgram;
use bigton::bytecode::disasm::print_bc;
use bigton::bytecode::encode::encode;
use bigton::compiler::{SourceFile, compile};
use bigton::frontend::lexer::{Spanned, tokenize};
use bigton::frontend::parser::Parser;
use bigton::frontend::token_dumper::TokenDumper;
use bigton::lang::feature::{Feature, FeatureSet};
use bigton::profile::{ProcessorModel, ProcessorProfile};
use bigton::queue::CompilationOutcome;
use bigton::runtime::builtins::Registry;
use bigton::runtime::stdlib;
use bigton::runtime::{TickOutcome, Vm, VmConfig, run_tick};

/// Flags that consume the following argument.
const VALUE_FLAGS: [&str; 4] = ["--features", "--ticks", "--model", "--emit"];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bigton=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() == 1 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let ast = args.contains(&"--ast".to_string());
    let bytecode = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());

    let ticks = match flag_value(&args, "--ticks") {
        Some(n) => n.parse::<u32>().unwrap_or_else(|_| {
            eprintln!("Error: --ticks expects a number, got '{}'", n);
            std::process::exit(1);
        }),
        None => 100,
    };
    let profile = flag_value(&args, "--model").map(|name| {
        ProcessorModel::from_name(name).map(ProcessorProfile::new).unwrap_or_else(|| {
            eprintln!("Error: unknown processor model '{}'", name);
            std::process::exit(1);
        })
    });
    let features = match (flag_value(&args, "--features"), &profile) {
        (Some(list), _) => parse_features(list),
        (None, Some(profile)) => profile.features(),
        (None, None) => FeatureSet::all(),
    };
    let config = profile.map(|p| p.vm_config()).unwrap_or_default();

    let sources = read_sources(&args);

    if tokens_only {
        dump_tokens(&sources, no_color, pretty);
        return;
    }

    let registry: Registry<()> = match &profile {
        Some(profile) => profile.registry(Vec::new()),
        None => Registry::new()
            .with_module(stdlib::standard())
            .with_module(stdlib::memory())
            .with_module(stdlib::floating_point()),
    };
    if let Some(path) = flag_value(&args, "--emit") {
        emit_outcome(&sources, features, &registry, path);
        return;
    }
    run_program(&sources, features, config, &registry, ast, bytecode, ticks);
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let at = args.iter().position(|a| a == flag)?;
    match args.get(at + 1) {
        Some(value) => Some(value.as_str()),
        None => {
            eprintln!("Error: {} expects a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse_features(list: &str) -> FeatureSet {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            Feature::from_name(name).unwrap_or_else(|| {
                eprintln!("Error: unknown feature '{}'", name);
                std::process::exit(1);
            })
        })
        .collect()
}

fn read_sources(args: &[String]) -> Vec<SourceFile> {
    let mut files = Vec::new();
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        ensure_extension(arg);
        match fs::read_to_string(arg) {
            Ok(text) => files.push(SourceFile::new(arg.clone(), text)),
            Err(e) => {
                eprintln!("Failed to read '{}': {}", arg, e);
                std::process::exit(1);
            }
        }
    }
    if files.is_empty() {
        print_usage();
        std::process::exit(1);
    }
    files
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("bt") {
        eprintln!("Error: expected a .bt file, got {}", filename);
        std::process::exit(1);
    }
}

fn lex_all(sources: &[SourceFile]) -> Vec<Spanned> {
    let mut tokens = Vec::new();
    for source in sources {
        match tokenize(&source.name, &source.text) {
            Ok(t) => tokens.extend(t),
            Err(e) => {
                eprintln!("Lexer error: {}", e);
                std::process::exit(1);
            }
        }
    }
    tokens
}

fn dump_tokens(sources: &[SourceFile], no_color: bool, pretty: bool) {
    let tokens = lex_all(sources);
    let mut dumper = TokenDumper::new();

    if no_color {
        dumper = dumper.no_color();
    }
    if pretty {
        dumper = dumper.pretty();
    }

    dumper.dump(&tokens);
}

/// Writes the compilation outcome as a client would receive it.
fn emit_outcome(sources: &[SourceFile], features: FeatureSet, registry: &Registry<()>, path: &str) {
    let outcome = CompilationOutcome::from(compile(sources, features, &registry.signatures()));
    let bytes = match outcome.to_wire() {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to encode outcome: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = fs::write(path, bytes) {
        eprintln!("Failed to write '{}': {}", path, e);
        std::process::exit(1);
    }
    if let CompilationOutcome::Failed(e) = outcome {
        eprintln!("Compile error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("BIGTON - Robot Scripting Language");
    println!();
    println!("Usage:");
    println!("  bigton <file.bt>...               Compile and run a program");
    println!("  bigton --tokens <file.bt>         Show tokens only (--no-color, --pretty)");
    println!("  bigton --ast <file.bt>            Show the syntax tree");
    println!("  bigton --bc <file.bt>             Show the disassembled binary, then run");
    println!("  bigton --features fpu,objects,memory,functions <file.bt>");
    println!("                                    Enable only the listed features");
    println!("  bigton --model bigton-2050 <file.bt>");
    println!("                                    Use a processor model's limits");
    println!("  bigton --ticks N <file.bt>        Stop after N ticks (default 100)");
    println!("  bigton --emit out.bin <file.bt>   Write the compilation outcome for a client");
    println!("  bigton --help, -h                 Show this help");
}

fn run_program(
    sources: &[SourceFile],
    features: FeatureSet,
    config: VmConfig,
    registry: &Registry<()>,
    ast: bool,
    bytecode: bool,
    ticks: u32,
) {
    let tokens = lex_all(sources);

    // Parse
    let program = match Parser::new(tokens).parse() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if ast {
        println!("{:#?}", program);
        return;
    }

    let binary = match emit(&program, features, &registry.signatures()) {
        Ok(ir) => encode(&ir),
        Err(e) => {
            eprintln!("Compile error: {}", e);
            std::process::exit(1);
        }
    };

    if bytecode {
        match LoadedProgram::decode(&binary) {
            Ok(loaded) => print_bc(&loaded),
            Err(e) => {
                eprintln!("Decode error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut vm = match Vm::new(&binary, config) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("Load error: {}", e);
            std::process::exit(1);
        }
    };

    for _ in 0..ticks {
        let report = run_tick(&mut vm, registry, &mut ());
        for line in &report.log_lines {
            println!("{}", line);
        }
        match report.outcome {
            TickOutcome::Yielded | TickOutcome::Suspended => {}
            TickOutcome::Completed => return,
            TickOutcome::Faulted(_) => std::process::exit(1),
        }
    }
}
