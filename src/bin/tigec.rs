//! The driver binary: takes a source file and an output stage selector,
//! mirroring the teacher's own `smolc` multi-stage dump binary (tokens,
//! AST, IR, codegen) with this crate's own stages (tokens, AST, bytecode,
//! run).

use clap::{Parser, ValueEnum};

use tigelang::compiler::compile;
use tigelang::front::{lex::Lexer, parse};
use tigelang::vm::{self, VmLimits};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// The input source file.
    file: String,

    /// What to emit.
    #[arg(value_enum, short, long, default_value_t = Emit::Run)]
    emit: Emit,

    #[arg(long, default_value_t = VmLimits::default().stack_capacity)]
    stack_capacity: usize,

    #[arg(long, default_value_t = VmLimits::default().register_count)]
    register_count: usize,

    #[arg(long, default_value_t = VmLimits::default().call_stack_capacity)]
    call_stack_capacity: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Emit {
    /// The lexed token stream.
    Tokens,
    /// The parsed syntax tree.
    Ast,
    /// The compiled bytecode, disassembled.
    Bytecode,
    /// Compile and execute, printing the resulting value.
    Run,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let input = String::from_utf8(std::fs::read(&args.file).expect("file should be readable"))
        .expect("input should be valid utf-8");

    match args.emit {
        Emit::Tokens => {
            let mut lexer = Lexer::new(&input);
            loop {
                match lexer.next() {
                    Ok(Some(tok)) => println!("{tok}"),
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("lex error: {e}");
                        std::process::exit(1);
                    }
                }
            }
        }
        Emit::Ast => match parse(&input) {
            Ok(program) => println!("{program:#?}"),
            Err(errors) => {
                eprint!("{errors}");
                std::process::exit(1);
            }
        },
        Emit::Bytecode => {
            let program = match parse(&input) {
                Ok(p) => p,
                Err(errors) => {
                    eprint!("{errors}");
                    std::process::exit(1);
                }
            };
            match compile(&program, 1024) {
                Ok(compiled) => print!("{}", compiled.buffer.disassemble()),
                Err(e) => {
                    eprintln!("compile error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Emit::Run => {
            let limits = VmLimits {
                stack_capacity: args.stack_capacity,
                register_count: args.register_count,
                call_stack_capacity: args.call_stack_capacity,
            };
            let program = match parse(&input) {
                Ok(p) => p,
                Err(errors) => {
                    eprint!("{errors}");
                    std::process::exit(1);
                }
            };
            let compiled = match compile(&program, 1024) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("compile error: {e}");
                    std::process::exit(1);
                }
            };
            match vm::execute(&compiled, limits) {
                Ok(value) => println!("{value}"),
                Err(e) => {
                    eprintln!("runtime error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
