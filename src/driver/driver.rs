//! Pipeline orchestration.
//!
//! One `Session` per translation unit: read, tokenize, preprocess, parse,
//! generate assembly, then hand off to the system assembler/linker (via
//! `cc`) for `-c` and full builds. `-E` prints the expanded token stream
//! instead.

use std::fmt::Write as _;
use std::path::Path;
use std::process::Command;

use crate::backend;
use crate::common::error::DriverError;
use crate::common::session::Session;
use crate::driver::cli::{self, Options};
use crate::frontend::lexer::lexer;
use crate::frontend::lexer::token::{Token, TokenKind};
use crate::frontend::parser::Parser;
use crate::frontend::preprocessor::Preprocessor;

pub fn run(args: &[String]) -> Result<(), DriverError> {
    let mut opts = cli::parse_args(&args[1..])?;
    cli::add_default_include_paths(&mut opts);

    let inputs = opts.inputs.clone();
    if inputs.len() > 1 && opts.output.is_some() && (opts.opt_c || opts.opt_s || opts.opt_e) {
        return Err(DriverError::Usage(
            "cannot specify '-o' with '-c', '-S' or '-E' with multiple files".to_string(),
        ));
    }

    let mut link_inputs: Vec<String> = Vec::new();
    let mut temp_files: Vec<String> = Vec::new();
    let mut result = Ok(());

    for input in &inputs {
        if input.ends_with(".o") || input.ends_with(".a") || input.ends_with(".so") {
            link_inputs.push(input.clone());
            continue;
        }

        result = (|| {
            if opts.opt_e {
                let text = preprocess_only(input, &opts)?;
                emit_output(&text, opts.output.as_deref())?;
                return Ok(());
            }

            let asm = compile_one(input, &opts)?;

            if opts.opt_s {
                let out = opts
                    .output
                    .clone()
                    .unwrap_or_else(|| replace_extn(input, ".s"));
                emit_output(&asm, Some(&out))?;
                return Ok(());
            }

            let asm_path = temp_path(input, ".s");
            write_file(&asm_path, &asm)?;
            temp_files.push(asm_path.clone());

            if opts.opt_c {
                let out = opts
                    .output
                    .clone()
                    .unwrap_or_else(|| replace_extn(input, ".o"));
                assemble(&asm_path, &out)?;
                return Ok(());
            }

            let obj_path = temp_path(input, ".o");
            assemble(&asm_path, &obj_path)?;
            temp_files.push(obj_path.clone());
            link_inputs.push(obj_path);
            Ok(())
        })();
        if result.is_err() {
            break;
        }
    }

    if result.is_ok() && !opts.opt_e && !opts.opt_s && !opts.opt_c && !link_inputs.is_empty() {
        let out = opts.output.clone().unwrap_or_else(|| "a.out".to_string());
        result = link(&link_inputs, &out);
    }

    for f in &temp_files {
        let _ = std::fs::remove_file(f);
    }
    result
}

fn read_input(path: &str) -> Result<String, DriverError> {
    if path == "-" {
        use std::io::Read;
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .map_err(|e| DriverError::Io {
                path: "<stdin>".to_string(),
                source: e,
            })?;
        return Ok(s);
    }
    std::fs::read_to_string(path).map_err(|e| DriverError::Io {
        path: path.to_string(),
        source: e,
    })
}

fn compile_one(input: &str, opts: &Options) -> Result<String, DriverError> {
    let mut sess = Session::new();
    let contents = read_input(input)?;
    let toks = lexer::tokenize(&mut sess, input, contents, true)?;
    let toks = {
        let mut pp = Preprocessor::new(&mut sess, opts, input);
        pp.run(toks)?
    };
    let prog = {
        let parser = Parser::new(&mut sess, toks);
        parser.parse()?
    };
    Ok(backend::x86::codegen(&mut sess, opts, &prog))
}

fn preprocess_only(input: &str, opts: &Options) -> Result<String, DriverError> {
    let mut sess = Session::new();
    let contents = read_input(input)?;
    let toks = lexer::tokenize(&mut sess, input, contents, true)?;
    let toks = {
        let mut pp = Preprocessor::new(&mut sess, opts, input);
        pp.run(toks)?
    };
    Ok(print_tokens(&toks))
}

/// Render an expanded token stream, preserving line breaks and spacing.
fn print_tokens(toks: &[Token]) -> String {
    let mut out = String::new();
    let mut first = true;
    for tok in toks {
        if tok.kind == TokenKind::Eof {
            break;
        }
        if tok.kind == TokenKind::FileMark {
            if !first {
                out.push('\n');
            }
            let _ = writeln!(out, "# 1 \"{}\"", tok.text);
            first = true;
            continue;
        }
        if tok.at_bol && !first {
            out.push('\n');
        } else if tok.has_space && !first {
            out.push(' ');
        }
        out.push_str(&tok.text);
        first = false;
    }
    out.push('\n');
    out
}

fn emit_output(text: &str, output: Option<&str>) -> Result<(), DriverError> {
    match output {
        None | Some("-") => {
            print!("{}", text);
            Ok(())
        }
        Some(path) => write_file(path, text),
    }
}

fn write_file(path: &str, text: &str) -> Result<(), DriverError> {
    std::fs::write(path, text).map_err(|e| DriverError::Io {
        path: path.to_string(),
        source: e,
    })
}

fn replace_extn(path: &str, extn: &str) -> String {
    let base = Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    match base.rfind('.') {
        Some(dot) => format!("{}{}", &base[..dot], extn),
        None => format!("{}{}", base, extn),
    }
}

fn temp_path(input: &str, extn: &str) -> String {
    let base = Path::new(input)
        .file_stem()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let nonce = std::process::id();
    std::env::temp_dir()
        .join(format!("rycc-{}-{}{}", nonce, base, extn))
        .to_string_lossy()
        .into_owned()
}

fn run_subprocess(mut cmd: Command) -> Result<(), DriverError> {
    let desc = format!("{:?}", cmd);
    match cmd.status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(DriverError::Subprocess(format!(
            "{} exited with {}",
            desc, status
        ))),
        Err(e) => Err(DriverError::Subprocess(format!("{}: {}", desc, e))),
    }
}

/// Assemble with the system toolchain.
fn assemble(asm_path: &str, out_path: &str) -> Result<(), DriverError> {
    let mut cmd = Command::new("cc");
    cmd.args(["-c", "-x", "assembler", asm_path, "-o", out_path]);
    run_subprocess(cmd)
}

/// Link with the system compiler driver so the C runtime and default
/// libraries come along.
fn link(objects: &[String], out_path: &str) -> Result<(), DriverError> {
    let mut cmd = Command::new("cc");
    cmd.args(objects);
    cmd.args(["-o", out_path, "-no-pie"]);
    run_subprocess(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_replacement() {
        assert_eq!(replace_extn("dir/foo.c", ".s"), "foo.s");
        assert_eq!(replace_extn("foo", ".o"), "foo.o");
    }
}
