//! La logique du binaire `lox`, séparée de `main.rs` pour être testable.
//!
//! Usage :
//!   lox script.lox            exécute un source
//!   lox --disasm script.lox   compile et liste le bytecode sans exécuter
//!   lox --trace script.lox    exécute avec trace (pile + instructions)
//!
//! Codes de sortie : 0 succès, 65 erreur de compilation, 70 erreur
//! d'exécution, 1 erreur d'environnement (fichier illisible…). Les
//! diagnostics eux-mêmes partent sur stderr depuis le compilateur/la VM.

use std::fs;
use std::process;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;

use lox_compiler::compile;
use lox_core::bytecode::disasm::disassemble_function;
use lox_core::table::Interner;
use lox_vm::{InterpretError, Vm, VmOptions};

/// Parse les arguments, charge le source et dispatch exécution ou
/// désassemblage. `main.rs` ne fait rien d'autre qu'appeler ceci.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.file)
        .with_context(|| format!("lecture {}", cli.file))?;
    log::debug!("source chargé : {} ({} octets)", cli.file, source.len());

    if cli.disasm {
        return cmd_disasm(&source);
    }
    cmd_run(&source, cli.trace)
}

#[derive(Parser, Debug)]
#[command(name = "lox", version, about = "Lox language tool")]
struct Cli {
    /// Fichier source à exécuter
    file: Utf8PathBuf,

    /// Désassemble le bytecode compilé au lieu de l'exécuter
    #[arg(long)]
    disasm: bool,

    /// Trace d'exécution (pile + instruction désassemblée) sur stderr
    #[arg(long)]
    trace: bool,
}

fn cmd_run(source: &str, trace: bool) -> Result<()> {
    let mut vm = Vm::with_options(VmOptions::default().with_trace(trace));
    match vm.interpret(source) {
        Ok(()) => Ok(()),
        // Les diagnostics sont déjà sur stderr ; on ne garde que le code.
        Err(InterpretError::Compile(_)) => process::exit(65),
        Err(InterpretError::Runtime) => process::exit(70),
    }
}

fn cmd_disasm(source: &str) -> Result<()> {
    let mut interner = Interner::new();
    let Ok(function) = compile(source, &mut interner) else {
        process::exit(65);
    };
    print!("{}", disassemble_function(&function));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from(["lox", "--disasm", "script.lox"]);
        assert!(cli.disasm);
        assert!(!cli.trace);
        assert_eq!(cli.file, Utf8PathBuf::from("script.lox"));
    }

    #[test]
    fn cli_requires_a_file() {
        assert!(Cli::try_parse_from(["lox"]).is_err());
    }
}
