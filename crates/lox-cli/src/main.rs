//! Binaire `lox`.
//!
//! Tout le travail (arguments, lecture du source, exécution ou
//! désassemblage) est dans `lox_cli::run()` ; ici on ne fait que le setup
//! du processus.

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("rapports d'erreurs non stylés ({e})");
    }
    env_logger::init();

    if let Err(err) = lox_cli::run() {
        eprintln!("lox: {err:#}");
        std::process::exit(1);
    }
}
