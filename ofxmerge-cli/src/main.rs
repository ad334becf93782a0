//! CLI-утилита для слияния выписок OFX одного счета.

use clap::{Parser, ValueEnum};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use ofxmerge_engine::{FingerprintStrategy, FitIdStrategy, MatchStrategy, MergeSession};

/// Способ сопоставления транзакций из разных файлов.
#[derive(Clone, Copy, ValueEnum)]
enum MatchArg {
    /// Тип, день проводки, получатель и сумма
    Fingerprint,
    /// FITID, если указан, иначе отпечаток
    FitId,
}

/// OFX Merge - слияние выписок OFX.
///
/// Объединяет выписки одного счета за пересекающиеся периоды и удаляет
/// транзакции, повторяющиеся в разных файлах.
#[derive(Parser)]
#[command(name = "ofxmerge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Файлы выписок в порядке слияния
    files: Vec<PathBuf>,

    /// Выходной файл (по умолчанию stdout)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Способ сопоставления транзакций
    #[arg(long = "match-by", value_enum, default_value = "fingerprint")]
    match_by: MatchArg,
}

fn add_file<S: MatchStrategy>(session: &mut MergeSession<S>, path: &Path) -> Result<(), String> {
    let content = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    session
        .add(&content)
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn write_output(output: Option<&Path>, bytes: &[u8]) -> Result<(), String> {
    match output {
        Some(path) => {
            let mut file = File::create(path)
                .map_err(|e| format!("Не удалось создать файл '{}': {}", path.display(), e))?;
            file.write_all(bytes)
                .map_err(|e| format!("Ошибка записи: {}", e))
        }
        None => io::stdout()
            .write_all(bytes)
            .map_err(|e| format!("Ошибка записи: {}", e)),
    }
}

fn run<S: MatchStrategy>(args: &Args, mut session: MergeSession<S>) -> Result<(), String> {
    for path in &args.files {
        add_file(&mut session, path)?;
    }

    let merged = session.merge().map_err(|e| e.to_string())?;
    write_output(args.output.as_deref(), &merged)
}

fn main() {
    let args = Args::parse();

    let result = match args.match_by {
        MatchArg::Fingerprint => run(&args, MergeSession::with_strategy(FingerprintStrategy)),
        MatchArg::FitId => run(&args, MergeSession::with_strategy(FitIdStrategy)),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        process::exit(1);
    }
}
