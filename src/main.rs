use clap::{Parser, ValueEnum};
use kyml::error::{CompileError, Diagnostic, Position};
use kyml::from_json::bindings_from_json;
use kyml::tree::Bindings;
use kyml::{compile_source, concat_documents, validate_resources};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "kyml", version, about = "Compile kyml manifests to plain YAML/JSON data")]
struct Cli {
    /// Source files or directories of `*.kyml` files. Reads stdin when empty or `-`.
    paths: Vec<PathBuf>,

    /// JSON object of initial bindings
    #[arg(long)]
    bindings: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Check that every emitted document has string `apiVersion` and `kind`
    #[arg(long)]
    check_resources: bool,

    /// Log pipeline stages to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(message) = run(&cli) {
        eprintln!("error: {}", message);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let bindings = match &cli.bindings {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            bindings_from_json(&text).map_err(|e| format!("{}: {}", path.display(), e))?
        }
        None => Bindings::new(),
    };

    let documents = read_documents(&cli.paths)?;
    debug!(documents = documents.len(), "read input");

    let mut values = Vec::with_capacity(documents.len());
    for (name, source) in &documents {
        match compile_source(source, &bindings) {
            Ok(evaluated) => {
                for diagnostic in &evaluated.diagnostics {
                    report_diagnostic(name, source, diagnostic);
                }
                values.push(evaluated.value);
            }
            Err(err) => {
                report_error(name, source, &err);
                process::exit(1);
            }
        }
    }

    let value = if values.len() == 1 {
        values.pop().unwrap_or_default()
    } else {
        concat_documents(values)
    };

    if cli.check_resources {
        let errors = validate_resources(&value);
        if !errors.is_empty() {
            for err in &errors {
                let path = if err.path.is_empty() {
                    "$".to_string()
                } else {
                    err.path.join(".")
                };
                eprintln!("{}: {} ({})", path, err.message, err.code);
            }
            process::exit(2);
        }
    }

    let output = match cli.format {
        Format::Json => value.to_json_pretty(),
        Format::Yaml => kyml::json::to_yaml(&value).map_err(|e| e.to_string())?,
    };
    println!("{}", output.trim_end());
    Ok(())
}

/// Load every input as `(name, source)`. Directory entries are sorted by
/// file name.
fn read_documents(paths: &[PathBuf]) -> Result<Vec<(String, String)>, String> {
    if paths.is_empty() || (paths.len() == 1 && paths[0] == Path::new("-")) {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| format!("cannot read stdin: {}", e))?;
        return Ok(vec![("<stdin>".to_string(), input)]);
    }

    let mut documents = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "kyml"))
                .collect();
            files.sort();
            for file in files {
                documents.push(read_file(&file)?);
            }
        } else {
            documents.push(read_file(path)?);
        }
    }
    Ok(documents)
}

fn read_file(path: &Path) -> Result<(String, String), String> {
    let source =
        fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok((path.display().to_string(), source))
}

fn report_diagnostic(name: &str, source: &str, diagnostic: &Diagnostic) {
    eprintln!("WARNING IN {} AT LINE {}:", name, diagnostic.begin.line + 1);
    print_underlined(source, diagnostic.begin, diagnostic.end);
    eprintln!("{}", diagnostic.message);
    eprintln!();
}

fn report_error(name: &str, source: &str, err: &CompileError) {
    // Spans index the newline-normalized source.
    let normalized = source.replace("\r\n", "\n");
    match err.span() {
        Some(span) => {
            let begin = Position::at(&normalized, span.start);
            let end = Position::at(&normalized, span.end);
            eprintln!(
                "{} ERROR IN {} AT LINE {}:",
                err.stage().to_uppercase(),
                name,
                begin.line + 1
            );
            print_underlined(&normalized, begin, end);
        }
        None => eprintln!("{} ERROR IN {}:", err.stage().to_uppercase(), name),
    }
    eprintln!("{}", err);
    eprintln!();
}

fn print_underlined(source: &str, begin: Position, end: Position) {
    let line_text = source.lines().nth(begin.line).unwrap_or("");
    eprintln!("{}", line_text);

    let start_col = begin.column;
    let line_len = line_text.chars().count();
    let end_col = if begin.line == end.line && end.column > start_col {
        end.column
    } else if start_col < line_len {
        // Point error or spans multiple lines: underline to end of line
        line_len
    } else {
        start_col + 1
    };

    let mut underline = " ".repeat(start_col);
    underline.push('^');
    if end_col > start_col + 1 {
        underline.push_str(&"_".repeat(end_col - start_col - 1));
    }
    eprintln!("{}", underline);
}
