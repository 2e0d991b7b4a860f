pub mod ast;
pub mod error;
pub mod from_json;
pub mod interpreter;
pub mod json;
pub mod lexer;
pub mod parser;
pub mod stream;
pub mod token;
pub mod tree;
pub mod types;
pub mod validate;

use error::{CompileError, Diagnostic, DocumentError};
use interpreter::Program;
use stream::TokenStream;
use tracing::debug;
use tree::{Bindings, Value};

pub use validate::{validate_resources, validate_type, ValidationError};

// ── Core API ───────────────────────────────────────────────────────

/// A compiled program plus the lexical diagnostics collected on the way.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

/// The result of compiling and evaluating one source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub value: Value,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lex and parse `source` into an evaluable program.
///
/// Unrecognized input is reported in `diagnostics` and then rejected by the
/// parser wherever it appears in the token stream.
pub fn compile(source: &str) -> Result<Compiled, CompileError> {
    let lexed = lexer::tokenize(source)?;
    let document = parser::parse(TokenStream::new(&lexed.tokens))?;
    Ok(Compiled {
        program: interpreter::compile(document),
        diagnostics: lexed.diagnostics,
    })
}

/// Compile `source` and evaluate it against `bindings`.
pub fn compile_source(source: &str, bindings: &Bindings) -> Result<Evaluated, CompileError> {
    let Compiled {
        program,
        diagnostics,
    } = compile(source)?;
    let value = program.evaluate(bindings)?;
    Ok(Evaluated { value, diagnostics })
}

/// Concatenate document values into one sequence: sequences are spliced
/// in, unit is skipped, anything else is appended.
pub fn concat_documents(values: impl IntoIterator<Item = Value>) -> Value {
    let mut combined = Vec::new();
    for value in values {
        match value {
            Value::Array(items) => combined.extend(items),
            Value::Unit => {}
            other => combined.push(other),
        }
    }
    Value::Array(combined)
}

/// Compile a set of named documents independently and concatenate their
/// values (see [`concat_documents`]).
///
/// The first failure aborts and names its document.
pub fn compile_documents(
    documents: &[(String, String)],
    bindings: &Bindings,
) -> Result<Value, DocumentError> {
    let mut values = Vec::with_capacity(documents.len());
    for (name, source) in documents {
        let evaluated = compile_source(source, bindings).map_err(|source| DocumentError {
            name: name.clone(),
            source,
        })?;
        values.push(evaluated.value);
    }
    debug!(documents = documents.len(), "combined documents");
    Ok(concat_documents(values))
}

#[cfg(test)]
mod tests;
