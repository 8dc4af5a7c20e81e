//! # Chariot: Tree-Oriented Scripting Runtime
//!
//! Chariot evaluates short user-submitted programs against a mutable,
//! hierarchical data model (JSON, XML, YAML and CSV backed tree nodes, maps
//! and arrays). The same evaluation can be driven four ways:
//!
//! - synchronously through [`runtime::Runtime`],
//! - as a fire-and-forget execution with live log streaming
//!   ([`execution::ExecutionManager`]),
//! - under a step debugger ([`debugger::Debugger`]),
//! - repeatedly, as a belief-driven agent ([`agent::AgentScheduler`]).
//!
//! ## Processing Pipeline
//!
//! ```text
//! Source Code → Tokenizer → Parser → Evaluator ─┬─▶ Value
//!                                               ├─▶ LogBuffer ──▶ subscribers
//!                                               └─▶ Debugger ───▶ debug events
//! ```
//!
//! The [`tokenizer`] turns text into positioned tokens, the [`parser`] builds
//! an [`ast::Program`], and [`eval::Evaluator`] walks it against a
//! [`scope::Scope`]. Values live in [`value`]; arrays, maps and tree nodes are
//! shared handles that alias until explicitly cloned.
//!
//! ## Observers
//!
//! Log entries, debug events and agent events are fanned out through
//! [`event::SinkRegistry`]: bounded channels, non-blocking sends, and a slow
//! subscriber only ever loses its own events.
//!
//! ## Persistence
//!
//! [`serializer`] writes tree nodes into a signed, optionally encrypted and
//! compressed container, with key material supplied by a [`serializer::KeyStore`].
//!
//! ```rust
//! # use chariot::runtime::Runtime;
//! # use chariot::value::Value;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Runtime::default();
//! let value = runtime.run("declare(x, 'N', 5)\nassign(x, 10)\nx").await?;
//! assert_eq!(value, Value::Number(10.0));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod ast;
pub mod config;
pub mod debugger;
pub mod error;
pub mod eval;
pub mod event;
pub mod execution;
pub mod parser;
pub mod runtime;
pub mod scope;
pub mod serializer;
pub mod tokenizer;
pub mod value;

// Re-exports
pub use error::*;
pub use runtime::Runtime;
pub use value::Value;

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        // テストの前に一度だけ実行したい処理
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
