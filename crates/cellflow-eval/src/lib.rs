//! cellflow-eval — the engine half of cellflow.
//!
//! Ingests per-cell serialized content, parses formulas, maintains the
//! bi-directional dependency graph across cells, named expressions, tables,
//! and cross-sheet references, and incrementally re-evaluates affected cells
//! with dynamic-array (spill) semantics, cycle detection, and error
//! propagation.

pub mod builtins;
pub mod engine;
pub mod eval;
pub mod function;
pub mod function_registry;
pub mod interpreter;
pub mod traits;

pub use cellflow_common::{
    CellAddr, CellKey, EngineError, ErrorKind, LiteralValue, RangeAddr, SheetKey,
};
pub use engine::events::{CellUpdate, EngineEvent, Subscription};
pub use engine::graph::{DependencyNode, NameScope, SheetSelector, TableArea};
pub use engine::store::{CellContent, CellInput};
pub use engine::{Engine, EngineApiError, EngineConfig};
pub use eval::{EvalResult, Extent, SpilledValue};
