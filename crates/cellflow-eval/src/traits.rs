//! Function-facing seams: the invocation context handed to builtins and the
//! provider trait that resolves names to implementations.

use std::sync::Arc;

use cellflow_common::{EngineError, ErrorKind, LiteralValue};
use cellflow_parse::parser::AstNode;

use crate::eval::EvalResult;
use crate::function::Function;
use crate::function_registry;
use crate::interpreter::{EvalContext, Evaluator};

/// Resolves an uppercased function name to an implementation.
pub trait FunctionProvider {
    fn get_function(&self, name: &str) -> Option<Arc<dyn Function>>;
}

/// The default provider: the process-global registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryProvider;

impl FunctionProvider for RegistryProvider {
    fn get_function(&self, name: &str) -> Option<Arc<dyn Function>> {
        function_registry::get(name)
    }
}

/// One function invocation: unevaluated argument ASTs plus evaluator
/// access. Arguments are pulled lazily — a function that never touches an
/// argument never records its dependencies (which is what makes
/// `IF(FALSE,A1,B1)` skip the `A1` edge).
pub struct FnCtx<'a, 'e> {
    pub args: &'a [AstNode],
    pub ev: &'a mut Evaluator<'e>,
    pub ctx: &'a mut EvalContext,
}

impl<'a, 'e> FnCtx<'a, 'e> {
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn ast(&self, index: usize) -> Option<&'a AstNode> {
        self.args.get(index)
    }

    /// Evaluate an argument. Missing arguments evaluate to `Empty`.
    pub fn eval(&mut self, index: usize) -> EvalResult {
        match self.args.get(index) {
            Some(node) => self.ev.eval_ast(node, self.ctx),
            None => EvalResult::Value(LiteralValue::Empty),
        }
    }

    /// Evaluate an argument and collapse spills to their origin value.
    pub fn value(&mut self, index: usize) -> LiteralValue {
        let result = self.eval(index);
        result.into_scalar(self.ev, self.ctx)
    }

    /// Numeric coercion; `Err` carries the error *value* to return.
    pub fn number(&mut self, index: usize) -> Result<f64, LiteralValue> {
        coerce_number(&self.value(index)).map_err(LiteralValue::Error)
    }

    /// Numeric coercion with a default for omitted / empty arguments.
    pub fn number_or(&mut self, index: usize, default: f64) -> Result<f64, LiteralValue> {
        match self.value(index) {
            LiteralValue::Empty => Ok(default),
            v => coerce_number(&v).map_err(LiteralValue::Error),
        }
    }

    pub fn text(&mut self, index: usize) -> Result<String, LiteralValue> {
        let v = self.value(index);
        match v {
            LiteralValue::Error(e) => Err(LiteralValue::Error(e)),
            v => Ok(coerce_text(&v)),
        }
    }

    pub fn logical(&mut self, index: usize) -> Result<bool, LiteralValue> {
        let v = self.value(index);
        match v {
            LiteralValue::Error(e) => Err(LiteralValue::Error(e)),
            v => Ok(v.is_truthy()),
        }
    }

    /// Every scalar an argument covers, row-major: a plain value yields
    /// itself; a spilled value yields each cell, with unbounded axes
    /// clipped to actual content. Error *values* pass through as elements;
    /// an unclippable unbounded spill is itself the error.
    pub fn flatten(&mut self, index: usize) -> Result<Vec<LiteralValue>, LiteralValue> {
        let result = self.eval(index);
        self.flatten_result(result)
    }

    pub fn flatten_result(
        &mut self,
        result: EvalResult,
    ) -> Result<Vec<LiteralValue>, LiteralValue> {
        match result {
            EvalResult::Value(v) => Ok(vec![v]),
            EvalResult::Spilled(s) => {
                let (rows, cols) = match s.iter_dims(self.ev) {
                    Some(dims) => dims,
                    None => {
                        return Err(LiteralValue::Error(
                            EngineError::new(ErrorKind::Error)
                                .with_message("cannot enumerate an unbounded result"),
                        ))
                    }
                };
                let mut out = Vec::with_capacity((rows as usize) * (cols as usize));
                for r in 0..rows {
                    for c in 0..cols {
                        out.push(s.scalar_at(self.ev, self.ctx, r, c));
                    }
                }
                Ok(out)
            }
        }
    }

    /// Materialize an argument into a rectangular grid (clipping unbounded
    /// axes to content). Plain values become 1×1 grids.
    pub fn grid(&mut self, index: usize) -> Result<Vec<Vec<LiteralValue>>, LiteralValue> {
        let result = self.eval(index);
        match result {
            EvalResult::Value(v) => Ok(vec![vec![v]]),
            EvalResult::Spilled(s) => {
                let (rows, cols) = match s.iter_dims(self.ev) {
                    Some(dims) => dims,
                    None => {
                        return Err(LiteralValue::Error(
                            EngineError::new(ErrorKind::Error)
                                .with_message("cannot enumerate an unbounded result"),
                        ))
                    }
                };
                let mut out = Vec::with_capacity(rows as usize);
                for r in 0..rows {
                    let mut row = Vec::with_capacity(cols as usize);
                    for c in 0..cols {
                        row.push(s.scalar_at(self.ev, self.ctx, r, c));
                    }
                    out.push(row);
                }
                Ok(out)
            }
        }
    }

}

/* ───────────────────── coercion helpers ───────────────────── */

/// Number ↔ boolean ↔ numeric-text coercion shared by operators and
/// builtins. Errors poison the coercion.
pub fn coerce_number(v: &LiteralValue) -> Result<f64, EngineError> {
    match v {
        LiteralValue::Error(e) => Err(e.clone()),
        LiteralValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            EngineError::new(ErrorKind::Value)
                .with_message(format!("cannot convert '{s}' to a number"))
        }),
        other => other.as_f64().ok_or_else(|| {
            EngineError::new(ErrorKind::Value).with_message("expected a number")
        }),
    }
}

pub fn coerce_text(v: &LiteralValue) -> String {
    match v {
        LiteralValue::Text(s) => s.clone(),
        LiteralValue::Empty => String::new(),
        other => other.to_string(),
    }
}
