//! The core `Function` trait and its capability flags.

use crate::eval::EvalResult;
use crate::traits::FnCtx;
use cellflow_common::ArgSpec;

bitflags::bitflags! {
    /// Describes the capabilities and properties of a function.
    ///
    /// The engine consults these when deciding how to route arguments
    /// (element-wise broadcast vs. collapse) and whether results may be
    /// cached across evaluations.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct FnCaps: u8 {
        /// Same inputs, same outputs, no side effects. The default.
        const PURE        = 0b0000_0001;
        /// The function reduces ranges to a single value (`SUM`, `COUNT`).
        const REDUCTION   = 0b0000_0010;
        /// The function maps element-wise over spilled arguments (`FE.ADD`).
        const ELEMENTWISE = 0b0000_0100;
        /// The function inspects errors instead of propagating them
        /// (`IFERROR`, `ISERROR`).
        const ERROR_AWARE = 0b0000_1000;
        /// The function produces a spilled result (`SEQUENCE`, `FILTER`).
        const ARRAY       = 0b0001_0000;
    }
}

/// An engine-callable function. Object-safe; every builtin is a value in the
/// registry, never a subclass of anything.
pub trait Function: Send + Sync + 'static {
    /* metadata getters */
    fn name(&self) -> &'static str;
    fn caps(&self) -> FnCaps {
        FnCaps::PURE
    }
    fn volatile(&self) -> bool {
        false
    }
    fn min_args(&self) -> usize {
        0
    }
    fn variadic(&self) -> bool {
        false
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &[]
    }

    /* core work */
    ///
    /// Arguments arrive unevaluated; the function decides what to touch and
    /// how to treat spilled inputs. Formula errors are returned as values,
    /// never as host panics.
    fn eval(&self, inv: &mut FnCtx<'_, '_>) -> EvalResult;
}
