//! `FE.*` operator functions.
//!
//! Formula operators and these registry entries share one scalar core: the
//! interpreter routes `=1+2` through the same broadcasting path
//! `=FE.ADD(1,2)` takes.

use std::sync::Arc;

use crate::eval::EvalResult;
use crate::function_registry::register_function;
use crate::traits::FnCtx;
use cellflow_macros::sheet_fn;

macro_rules! binary_op_fn {
    ($fn_name:ident, $reg_name:literal, $op:literal) => {
        #[sheet_fn(name = $reg_name, min = 2)]
        pub fn $fn_name(inv: &mut FnCtx) -> EvalResult {
            let left = inv.eval(0);
            let right = inv.eval(1);
            inv.ev.evaluate_scalar_operator($op, left, right)
        }
    };
}

macro_rules! unary_op_fn {
    ($fn_name:ident, $reg_name:literal, $op:literal) => {
        #[sheet_fn(name = $reg_name, min = 1)]
        pub fn $fn_name(inv: &mut FnCtx) -> EvalResult {
            let operand = inv.eval(0);
            inv.ev.evaluate_scalar_unary($op, operand)
        }
    };
}

binary_op_fn!(fe_add, "FE.ADD", "+");
binary_op_fn!(fe_minus, "FE.MINUS", "-");
binary_op_fn!(fe_multiply, "FE.MULTIPLY", "*");
binary_op_fn!(fe_divide, "FE.DIVIDE", "/");
binary_op_fn!(fe_pow, "FE.POW", "^");
binary_op_fn!(fe_eq, "FE.EQ", "=");
binary_op_fn!(fe_ne, "FE.NE", "<>");
binary_op_fn!(fe_lt, "FE.LT", "<");
binary_op_fn!(fe_lte, "FE.LTE", "<=");
binary_op_fn!(fe_gt, "FE.GT", ">");
binary_op_fn!(fe_gte, "FE.GTE", ">=");

unary_op_fn!(fe_uminus, "FE.UMINUS", "-");
unary_op_fn!(fe_uplus, "FE.UPLUS", "+");
unary_op_fn!(fe_unary_percent, "FE.UNARY_PERCENT", "%");

pub fn register_builtins() {
    register_function(Arc::new(__FnFE_ADD));
    register_function(Arc::new(__FnFE_MINUS));
    register_function(Arc::new(__FnFE_MULTIPLY));
    register_function(Arc::new(__FnFE_DIVIDE));
    register_function(Arc::new(__FnFE_POW));
    register_function(Arc::new(__FnFE_EQ));
    register_function(Arc::new(__FnFE_NE));
    register_function(Arc::new(__FnFE_LT));
    register_function(Arc::new(__FnFE_LTE));
    register_function(Arc::new(__FnFE_GT));
    register_function(Arc::new(__FnFE_GTE));
    register_function(Arc::new(__FnFE_UMINUS));
    register_function(Arc::new(__FnFE_UPLUS));
    register_function(Arc::new(__FnFE_UNARY_PERCENT));
}
