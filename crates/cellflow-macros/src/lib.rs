//! `#[sheet_fn]` — turns a free function into a registrable `Function`
//! trait object.
//!
//! ```ignore
//! #[sheet_fn(name = "SUM", min = 1, variadic, arg_types = "any")]
//! pub fn sum_fn(inv: &mut FnCtx) -> EvalResult { ... }
//! ```
//!
//! Expansion keeps the annotated function untouched and adds a unit struct
//! named `__Fn<NAME>` (dots become underscores) whose `Function` impl
//! carries the declared metadata and forwards `eval` to the function body.
//! The generated impl names `crate::`-relative paths, so the attribute is
//! only usable from inside `cellflow-eval`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ItemFn, Lit, Meta, Token};

/// Everything the attribute can declare about a function.
struct FnSpec {
    name: Option<String>,
    min_args: usize,
    variadic: bool,
    volatile: bool,
    arg_kinds: Vec<String>,
}

impl FnSpec {
    fn from_metas(metas: Punctuated<Meta, Token![,]>) -> Self {
        let mut spec = FnSpec {
            name: None,
            min_args: 0,
            variadic: false,
            volatile: false,
            arg_kinds: Vec::new(),
        };
        for meta in &metas {
            match meta {
                Meta::Path(path) if path.is_ident("variadic") => spec.variadic = true,
                Meta::Path(path) if path.is_ident("volatile") => spec.volatile = true,
                Meta::NameValue(nv) if nv.path.is_ident("name") => {
                    spec.name = str_literal(&nv.value);
                }
                Meta::NameValue(nv) if nv.path.is_ident("min") => {
                    if let Some(n) = int_literal(&nv.value) {
                        spec.min_args = n;
                    }
                }
                Meta::NameValue(nv) if nv.path.is_ident("arg_types") => {
                    if let Some(list) = str_literal(&nv.value) {
                        spec.arg_kinds = list.split(',').map(|k| k.trim().to_string()).collect();
                    }
                }
                _ => {}
            }
        }
        spec
    }

    fn schema_entries(&self) -> Vec<TokenStream2> {
        self.arg_kinds.iter().map(|kind| arg_kind_tokens(kind)).collect()
    }
}

fn str_literal(expr: &Expr) -> Option<String> {
    if let Expr::Lit(lit) = expr {
        if let Lit::Str(s) = &lit.lit {
            return Some(s.value());
        }
    }
    None
}

fn int_literal(expr: &Expr) -> Option<usize> {
    if let Expr::Lit(lit) = expr {
        if let Lit::Int(i) = &lit.lit {
            return i.base10_parse().ok();
        }
    }
    None
}

fn arg_kind_tokens(kind: &str) -> TokenStream2 {
    let variant = match kind {
        "number" => quote! { Number },
        "text" => quote! { Text },
        "logical" => quote! { Logical },
        "range" => quote! { Range },
        _ => quote! { Any },
    };
    quote! { cellflow_common::ArgSpec::new(cellflow_common::ArgKind::#variant) }
}

#[proc_macro_attribute]
pub fn sheet_fn(attr: TokenStream, item: TokenStream) -> TokenStream {
    let metas = parse_macro_input!(attr with Punctuated::<Meta, Token![,]>::parse_terminated);
    let func = parse_macro_input!(item as ItemFn);

    let spec = FnSpec::from_metas(metas);
    let fn_ident = &func.sig.ident;
    let registry_name = spec
        .name
        .clone()
        .unwrap_or_else(|| fn_ident.to_string().to_uppercase());
    let wrapper = format_ident!("__Fn{}", registry_name.to_uppercase().replace('.', "_"));

    let min_args = spec.min_args;
    let variadic = spec.variadic;
    let volatile = spec.volatile;
    let schema = spec.schema_entries();

    let output = quote! {
        #func

        #[allow(non_camel_case_types)]
        pub struct #wrapper;

        impl crate::function::Function for #wrapper {
            fn name(&self) -> &'static str {
                #registry_name
            }
            fn volatile(&self) -> bool {
                #volatile
            }
            fn min_args(&self) -> usize {
                #min_args
            }
            fn variadic(&self) -> bool {
                #variadic
            }
            fn arg_schema(&self) -> &'static [cellflow_common::ArgSpec] {
                const SCHEMA: &[cellflow_common::ArgSpec] = &[ #(#schema),* ];
                SCHEMA
            }

            fn eval(
                &self,
                inv: &mut crate::traits::FnCtx<'_, '_>,
            ) -> crate::eval::EvalResult {
                #fn_ident(inv)
            }
        }
    };

    output.into()
}
