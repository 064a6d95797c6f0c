use crate::function::Function;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

// Case-insensitive registry keyed by uppercase name.
static REG: Lazy<DashMap<String, Arc<dyn Function>>> = Lazy::new(DashMap::new);

// Optional alias map: ALIAS -> CANONICAL_NAME, all uppercase.
static ALIASES: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

#[inline]
fn norm<S: AsRef<str>>(s: S) -> String {
    s.as_ref().to_uppercase()
}

pub fn register_function(f: Arc<dyn Function>) {
    REG.insert(norm(f.name()), f);
}

pub fn get(name: &str) -> Option<Arc<dyn Function>> {
    let key = norm(name);
    if let Some(v) = REG.get(&key) {
        return Some(Arc::clone(v.value()));
    }
    if let Some(canon) = ALIASES.get(&key) {
        if let Some(v) = REG.get(canon.value()) {
            return Some(Arc::clone(v.value()));
        }
    }
    None
}

/// Register an alias for an existing function. Names normalize to uppercase.
pub fn register_alias(alias: &str, target: &str) {
    ALIASES.insert(norm(alias), norm(target));
}

#[cfg(test)]
mod __debug_tests {
    #[test]
    fn __debug_fe_add_registered() {
        crate::builtins::ensure_loaded();
        let keys: Vec<String> = super::REG.iter().map(|e| e.key().clone()).filter(|k| k.starts_with("FE")).collect();
        panic!("keys: {:?}", keys);
    }
}
