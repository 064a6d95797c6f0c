//! Named expressions, scoped global / workbook / sheet.
//!
//! Storage is case-sensitive (the original spelling is kept for display);
//! matching is case-insensitive. Resolution from a referencing cell walks
//! sheet scope → workbook scope → global scope.

use std::rc::Rc;

use cellflow_parse::parser::{is_valid_name, parse_formula_body, AstNode};
use rustc_hash::FxHashMap;

use super::EngineApiError;

/// Where a named expression lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NameScope {
    Global,
    /// Keyed by canonical workbook name.
    Workbook(String),
    /// Keyed by canonical (workbook, sheet) names.
    Sheet(String, String),
}

#[derive(Debug, Clone)]
pub struct NamedExpression {
    pub name: String,
    pub expression: String,
    /// Parsed lazily; the leading `=` is optional in stored expressions.
    pub ast: Option<Rc<AstNode>>,
}

impl NamedExpression {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        NamedExpression {
            name: name.into(),
            expression: expression.into(),
            ast: None,
        }
    }

    pub fn ensure_ast(&mut self) -> Rc<AstNode> {
        if let Some(ast) = &self.ast {
            return Rc::clone(ast);
        }
        let body = self.expression.strip_prefix('=').unwrap_or(&self.expression);
        let ast = Rc::new(parse_formula_body(body));
        self.ast = Some(Rc::clone(&ast));
        ast
    }
}

fn fold(s: &str) -> String {
    s.to_uppercase()
}

/// Three-level map: global, per-workbook, per-(workbook, sheet).
#[derive(Debug, Default)]
pub struct NamedExpressionStore {
    global: FxHashMap<String, NamedExpression>,
    workbook: FxHashMap<String, FxHashMap<String, NamedExpression>>,
    sheet: FxHashMap<(String, String), FxHashMap<String, NamedExpression>>,
}

impl NamedExpressionStore {
    fn scope_map_mut(&mut self, scope: &NameScope) -> &mut FxHashMap<String, NamedExpression> {
        match scope {
            NameScope::Global => &mut self.global,
            NameScope::Workbook(wb) => self.workbook.entry(fold(wb)).or_default(),
            NameScope::Sheet(wb, sheet) => {
                self.sheet.entry((fold(wb), fold(sheet))).or_default()
            }
        }
    }

    fn scope_map(&self, scope: &NameScope) -> Option<&FxHashMap<String, NamedExpression>> {
        match scope {
            NameScope::Global => Some(&self.global),
            NameScope::Workbook(wb) => self.workbook.get(&fold(wb)),
            NameScope::Sheet(wb, sheet) => self.sheet.get(&(fold(wb), fold(sheet))),
        }
    }

    /// Insert or replace a name within a scope.
    pub fn upsert(
        &mut self,
        scope: NameScope,
        name: &str,
        expression: &str,
    ) -> Result<(), EngineApiError> {
        if !is_valid_name(name) {
            return Err(EngineApiError::InvalidName(name.to_string()));
        }
        self.scope_map_mut(&scope)
            .insert(fold(name), NamedExpression::new(name, expression));
        Ok(())
    }

    pub fn remove(&mut self, scope: &NameScope, name: &str) -> Result<(), EngineApiError> {
        let removed = match scope {
            NameScope::Global => self.global.remove(&fold(name)),
            NameScope::Workbook(wb) => self
                .workbook
                .get_mut(&fold(wb))
                .and_then(|m| m.remove(&fold(name))),
            NameScope::Sheet(wb, sheet) => self
                .sheet
                .get_mut(&(fold(wb), fold(sheet)))
                .and_then(|m| m.remove(&fold(name))),
        };
        removed
            .map(|_| ())
            .ok_or_else(|| EngineApiError::UnknownName(name.to_string()))
    }

    pub fn rename(
        &mut self,
        scope: &NameScope,
        old: &str,
        new: &str,
    ) -> Result<(), EngineApiError> {
        if !is_valid_name(new) {
            return Err(EngineApiError::InvalidName(new.to_string()));
        }
        let map = match scope {
            NameScope::Global => Some(&mut self.global),
            NameScope::Workbook(wb) => self.workbook.get_mut(&fold(wb)),
            NameScope::Sheet(wb, sheet) => self.sheet.get_mut(&(fold(wb), fold(sheet))),
        }
        .ok_or_else(|| EngineApiError::UnknownName(old.to_string()))?;

        let mut entry = map
            .remove(&fold(old))
            .ok_or_else(|| EngineApiError::UnknownName(old.to_string()))?;
        entry.name = new.to_string();
        map.insert(fold(new), entry);
        Ok(())
    }

    pub fn get(&self, scope: &NameScope, name: &str) -> Option<&NamedExpression> {
        self.scope_map(scope)?.get(&fold(name))
    }

    pub fn get_mut(&mut self, scope: &NameScope, name: &str) -> Option<&mut NamedExpression> {
        match scope {
            NameScope::Global => self.global.get_mut(&fold(name)),
            NameScope::Workbook(wb) => self
                .workbook
                .get_mut(&fold(wb))
                .and_then(|m| m.get_mut(&fold(name))),
            NameScope::Sheet(wb, sheet) => self
                .sheet
                .get_mut(&(fold(wb), fold(sheet)))
                .and_then(|m| m.get_mut(&fold(name))),
        }
    }

    /// The fallback search from a cell's location: sheet scope, then
    /// workbook scope, then global (invariant: deterministic given fixed
    /// state).
    pub fn resolve_from(
        &self,
        workbook: &str,
        sheet: &str,
        name: &str,
    ) -> Option<(NameScope, &NamedExpression)> {
        let sheet_scope = NameScope::Sheet(workbook.to_string(), sheet.to_string());
        if let Some(expr) = self.get(&sheet_scope, name) {
            return Some((sheet_scope, expr));
        }
        let wb_scope = NameScope::Workbook(workbook.to_string());
        if let Some(expr) = self.get(&wb_scope, name) {
            return Some((wb_scope, expr));
        }
        self.get(&NameScope::Global, name)
            .map(|expr| (NameScope::Global, expr))
    }

    /// Rekey scopes after a sheet rename.
    pub fn rename_sheet_scope(&mut self, workbook: &str, old: &str, new: &str) {
        if let Some(map) = self.sheet.remove(&(fold(workbook), fold(old))) {
            self.sheet.insert((fold(workbook), fold(new)), map);
        }
    }

    /// Drop sheet-scoped names on sheet removal.
    pub fn remove_sheet_scope(&mut self, workbook: &str, sheet: &str) {
        self.sheet.remove(&(fold(workbook), fold(sheet)));
    }

    /// Rekey scopes after a workbook rename.
    pub fn rename_workbook_scope(&mut self, old: &str, new: &str) {
        if let Some(map) = self.workbook.remove(&fold(old)) {
            self.workbook.insert(fold(new), map);
        }
        let keys: Vec<_> = self
            .sheet
            .keys()
            .filter(|(wb, _)| *wb == fold(old))
            .cloned()
            .collect();
        for (wb, sheet) in keys {
            if let Some(map) = self.sheet.remove(&(wb, sheet.clone())) {
                self.sheet.insert((fold(new), sheet), map);
            }
        }
    }

    /// Drop workbook- and sheet-scoped names on workbook removal.
    pub fn remove_workbook_scope(&mut self, workbook: &str) {
        self.workbook.remove(&fold(workbook));
        self.sheet.retain(|(wb, _), _| *wb != fold(workbook));
    }

    /// All entries, for snapshotting.
    pub fn iter_all(&self) -> impl Iterator<Item = (NameScope, &NamedExpression)> {
        let global = self
            .global
            .values()
            .map(|n| (NameScope::Global, n));
        let workbook = self.workbook.iter().flat_map(|(wb, m)| {
            m.values()
                .map(move |n| (NameScope::Workbook(wb.clone()), n))
        });
        let sheet = self.sheet.iter().flat_map(|((wb, s), m)| {
            m.values()
                .map(move |n| (NameScope::Sheet(wb.clone(), s.clone()), n))
        });
        global.chain(workbook).chain(sheet)
    }
}
