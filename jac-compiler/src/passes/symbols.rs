//! Symbol table construction and def/impl matching.
//!
//! After annex attachment, every declaration-only ability or function must
//! have exactly one matching `impl` body somewhere in the base module or its
//! impl annexes. The matched bodies are spliced into the declarations, so
//! downstream passes see a module equivalent to the same content written
//! inline.

use std::collections::BTreeMap;

use jac_core::diag::{Diagnostic, DiagnosticKind};
use jac_core::loc::SourceSpan;

use crate::ast::{
    ArchetypeKind, ImplMember, ImplPayload, Item, Module, Stmt,
};
use crate::passes::{Pass, PassContext};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Archetype(ArchetypeKind),
    Function,
    ClientPage,
    Ability { owner: String },
    Field { owner: String },
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub has_body: bool,
    /// Dotted module this symbol was imported from, if any.
    pub imported_from: Option<String>,
    pub span: SourceSpan,
}

/// Flat table keyed by name; member symbols use `Owner.member` keys.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: BTreeMap<String, Symbol>,
}

impl SymbolTable {
    pub fn insert(&mut self, symbol: Symbol) {
        self.symbols.insert(symbol.name.clone(), symbol);
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Names visible at module scope (no member symbols).
    pub fn module_level_names(&self) -> impl Iterator<Item = &str> {
        self.symbols
            .iter()
            .filter(|(name, _)| !name.contains('.'))
            .map(|(name, _)| name.as_str())
    }
}

pub struct SymbolPass;

impl Pass for SymbolPass {
    fn name(&self) -> &'static str {
        "symbols"
    }

    fn run(&self, mut module: Module, ctx: &mut PassContext<'_>) -> Module {
        let impls = collect_impls(&module);
        splice_bodies(&mut module, &impls, ctx);
        ctx.symbols = build_table(&module);
        module
    }
}

struct ImplProvider {
    body: Vec<Stmt>,
    span: SourceSpan,
}

/// Gather `impl` bodies from the base module and its impl annexes, keyed by
/// `Target.member` (or bare `target` for top-level function impls).
fn collect_impls(module: &Module) -> BTreeMap<String, Vec<ImplProvider>> {
    let mut providers: BTreeMap<String, Vec<ImplProvider>> = BTreeMap::new();
    let sources = std::iter::once(module).chain(module.impl_mods.iter());
    for source in sources {
        for item in &source.items {
            let Item::Impl(block) = item else {
                continue;
            };
            match (&block.member, &block.payload) {
                (Some(member), ImplPayload::Body(body)) => {
                    providers
                        .entry(format!("{}.{member}", block.target))
                        .or_default()
                        .push(ImplProvider {
                            body: body.clone(),
                            span: block.span.clone(),
                        });
                }
                (None, ImplPayload::Body(body)) => {
                    providers
                        .entry(block.target.clone())
                        .or_default()
                        .push(ImplProvider {
                            body: body.clone(),
                            span: block.span.clone(),
                        });
                }
                (None, ImplPayload::Members(members)) => {
                    for member in members {
                        let (name, body) = match member {
                            ImplMember::Ability(a) => (&a.name, a.body.clone()),
                            ImplMember::Function(f) => (&f.name, f.body.clone()),
                        };
                        if let Some(body) = body {
                            providers
                                .entry(format!("{}.{name}", block.target))
                                .or_default()
                                .push(ImplProvider {
                                    body,
                                    span: block.span.clone(),
                                });
                        }
                    }
                }
                (Some(_), ImplPayload::Members(_)) => {}
            }
        }
    }
    providers
}

/// Attach impl bodies to declaration-only members; report unresolved and
/// duplicate impls.
fn splice_bodies(
    module: &mut Module,
    providers: &BTreeMap<String, Vec<ImplProvider>>,
    ctx: &mut PassContext<'_>,
) {
    let mut diags = Vec::new();

    for item in &mut module.items {
        match item {
            Item::Archetype(arch) => {
                for ability in &mut arch.abilities {
                    if ability.body.is_some() {
                        continue;
                    }
                    let key = format!("{}.{}", arch.name, ability.name);
                    match providers.get(&key).map(Vec::as_slice) {
                        Some([single]) => ability.body = Some(single.body.clone()),
                        Some([_, second, ..]) => {
                            diags.push(Diagnostic::error(
                                DiagnosticKind::DuplicateImpl,
                                format!("multiple impls for '{key}'"),
                                Some(second.span.clone()),
                            ));
                        }
                        _ => {
                            diags.push(Diagnostic::error(
                                DiagnosticKind::UnresolvedImpl,
                                format!("no impl found for declared ability '{key}'"),
                                Some(ability.span.clone()),
                            ));
                        }
                    }
                }
            }
            Item::Function(func) => {
                if func.body.is_some() {
                    continue;
                }
                match providers.get(&func.name).map(Vec::as_slice) {
                    Some([single]) => func.body = Some(single.body.clone()),
                    Some([_, second, ..]) => {
                        diags.push(Diagnostic::error(
                            DiagnosticKind::DuplicateImpl,
                            format!("multiple impls for '{}'", func.name),
                            Some(second.span.clone()),
                        ));
                    }
                    _ => {
                        diags.push(Diagnostic::error(
                            DiagnosticKind::UnresolvedImpl,
                            format!("no impl found for declared function '{}'", func.name),
                            Some(func.span.clone()),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    ctx.program.diagnostics.extend(diags);
}

/// The externally observable symbol table: module-level declarations plus
/// `Owner.member` entries, identical whether members arrived inline or via
/// annexes.
fn build_table(module: &Module) -> SymbolTable {
    let mut table = SymbolTable::default();

    for item in &module.items {
        match item {
            Item::Archetype(arch) => {
                table.insert(Symbol {
                    name: arch.name.clone(),
                    kind: SymbolKind::Archetype(arch.kind),
                    has_body: true,
                    imported_from: None,
                    span: arch.span.clone(),
                });
                for field in &arch.fields {
                    table.insert(Symbol {
                        name: format!("{}.{}", arch.name, field.name),
                        kind: SymbolKind::Field {
                            owner: arch.name.clone(),
                        },
                        has_body: true,
                        imported_from: None,
                        span: field.span.clone(),
                    });
                }
                for ability in &arch.abilities {
                    table.insert(Symbol {
                        name: format!("{}.{}", arch.name, ability.name),
                        kind: SymbolKind::Ability {
                            owner: arch.name.clone(),
                        },
                        has_body: ability.body.is_some(),
                        imported_from: None,
                        span: ability.span.clone(),
                    });
                }
            }
            Item::Function(func) => {
                table.insert(Symbol {
                    name: func.name.clone(),
                    kind: SymbolKind::Function,
                    has_body: func.body.is_some(),
                    imported_from: None,
                    span: func.span.clone(),
                });
            }
            Item::ClientPage(page) => {
                table.insert(Symbol {
                    name: page.name.clone(),
                    kind: SymbolKind::ClientPage,
                    has_body: true,
                    imported_from: None,
                    span: page.span.clone(),
                });
            }
            Item::Import(import) => {
                for name in &import.names {
                    table.insert(Symbol {
                        name: name.clone(),
                        kind: SymbolKind::Function,
                        has_body: false,
                        imported_from: Some(import.module.clone()),
                        span: import.span.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    // Client pages declared in .cl annexes surface on the base module.
    for annex in &module.impl_mods {
        for item in &annex.items {
            if let Item::ClientPage(page) = item {
                table.insert(Symbol {
                    name: page.name.clone(),
                    kind: SymbolKind::ClientPage,
                    has_body: true,
                    imported_from: None,
                    span: page.span.clone(),
                });
            }
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use std::path::Path;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn impl_body_is_spliced_into_declaration() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(
            &base,
            "walker W { can go with `root entry; }\nimpl W.go { report 1; }",
        );

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        assert!(!program.diagnostics.has_errors());
        let arch = compiled.ast.archetypes().next().unwrap();
        assert!(arch.abilities[0].body.is_some());
    }

    #[test]
    fn missing_impl_is_unresolved() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "walker W { can go with `root entry; }");

        let mut program = Program::new(tmp.path());
        program.compile(&base, false, false);
        assert!(program
            .diagnostics
            .errors()
            .any(|d| d.kind == DiagnosticKind::UnresolvedImpl));
    }

    #[test]
    fn duplicate_impl_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(
            &base,
            "walker W { can go with `root entry; }\nimpl W.go { report 1; }\nimpl W.go { report 2; }",
        );

        let mut program = Program::new(tmp.path());
        program.compile(&base, false, false);
        assert!(program
            .diagnostics
            .errors()
            .any(|d| d.kind == DiagnosticKind::DuplicateImpl));
    }

    #[test]
    fn annexed_and_inline_tables_are_equivalent() {
        // Compiling with annexes attached must yield the same symbol table
        // as the same content written in one source file.
        let tmp = tempfile::tempdir().unwrap();
        let split = tmp.path().join("split").join("app.jac");
        write(&split, "walker W { has n: int = 0; can go with `root entry; }");
        write(
            &tmp.path().join("split").join("app.impl.jac"),
            "impl W.go { report self.n; }",
        );
        let inline = tmp.path().join("inline").join("app.jac");
        write(
            &inline,
            "walker W { has n: int = 0; can go with `root entry { report self.n; } }",
        );

        let mut program_split = Program::new(&tmp.path().join("split"));
        let split_mod = program_split.compile(&split, false, false).unwrap();
        let mut program_inline = Program::new(&tmp.path().join("inline"));
        let inline_mod = program_inline.compile(&inline, false, false).unwrap();

        let names_split: Vec<(String, bool)> = split_mod
            .symbols
            .iter()
            .map(|s| (s.name.clone(), s.has_body))
            .collect();
        let names_inline: Vec<(String, bool)> = inline_mod
            .symbols
            .iter()
            .map(|s| (s.name.clone(), s.has_body))
            .collect();
        assert_eq!(names_split, names_inline);
    }

    #[test]
    fn function_impl_by_bare_name() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "def greet(name: str);\nimpl greet { return name; }");

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        assert!(!program.diagnostics.has_errors());
        assert!(compiled.ast.functions().next().unwrap().body.is_some());
    }

    #[test]
    fn table_includes_imported_names() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("util.jac"), "def helper() { return 1; }");
        let base = tmp.path().join("app.jac");
        write(&base, "import from util { helper }");

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        let sym = compiled.symbols.get("helper").unwrap();
        assert_eq!(sym.imported_from.as_deref(), Some("util"));
    }
}
