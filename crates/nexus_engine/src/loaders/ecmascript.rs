//! ES module scanning and linking.
//!
//! Modules are parsed with oxc. TypeScript and JSX sources are first lowered
//! to plain JavaScript with `oxc_transformer` and printed by `oxc_codegen`.
//! Import and export statements are then rewritten in place to the CommonJS
//! shape the runtime understands; every rewrite keeps the number of lines, so
//! the module's source map stays valid.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, BindingPattern, BindingPatternKind, CallExpression, Declaration,
    ExportDefaultDeclarationKind, Expression, ImportDeclarationSpecifier, ImportExpression,
    JSXElement, JSXFragment, ModuleExportName, Program, Statement,
};
use oxc_ast::visit::walk;
use oxc_ast::Visit;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::{GetSpan, SourceType, Span};
use oxc_transformer::{JsxOptions, TransformOptions, Transformer, TypeScriptOptions};
use std::path::Path;

use crate::loaders::ES_MODULE_MARKER;
use crate::pipeline::{ModuleBindings, Transform, TransformInput, TransformOutput};

#[derive(Clone, Copy, Debug, Default)]
pub struct EcmaScriptLoader;

impl Transform for EcmaScriptLoader {
    fn transform(&self, input: &TransformInput<'_>) -> anyhow::Result<TransformOutput> {
        let linked = link_module(input.code, input.module.path())?;
        let map = match linked.map {
            Some(map) => map,
            None => line_map(&input.module.resource(), &String::from_utf8_lossy(input.raw)),
        };
        Ok(TransformOutput {
            code: linked.code,
            map: Some(map),
            dependencies: linked.dependencies,
            assets: Vec::new(),
            bindings: linked.esm.then_some(linked.bindings),
        })
    }
}

/// Result of [`link_module`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedModule {
    pub code: String,
    /// Static specifiers first, then `import()` and `require()` ones.
    pub dependencies: Vec<String>,
    /// Whether the source used import or export syntax.
    pub esm: bool,
    /// Map produced while lowering TypeScript or JSX. `None` when the source
    /// was already plain JavaScript and lines map one to one.
    pub map: Option<String>,
    pub bindings: ModuleBindings,
}

/// Every specifier `source` depends on, in discovery order.
pub fn scan_dependencies(source: &str, path: &Path) -> anyhow::Result<Vec<String>> {
    Ok(link_module(source, path)?.dependencies)
}

/// Rewrite ES module syntax into calls against `require`, `module` and
/// `exports`.
pub fn link_module(source: &str, path: &Path) -> anyhow::Result<LinkedModule> {
    let compiled = compile(source, path)?;
    let (source, map) = match &compiled {
        Some(compiled) => (compiled.code.as_str(), compiled.map.clone()),
        None => (source, None),
    };

    let allocator = Allocator::default();
    let program = parse(&allocator, source, path)?;

    let mut linker = Linker::default();
    for stmt in &program.body {
        linker.statement(stmt);
    }

    let mut dynamic = DynamicImports::default();
    dynamic.visit_program(&program);
    for (span, specifier) in &dynamic.imports {
        linker.edit(
            *span,
            format!("Promise.resolve().then(() => require({}))", quote(specifier)),
        );
    }
    for specifier in dynamic.specifiers {
        linker.depend(&specifier);
    }

    let esm = linker.esm;
    let dependencies = std::mem::take(&mut linker.dependencies);
    let bindings = std::mem::take(&mut linker.bindings);
    let mut code = linker.apply(source);
    if esm {
        code.insert_str(0, ES_MODULE_MARKER);
        if !code.ends_with('\n') {
            code.push('\n');
        }
        for line in &linker.trailer {
            code.push_str(line);
            code.push('\n');
        }
    }

    Ok(LinkedModule {
        code,
        dependencies,
        esm,
        map,
        bindings,
    })
}

struct Compiled {
    code: String,
    map: Option<String>,
}

/// Strip types and lower JSX. Plain JavaScript is returned as `None`.
fn compile(source: &str, path: &Path) -> anyhow::Result<Option<Compiled>> {
    let allocator = Allocator::default();
    let mut program = parse(&allocator, source, path)?;
    if !program.source_type.is_typescript() && !contains_jsx(&program) {
        return Ok(None);
    }

    let semantic = SemanticBuilder::new().build(&program).semantic;
    let (symbols, scopes) = semantic.into_symbol_table_and_scope_tree();
    let options = TransformOptions {
        // Value imports stay even when unused; they may carry side effects.
        typescript: TypeScriptOptions {
            only_remove_type_imports: true,
            ..TypeScriptOptions::default()
        },
        jsx: JsxOptions {
            jsx_plugin: true,
            ..JsxOptions::default()
        },
        ..TransformOptions::default()
    };
    let ret = Transformer::new(&allocator, path, &options).build_with_symbols_and_scopes(
        symbols,
        scopes,
        &mut program,
    );
    if !ret.errors.is_empty() {
        let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("transform errors in {}: {}", path.display(), messages.join("; "));
    }

    let ret = Codegen::new()
        .with_options(CodegenOptions {
            source_map_path: Some(path.to_path_buf()),
            ..CodegenOptions::default()
        })
        .build(&program);
    tracing::debug!("Lowered {} to JavaScript", path.display());
    Ok(Some(Compiled {
        code: ret.code,
        map: ret.map.map(|map| map.to_json_string()),
    }))
}

fn contains_jsx(program: &Program<'_>) -> bool {
    let mut finder = JsxFinder::default();
    finder.visit_program(program);
    finder.found
}

#[derive(Default)]
struct JsxFinder {
    found: bool,
}

impl<'a> Visit<'a> for JsxFinder {
    fn visit_jsx_element(&mut self, _element: &JSXElement<'a>) {
        self.found = true;
    }

    fn visit_jsx_fragment(&mut self, _fragment: &JSXFragment<'a>) {
        self.found = true;
    }
}

fn parse<'a>(allocator: &'a Allocator, source: &'a str, path: &Path) -> anyhow::Result<Program<'a>> {
    let source_type =
        SourceType::from_path(path).unwrap_or_else(|_| SourceType::default().with_module(true));
    let ret = Parser::new(allocator, source, source_type).parse();

    if ret.panicked || !ret.errors.is_empty() {
        let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("parse errors in {}: {}", path.display(), messages.join("; "));
    }
    Ok(ret.program)
}

/// A replacement of `source[start..end]`. Insertions have `start == end`.
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

#[derive(Default)]
struct Linker {
    edits: Vec<Edit>,
    dependencies: Vec<String>,
    /// Lines appended after the module body.
    trailer: Vec<String>,
    temps: usize,
    esm: bool,
    bindings: ModuleBindings,
}

impl Linker {
    fn edit(&mut self, span: Span, text: String) {
        self.edits.push(Edit {
            start: span.start as usize,
            end: span.end as usize,
            text,
        });
    }

    fn insert(&mut self, at: u32, text: String) {
        self.edit(Span::new(at, at), text);
    }

    fn depend(&mut self, specifier: &str) {
        if !self.dependencies.iter().any(|d| d == specifier) {
            self.dependencies.push(specifier.to_string());
        }
    }

    fn import(&mut self, specifier: &str, names: impl IntoIterator<Item = String>) {
        let index = match self.bindings.imports.iter().position(|(s, _)| s == specifier) {
            Some(index) => index,
            None => {
                self.bindings.imports.push((specifier.to_string(), Vec::new()));
                self.bindings.imports.len() - 1
            }
        };
        let imported = &mut self.bindings.imports[index].1;
        for name in names {
            if !imported.contains(&name) {
                imported.push(name);
            }
        }
    }

    fn export(&mut self, name: String) {
        if !self.bindings.exports.contains(&name) {
            self.bindings.exports.push(name);
        }
    }

    fn temp(&mut self, kind: &str) -> String {
        self.temps += 1;
        format!("__nexus_{kind}_{}__", self.temps)
    }

    fn statement(&mut self, stmt: &Statement<'_>) {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                self.esm = true;
                if decl.import_kind.is_type() {
                    self.edit(decl.span, String::new());
                    return;
                }
                let specifier = decl.source.value.as_str();
                self.depend(specifier);
                let required = format!("require({})", quote(specifier));

                let Some(specifiers) = &decl.specifiers else {
                    self.edit(decl.span, format!("{required};"));
                    return;
                };
                let bindings: Vec<(String, Option<String>)> = specifiers
                    .iter()
                    .filter_map(|spec| match spec {
                        ImportDeclarationSpecifier::ImportSpecifier(s) if s.import_kind.is_type() => None,
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            Some((s.local.name.to_string(), Some(s.imported.name().to_string())))
                        }
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            Some((s.local.name.to_string(), Some("default".to_string())))
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            Some((s.local.name.to_string(), None))
                        }
                    })
                    .collect();
                self.import(specifier, bindings.iter().filter_map(|(_, imported)| imported.clone()));

                let text = match bindings.as_slice() {
                    [] if specifiers.is_empty() => format!("{required};"),
                    [] => String::new(),
                    [(local, imported)] => format!("const {local} = {required}{};", access(imported)),
                    _ => {
                        let temp = self.temp("import");
                        let mut text = format!("const {temp} = {required};");
                        for (local, imported) in &bindings {
                            text.push_str(&format!(" const {local} = {temp}{};", access(imported)));
                        }
                        text
                    }
                };
                self.edit(decl.span, text);
            }

            Statement::ExportNamedDeclaration(decl) => {
                self.esm = true;
                if decl.export_kind.is_type() {
                    self.edit(decl.span, String::new());
                    return;
                }

                if let Some(declaration) = &decl.declaration {
                    let names = match declaration {
                        Declaration::TSTypeAliasDeclaration(_) | Declaration::TSInterfaceDeclaration(_) => {
                            self.edit(decl.span, String::new());
                            return;
                        }
                        Declaration::VariableDeclaration(var) => {
                            let mut names = Vec::new();
                            for declarator in &var.declarations {
                                binding_names(&declarator.id, &mut names);
                            }
                            names
                        }
                        Declaration::FunctionDeclaration(func) => {
                            func.id.iter().map(|id| id.name.to_string()).collect()
                        }
                        Declaration::ClassDeclaration(class) => {
                            class.id.iter().map(|id| id.name.to_string()).collect()
                        }
                        _ => Vec::new(),
                    };
                    self.edit(Span::new(decl.span.start, declaration.span().start), String::new());
                    for name in &names {
                        self.export(name.clone());
                    }
                    let assignments: String = names
                        .iter()
                        .map(|name| format!(" exports{} = {name};", member(name)))
                        .collect();
                    if !assignments.is_empty() {
                        self.insert(decl.span.end, assignments);
                    }
                    return;
                }

                let specifiers: Vec<(String, String)> = decl
                    .specifiers
                    .iter()
                    .filter(|s| !s.export_kind.is_type())
                    .map(|s| (export_name(&s.local), export_name(&s.exported)))
                    .collect();
                for (_, exported) in &specifiers {
                    self.export(exported.clone());
                }

                match &decl.source {
                    Some(from) => {
                        let specifier = from.value.as_str();
                        self.depend(specifier);
                        self.import(specifier, specifiers.iter().map(|(local, _)| local.clone()));
                        let required = format!("require({})", quote(specifier));
                        let text = if specifiers.is_empty() {
                            format!("{required};")
                        } else {
                            let temp = self.temp("reexport");
                            let mut text = format!("const {temp} = {required};");
                            for (local, exported) in &specifiers {
                                text.push_str(&format!(
                                    " exports{} = {temp}{};",
                                    member(exported),
                                    member(local)
                                ));
                            }
                            text
                        };
                        self.edit(decl.span, text);
                    }
                    None => {
                        // Deferred to the end so later `let` bindings are initialized.
                        for (local, exported) in specifiers {
                            self.trailer.push(format!("exports{} = {local};", member(&exported)));
                        }
                        self.edit(decl.span, String::new());
                    }
                }
            }

            Statement::ExportDefaultDeclaration(decl) => {
                self.esm = true;
                let named = match &decl.declaration {
                    ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                        self.edit(decl.span, String::new());
                        return;
                    }
                    ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                        func.id.as_ref().map(|id| id.name.to_string())
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                        class.id.as_ref().map(|id| id.name.to_string())
                    }
                    _ => None,
                };
                self.export("default".to_string());
                let prefix = Span::new(decl.span.start, decl.declaration.span().start);
                match named {
                    Some(name) => {
                        self.edit(prefix, String::new());
                        self.insert(decl.span.end, format!(" exports.default = {name};"));
                    }
                    None => self.edit(prefix, "exports.default = ".to_string()),
                }
            }

            Statement::ExportAllDeclaration(decl) => {
                self.esm = true;
                if decl.export_kind.is_type() {
                    self.edit(decl.span, String::new());
                    return;
                }
                let specifier = decl.source.value.as_str();
                self.depend(specifier);
                let required = format!("require({})", quote(specifier));
                match &decl.exported {
                    Some(name) => self.export(export_name(name)),
                    None => self.bindings.open_exports = true,
                }
                let text = match &decl.exported {
                    Some(name) => format!("exports{} = {required};", member(&export_name(name))),
                    None => format!(
                        "(function (source) {{ for (const key in source) if (key !== \"default\" && !(key in exports)) exports[key] = source[key]; }})({required});"
                    ),
                };
                self.edit(decl.span, text);
            }

            _ => {}
        }
    }

    fn apply(&mut self, source: &str) -> String {
        let mut edits = std::mem::take(&mut self.edits);
        edits.sort_by_key(|e| (e.start, e.end));

        let mut out = String::with_capacity(source.len() + 64);
        let mut cursor = 0;
        for edit in edits {
            if edit.start < cursor {
                continue;
            }
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.text);
            let removed = source[edit.start..edit.end].matches('\n').count();
            let kept = edit.text.matches('\n').count();
            for _ in kept..removed {
                out.push('\n');
            }
            cursor = edit.end;
        }
        out.push_str(&source[cursor..]);
        out
    }
}

/// `import("…")` and `require("…")` calls with a literal specifier.
#[derive(Default)]
struct DynamicImports {
    imports: Vec<(Span, String)>,
    specifiers: Vec<String>,
}

impl<'a> Visit<'a> for DynamicImports {
    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        if let Expression::StringLiteral(lit) = &expr.source {
            self.imports.push((expr.span, lit.value.to_string()));
            self.specifiers.push(lit.value.to_string());
        }
        walk::walk_import_expression(self, expr);
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &call.callee {
            if callee.name.as_str() == "require" && call.arguments.len() == 1 {
                if let Some(Argument::StringLiteral(lit)) = call.arguments.first() {
                    self.specifiers.push(lit.value.to_string());
                }
            }
        }
        walk::walk_call_expression(self, call);
    }
}

fn binding_names(pattern: &BindingPattern<'_>, names: &mut Vec<String>) {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(ident) => names.push(ident.name.to_string()),
        BindingPatternKind::ObjectPattern(object) => {
            for property in &object.properties {
                binding_names(&property.value, names);
            }
            if let Some(rest) = &object.rest {
                binding_names(&rest.argument, names);
            }
        }
        BindingPatternKind::ArrayPattern(array) => {
            for element in array.elements.iter().flatten() {
                binding_names(element, names);
            }
            if let Some(rest) = &array.rest {
                binding_names(&rest.argument, names);
            }
        }
        BindingPatternKind::AssignmentPattern(assign) => binding_names(&assign.left, names),
    }
}

fn export_name(name: &ModuleExportName<'_>) -> String {
    name.name().to_string()
}

fn quote(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

/// `.name`, or `["name"]` when it is not a plain identifier.
fn member(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if plain {
        format!(".{name}")
    } else {
        format!("[{}]", quote(name))
    }
}

fn access(imported: &Option<String>) -> String {
    imported.as_deref().map(member).unwrap_or_default()
}

/// Source map pairing every generated line with the same original line.
fn line_map(source_name: &str, original: &str) -> String {
    let lines = original.lines().count().max(1);
    let mut mappings = String::from("AAAA");
    for _ in 1..lines {
        mappings.push_str(";AACA");
    }
    serde_json::json!({
        "version": 3,
        "sources": [source_name],
        "sourcesContent": [original],
        "names": [],
        "mappings": mappings,
    })
    .to_string()
}
