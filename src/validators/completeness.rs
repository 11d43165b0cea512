//! AST completeness analysis (anti-stub detection).
//!
//! Parses the implementation's source files and runs five detectors that
//! catch code which type-checks but does nothing:
//!
//! | Detector | Severity |
//! |---|---|
//! | Dead CLI flag (registered, never read) | ERROR |
//! | Empty `if`/`else` branch | WARNING |
//! | Stub function (`todo!()`/`unimplemented!()` body) | ERROR |
//! | Trivial test assertion (tautologies only) | WARNING |
//! | Unused import | WARNING |
//!
//! Files over the configured size are summarized (imports + item
//! signatures) instead of analyzed in full. The aggregate verdict is
//! BLOCK if any ERROR, WARN if only warnings, PASS if clean; BLOCK is
//! what routes the testing workflow back to the implementer.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use syn::spanned::Spanned;
use syn::visit::Visit;

use super::Severity;

/// 1-based line of a span. Real locations require proc-macro2's
/// `span-locations` feature (enabled in Cargo.toml); without it every
/// span reports line 0 and the findings would be useless.
fn span_line(span: proc_macro2::Span) -> usize {
    span.start().line
}

/// 1-based line of a span's end.
fn span_end_line(span: proc_macro2::Span) -> usize {
    span.end().line
}

/// Aggregate verdict over all analyzed files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletenessVerdict {
    Pass,
    Warn,
    Block,
}

impl std::fmt::Display for CompletenessVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Block => "BLOCK",
        };
        f.write_str(s)
    }
}

/// Which detector raised an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    DeadCliFlag,
    EmptyBranch,
    StubFunction,
    TrivialAssertion,
    UnusedImport,
}

/// One finding from one detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletenessIssue {
    pub category: IssueCategory,
    pub file: String,
    pub line: usize,
    pub description: String,
    pub severity: Severity,
}

/// Result of analyzing a set of files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletenessResult {
    pub verdict: CompletenessVerdict,
    pub issues: Vec<CompletenessIssue>,
    pub analysis_ms: f64,
    /// Files that exceeded the size cap and were summarized instead.
    pub summarized_files: Vec<String>,
    /// Files that failed to parse (reported, not fatal).
    pub unparsed_files: Vec<String>,
}

/// Analyzes `(path, source)` pairs. `max_file_bytes` is the size cap past
/// which a file is summarized rather than fully analyzed.
#[must_use]
pub fn analyze_files(files: &[(String, String)], max_file_bytes: usize) -> CompletenessResult {
    let started = Instant::now();
    let mut issues = Vec::new();
    let mut summarized = Vec::new();
    let mut unparsed = Vec::new();

    for (path, source) in files {
        if source.len() > max_file_bytes {
            summarized.push(path.clone());
            continue;
        }
        match analyze_source(path, source) {
            Ok(mut file_issues) => issues.append(&mut file_issues),
            Err(e) => {
                tracing::warn!(file = %path, error = %e, "source failed to parse; skipping analysis");
                unparsed.push(path.clone());
            }
        }
    }

    let verdict = if issues.iter().any(|i| i.severity == Severity::Error) {
        CompletenessVerdict::Block
    } else if !issues.is_empty() {
        CompletenessVerdict::Warn
    } else {
        CompletenessVerdict::Pass
    };

    CompletenessResult {
        verdict,
        issues,
        analysis_ms: started.elapsed().as_secs_f64() * 1000.0,
        summarized_files: summarized,
        unparsed_files: unparsed,
    }
}

/// Runs all five detectors over one source file.
pub fn analyze_source(path: &str, source: &str) -> Result<Vec<CompletenessIssue>, syn::Error> {
    let file = syn::parse_file(source)?;
    let mut issues = Vec::new();

    let mut detector = Detector::default();
    detector.visit_file(&file);

    // Dead CLI flags: registered via the builder, never read back.
    for (flag, line) in &detector.registered_flags {
        let normalized = flag.replace('-', "_");
        if !detector.read_flags.contains(flag) && !detector.read_flags.contains(&normalized) {
            issues.push(CompletenessIssue {
                category: IssueCategory::DeadCliFlag,
                file: path.to_string(),
                line: *line,
                description: format!("CLI flag \"{flag}\" is registered but never read"),
                severity: Severity::Error,
            });
        }
    }

    for line in &detector.empty_branches {
        issues.push(CompletenessIssue {
            category: IssueCategory::EmptyBranch,
            file: path.to_string(),
            line: *line,
            description: "conditional branch has an empty body".to_string(),
            severity: Severity::Warning,
        });
    }

    // Function-level detectors.
    for function in collect_functions(&file) {
        let line = function.line;
        if function.is_test {
            if let Some(reason) = trivial_assertions_only(function.block) {
                issues.push(CompletenessIssue {
                    category: IssueCategory::TrivialAssertion,
                    file: path.to_string(),
                    line,
                    description: format!(
                        "test `{}` only asserts tautologies ({reason})",
                        function.name
                    ),
                    severity: Severity::Warning,
                });
            }
        } else if is_stub_body(function.block) {
            issues.push(CompletenessIssue {
                category: IssueCategory::StubFunction,
                file: path.to_string(),
                line,
                description: format!("function `{}` is a stub", function.name),
                severity: Severity::Error,
            });
        }
    }

    issues.extend(unused_imports(path, source, &file));

    issues.sort_by_key(|i| i.line);
    Ok(issues)
}

/// Summarizes a source file down to imports and item signatures; the
/// budgeted excerpt used both by the size-capped analysis path and by
/// codebase analysis.
#[must_use]
pub fn summarize_source(source: &str) -> String {
    let Ok(file) = syn::parse_file(source) else {
        // Unparseable input falls back to a head excerpt at a line boundary.
        return source.lines().take(40).collect::<Vec<_>>().join("\n");
    };
    let lines: Vec<&str> = source.lines().collect();
    let mut out = Vec::new();
    for item in &file.items {
        let line = span_line(item.span());
        if line == 0 || line > lines.len() {
            continue;
        }
        let text = lines[line - 1].trim_end();
        let signature = text
            .split_once('{')
            .map(|(head, _)| head.trim_end())
            .unwrap_or(text);
        if !signature.trim().is_empty() {
            out.push(format!("{line:>5}: {signature}"));
        }
    }
    out.join("\n")
}

// ---------------------------------------------------------------------------
// Detector internals
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Detector {
    registered_flags: BTreeMap<String, usize>,
    read_flags: BTreeSet<String>,
    empty_branches: Vec<usize>,
}

/// Methods that read a flag back from parsed matches.
const FLAG_READ_METHODS: &[&str] = &[
    "get_one",
    "get_flag",
    "get_many",
    "get_count",
    "get_occurrences",
    "remove_one",
    "remove_many",
    "contains_id",
    "value_of",
    "values_of",
    "is_present",
];

fn first_str_arg(args: &syn::punctuated::Punctuated<syn::Expr, syn::token::Comma>) -> Option<String> {
    match args.first() {
        Some(syn::Expr::Lit(lit)) => match &lit.lit {
            syn::Lit::Str(s) => Some(s.value()),
            _ => None,
        },
        _ => None,
    }
}

fn block_is_empty_or_unit(block: &syn::Block) -> bool {
    match block.stmts.as_slice() {
        [] => true,
        [syn::Stmt::Expr(syn::Expr::Tuple(tuple), _)] => tuple.elems.is_empty(),
        _ => false,
    }
}

impl<'ast> Visit<'ast> for Detector {
    fn visit_expr_call(&mut self, node: &'ast syn::ExprCall) {
        // Arg::new("name") / Arg::with_name("name") registrations.
        if let syn::Expr::Path(path) = node.func.as_ref() {
            let segments: Vec<String> = path
                .path
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect();
            let is_arg_ctor = segments.len() >= 2
                && segments[segments.len() - 2] == "Arg"
                && matches!(segments[segments.len() - 1].as_str(), "new" | "with_name");
            if is_arg_ctor {
                if let Some(name) = first_str_arg(&node.args) {
                    let line = span_line(node.span());
                    self.registered_flags.entry(name).or_insert(line);
                }
            }
        }
        syn::visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast syn::ExprMethodCall) {
        let method = node.method.to_string();
        if FLAG_READ_METHODS.contains(&method.as_str()) {
            if let Some(name) = first_str_arg(&node.args) {
                self.read_flags.insert(name);
            }
        }
        syn::visit::visit_expr_method_call(self, node);
    }

    fn visit_expr_field(&mut self, node: &'ast syn::ExprField) {
        // Derive-style access: args.flag_name marks flag_name as read.
        if let syn::Member::Named(ident) = &node.member {
            self.read_flags.insert(ident.to_string());
        }
        syn::visit::visit_expr_field(self, node);
    }

    fn visit_expr_if(&mut self, node: &'ast syn::ExprIf) {
        if block_is_empty_or_unit(&node.then_branch) {
            self.empty_branches.push(span_line(node.span()));
        }
        if let Some((_, else_expr)) = &node.else_branch {
            if let syn::Expr::Block(block) = else_expr.as_ref() {
                if block_is_empty_or_unit(&block.block) {
                    self.empty_branches.push(span_line(else_expr.span()));
                }
            }
        }
        syn::visit::visit_expr_if(self, node);
    }
}

struct FunctionRef<'ast> {
    name: String,
    line: usize,
    is_test: bool,
    block: &'ast syn::Block,
}

fn attrs_mark_test(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path()
            .segments
            .last()
            .map(|s| s.ident == "test")
            .unwrap_or(false)
    })
}

fn collect_functions(file: &syn::File) -> Vec<FunctionRef<'_>> {
    struct Collector<'ast> {
        out: Vec<FunctionRef<'ast>>,
    }
    impl<'ast> Visit<'ast> for Collector<'ast> {
        fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
            let name = node.sig.ident.to_string();
            self.out.push(FunctionRef {
                is_test: attrs_mark_test(&node.attrs) || name.starts_with("test_"),
                name,
                line: span_line(node.sig.span()),
                block: &node.block,
            });
            syn::visit::visit_item_fn(self, node);
        }

        fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
            let name = node.sig.ident.to_string();
            self.out.push(FunctionRef {
                is_test: attrs_mark_test(&node.attrs) || name.starts_with("test_"),
                name,
                line: span_line(node.sig.span()),
                block: &node.block,
            });
            syn::visit::visit_impl_item_fn(self, node);
        }
    }
    let mut collector = Collector { out: Vec::new() };
    collector.visit_file(file);
    collector.out
}

/// A body consisting solely of `todo!()` / `unimplemented!()` (with or
/// without a trailing semicolon) is a stub.
fn is_stub_body(block: &syn::Block) -> bool {
    let [stmt] = block.stmts.as_slice() else {
        return false;
    };
    let mac = match stmt {
        syn::Stmt::Macro(m) => &m.mac,
        syn::Stmt::Expr(syn::Expr::Macro(m), _) => &m.mac,
        _ => return false,
    };
    mac.path
        .segments
        .last()
        .map(|s| s.ident == "todo" || s.ident == "unimplemented")
        .unwrap_or(false)
}

/// Returns `Some(reason)` when a test body contains at least one assertion
/// and all of them are tautologies.
fn trivial_assertions_only(block: &syn::Block) -> Option<String> {
    struct Asserts {
        total: usize,
        trivial: usize,
        example: Option<String>,
    }
    impl<'ast> Visit<'ast> for Asserts {
        fn visit_macro(&mut self, node: &'ast syn::Macro) {
            let Some(name) = node.path.segments.last().map(|s| s.ident.to_string()) else {
                return;
            };
            let tokens: String = node
                .tokens
                .to_string()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            match name.as_str() {
                "assert" => {
                    self.total += 1;
                    if tokens == "true"
                        || tokens.ends_with(".is_some()")
                        || tokens.ends_with(".is_ok()")
                    {
                        self.trivial += 1;
                        self.example.get_or_insert(format!("assert!({tokens})"));
                    }
                }
                "assert_eq" | "assert_ne" => {
                    self.total += 1;
                    if let Some((left, right)) = split_top_level_comma(&tokens) {
                        if name == "assert_eq" && left == right {
                            self.trivial += 1;
                            self.example
                                .get_or_insert(format!("assert_eq!({left}, {right})"));
                        }
                    }
                }
                _ => {}
            }
            syn::visit::visit_macro(self, node);
        }
    }

    let mut asserts = Asserts {
        total: 0,
        trivial: 0,
        example: None,
    };
    asserts.visit_block(block);
    (asserts.total > 0 && asserts.total == asserts.trivial)
        .then(|| asserts.example.unwrap_or_else(|| "assert!(true)".to_string()))
}

/// Splits macro tokens at the first comma not nested in brackets.
fn split_top_level_comma(tokens: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (idx, ch) in tokens.char_indices() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => return Some((&tokens[..idx], &tokens[idx + 1..])),
            _ => {}
        }
    }
    None
}

/// Detects `use` leaves never referenced outside the import lines
/// themselves. Glob imports and `self` re-exports are exempt.
fn unused_imports(path: &str, source: &str, file: &syn::File) -> Vec<CompletenessIssue> {
    struct Leaf {
        name: String,
        line: usize,
    }

    fn collect_leaves(tree: &syn::UseTree, out: &mut Vec<Leaf>) {
        match tree {
            syn::UseTree::Path(p) => collect_leaves(&p.tree, out),
            syn::UseTree::Name(n) => {
                let name = n.ident.to_string();
                if name != "self" {
                    out.push(Leaf {
                        line: span_line(n.ident.span()),
                        name,
                    });
                }
            }
            syn::UseTree::Rename(r) => out.push(Leaf {
                line: span_line(r.rename.span()),
                name: r.rename.to_string(),
            }),
            syn::UseTree::Glob(_) => {}
            syn::UseTree::Group(g) => {
                for item in &g.items {
                    collect_leaves(item, out);
                }
            }
        }
    }

    let mut leaves = Vec::new();
    let mut use_line_ranges: Vec<(usize, usize)> = Vec::new();
    for item in &file.items {
        if let syn::Item::Use(item_use) = item {
            collect_leaves(&item_use.tree, &mut leaves);
            let span = item_use.span();
            use_line_ranges.push((span_line(span), span_end_line(span)));
        }
    }
    if leaves.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = source.lines().collect();
    let in_use_item = |line_number: usize| {
        use_line_ranges
            .iter()
            .any(|(start, end)| line_number >= *start && line_number <= *end)
    };

    let mut issues = Vec::new();
    for leaf in leaves {
        let mut used = false;
        for (idx, line) in lines.iter().enumerate() {
            if in_use_item(idx + 1) {
                continue;
            }
            if contains_word(line, &leaf.name) {
                used = true;
                break;
            }
        }
        if !used {
            issues.push(CompletenessIssue {
                category: IssueCategory::UnusedImport,
                file: path.to_string(),
                line: leaf.line,
                description: format!("import `{}` is never referenced", leaf.name),
                severity: Severity::Warning,
            });
        }
    }
    issues
}

/// Identifier-boundary substring search.
fn contains_word(haystack: &str, word: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(word) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack[..abs]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false);
        let after = abs + word.len();
        let after_ok = after >= haystack.len()
            || !haystack[after..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
        start = abs + word.len();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(src: &str) -> Vec<CompletenessIssue> {
        analyze_source("lib.rs", src).unwrap()
    }

    #[test]
    fn dead_cli_flag_is_an_error() {
        let src = r#"
use clap::{Arg, Command};

fn cli() -> Command {
    Command::new("tool")
        .arg(Arg::new("input"))
        .arg(Arg::new("dry-run"))
}

fn main() {
    let matches = cli().get_matches();
    let _input: Option<&String> = matches.get_one("input");
}
"#;
        let issues = analyze(src);
        let dead: Vec<_> = issues
            .iter()
            .filter(|i| i.category == IssueCategory::DeadCliFlag)
            .collect();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].description.contains("dry-run"));
        assert_eq!(dead[0].severity, Severity::Error);
    }

    #[test]
    fn derive_field_access_counts_as_flag_read() {
        let src = r#"
use clap::Arg;

fn cli() {
    let _ = Arg::new("verbose");
}

fn run(args: &Args) {
    if args.verbose {
        tracing::info!("on");
    }
}
"#;
        let issues = analyze(src);
        assert!(!issues
            .iter()
            .any(|i| i.category == IssueCategory::DeadCliFlag));
    }

    #[test]
    fn empty_branch_is_a_warning() {
        let src = r#"
fn route(blocked: bool) {
    if blocked {
    } else {
        proceed();
    }
}
fn proceed() { let _ = 1; }
"#;
        let issues = analyze(src);
        let empties: Vec<_> = issues
            .iter()
            .filter(|i| i.category == IssueCategory::EmptyBranch)
            .collect();
        assert_eq!(empties.len(), 1);
        assert_eq!(empties[0].severity, Severity::Warning);
    }

    #[test]
    fn stub_function_is_an_error() {
        let src = r#"
pub fn finalize_workflow() {
    todo!()
}
"#;
        let issues = analyze(src);
        let stubs: Vec<_> = issues
            .iter()
            .filter(|i| i.category == IssueCategory::StubFunction)
            .collect();
        assert_eq!(stubs.len(), 1);
        assert!(stubs[0].description.contains("finalize_workflow"));
    }

    #[test]
    fn test_functions_are_not_stub_flagged() {
        let src = r#"
#[test]
fn test_later() {
    todo!()
}
"#;
        let issues = analyze(src);
        assert!(!issues
            .iter()
            .any(|i| i.category == IssueCategory::StubFunction));
    }

    #[test]
    fn tautological_test_is_a_warning() {
        let src = r#"
#[test]
fn test_nothing() {
    let result = Some(1);
    assert!(result.is_some());
}
"#;
        let issues = analyze(src);
        assert!(issues
            .iter()
            .any(|i| i.category == IssueCategory::TrivialAssertion));
    }

    #[test]
    fn real_assertions_are_not_flagged() {
        let src = r#"
#[test]
fn test_math() {
    assert_eq!(2 + 2, 4);
}
"#;
        let issues = analyze(src);
        assert!(!issues
            .iter()
            .any(|i| i.category == IssueCategory::TrivialAssertion));
    }

    #[test]
    fn unused_import_is_a_warning() {
        let src = r#"
use std::collections::HashMap;
use std::collections::HashSet;

fn build() -> HashMap<String, u32> {
    HashMap::new()
}
"#;
        let issues = analyze(src);
        let unused: Vec<_> = issues
            .iter()
            .filter(|i| i.category == IssueCategory::UnusedImport)
            .collect();
        assert_eq!(unused.len(), 1);
        assert!(unused[0].description.contains("HashSet"));
    }

    #[test]
    fn glob_imports_are_exempt() {
        let src = r#"
use super::*;

fn helper() -> u32 { 1 }
"#;
        let issues = analyze(src);
        assert!(!issues
            .iter()
            .any(|i| i.category == IssueCategory::UnusedImport));
    }

    #[test]
    fn verdict_aggregation() {
        let clean = ("a.rs".to_string(), "pub fn ok() -> u32 { 1 }\n".to_string());
        let warn = (
            "b.rs".to_string(),
            "use std::fmt::Debug;\npub fn ok() -> u32 { 1 }\n".to_string(),
        );
        let block = ("c.rs".to_string(), "pub fn nope() { todo!() }\n".to_string());

        assert_eq!(
            analyze_files(&[clean.clone()], 1 << 20).verdict,
            CompletenessVerdict::Pass
        );
        assert_eq!(
            analyze_files(&[clean.clone(), warn.clone()], 1 << 20).verdict,
            CompletenessVerdict::Warn
        );
        assert_eq!(
            analyze_files(&[clean, warn, block], 1 << 20).verdict,
            CompletenessVerdict::Block
        );
    }

    #[test]
    fn oversized_files_are_summarized_not_analyzed() {
        let big_source = format!("pub fn nope() {{ todo!() }}\n{}", "// pad\n".repeat(100));
        let result = analyze_files(&[("big.rs".to_string(), big_source)], 16);
        assert_eq!(result.verdict, CompletenessVerdict::Pass);
        assert_eq!(result.summarized_files, vec!["big.rs".to_string()]);
    }

    #[test]
    fn summarize_lists_item_signatures() {
        let src = "use std::fmt;\n\npub struct Store {\n    x: u32,\n}\n\npub fn get(s: &Store) -> u32 {\n    s.x\n}\n";
        let summary = summarize_source(src);
        assert!(summary.contains("pub struct Store"));
        assert!(summary.contains("pub fn get(s: &Store) -> u32"));
        assert!(!summary.contains("s.x"));
    }
}
