//! C translation units for candidate programs.
//!
//! Every candidate is emitted in a freestanding form (its own `main`, its own
//! sentinels and accessors) and a shimmed form derived from it: the entry
//! point and libc hooks are renamed, definitions the stub library owns are
//! dropped, and a separate stub unit supplies everything left undefined.

use crate::ct::CtProgram;
use crate::program::{AccessorStyle, CandidateProgram, InputDecl, Shape};
use crate::shim::{StepValues, DEFAULT_NONDET_CAPACITY};
use crate::slot::{accessor_symbol, storage_symbol, ROTATING_ACCESSOR, ROTATING_INDEX, ROTATING_STORAGE};
use anyhow::{anyhow, Result};
use harness_abi::{
    Outcome, ABORT_COUNTER, ABORT_CUT_COUNTER, ABORT_HOOK, ASSERT_FAIL_HOOK, ASSERT_HOOK,
    ERROR_FLAG, ERROR_SENTINEL, EXIT_HOOK, FAILURE_COUNTER, FAILURE_CUT_COUNTER, HOST_ENTRY, MAIN_HOOK,
    NONDET_PREFIX, SHIM_ENTRY, SUCCESS_FLAG, SUCCESS_SENTINEL, VERIFIER_ERROR,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Routine renames applied when a unit is shimmed.
pub const REPLACE_MAP: &[(&str, &str)] = &[
    (HOST_ENTRY, SHIM_ENTRY),
    ("abort", ABORT_HOOK),
    ("exit", EXIT_HOOK),
    ("assert", ASSERT_HOOK),
    ("__assert_fail", ASSERT_FAIL_HOOK),
];

/// Candidate-side routine that holds the guards.
pub(crate) const CANDIDATE_FN: &str = "fun";

static CALL_SITE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)(\s*)\(").expect("call site regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CFunction {
    pub ret: String,
    pub name: String,
    pub params: String,
    pub noinline: bool,
    pub body: Vec<String>,
}

impl CFunction {
    fn new(ret: &str, name: &str, params: &str) -> Self {
        Self {
            ret: ret.to_string(),
            name: name.to_string(),
            params: params.to_string(),
            noinline: false,
            body: Vec::new(),
        }
    }

    fn noinline(mut self) -> Self {
        self.noinline = true;
        self
    }

    fn line(mut self, line: impl Into<String>) -> Self {
        self.body.push(line.into());
        self
    }

    fn lines(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.body.extend(lines);
        self
    }

    /// Names of every routine called from the body.
    pub fn calls(&self) -> BTreeSet<String> {
        self.body
            .iter()
            .flat_map(|line| CALL_SITE.captures_iter(line))
            .map(|caps| caps[1].to_string())
            .filter(|name| !is_c_keyword(name))
            .collect()
    }

    fn render(&self, out: &mut String) {
        if self.noinline {
            out.push_str("__attribute__((noinline)) ");
        }
        out.push_str(&format!("{} {}({}) {{\n", self.ret, self.name, self.params));
        for line in &self.body {
            if line.is_empty() {
                out.push('\n');
            } else {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("}\n");
    }
}

fn is_c_keyword(name: &str) -> bool {
    matches!(name, "if" | "while" | "for" | "switch" | "return" | "sizeof")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CItem {
    Comment(Vec<String>),
    Include(String),
    /// A full declaration line such as `extern void reach_error(void);`.
    Declaration { name: String, text: String },
    Global { name: String, text: String },
    Function(CFunction),
    /// Verbatim text, used for stub bodies.
    Raw(String),
}

impl CItem {
    fn global(name: &str, text: String) -> Self {
        CItem::Global {
            name: name.to_string(),
            text,
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            CItem::Comment(lines) => {
                out.push_str("/*\n");
                for line in lines {
                    out.push_str(" * ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str(" */\n");
            }
            CItem::Include(header) => out.push_str(&format!("#include {header}\n")),
            CItem::Declaration { text, .. } | CItem::Global { text, .. } => {
                out.push_str(text);
                out.push('\n');
            }
            CItem::Function(function) => function.render(out),
            CItem::Raw(text) => {
                out.push_str(text.trim_matches('\n'));
                out.push('\n');
            }
        }
    }
}

/// A structured C translation unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CUnit {
    pub items: Vec<CItem>,
}

impl CUnit {
    pub fn push(&mut self, item: CItem) {
        self.items.push(item);
    }

    pub fn functions(&self) -> impl Iterator<Item = &CFunction> {
        self.items.iter().filter_map(|item| match item {
            CItem::Function(function) => Some(function),
            _ => None,
        })
    }

    pub fn defines(&self, name: &str) -> bool {
        self.functions().any(|function| function.name == name)
    }

    /// Routines called somewhere in the unit but defined nowhere in it.
    pub fn undefined_calls(&self) -> BTreeSet<String> {
        let defined: HashSet<&str> = self.functions().map(|f| f.name.as_str()).collect();
        self.functions()
            .flat_map(|function| function.calls())
            .filter(|name| !defined.contains(name.as_str()))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (idx, item) in self.items.iter().enumerate() {
            let previous = idx.checked_sub(1).map(|prev| &self.items[prev]);
            let grouped = matches!(
                (previous, item),
                (Some(CItem::Global { .. }), CItem::Global { .. })
                    | (Some(CItem::Declaration { .. }), CItem::Declaration { .. })
                    | (Some(CItem::Include(_)), CItem::Include(_))
            );
            if idx > 0 && !grouped {
                out.push('\n');
            }
            item.render(&mut out);
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorOptions {
    pub steps: StepValues,
    pub nondet_capacity: usize,
    pub forms: Vec<Form>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            steps: StepValues::default(),
            nondet_capacity: DEFAULT_NONDET_CAPACITY,
            forms: vec![Form::Freestanding, Form::Shimmed],
        }
    }
}

fn label_header(id: &str, verdict: &str, description: &str) -> CItem {
    let mut lines = vec![format!("harness:example {id}"), format!("harness:expect {verdict}")];
    if !description.is_empty() {
        lines.push(description.to_string());
    }
    CItem::Comment(lines)
}

fn c_int(value: i64) -> String {
    if i32::try_from(value).is_ok() {
        value.to_string()
    } else {
        format!("{value}LL")
    }
}

fn sentinel_call(outcome: Outcome) -> String {
    format!("{}();", outcome.sentinel_symbol())
}

fn derived_expr(input: &InputDecl) -> Option<String> {
    let derived = input.derived.as_ref()?;
    Some(match derived.offset {
        offset if offset < 0 => format!("{} - {}", derived.base, c_int(offset.unsigned_abs() as i64)),
        offset => format!("{} + {}", derived.base, c_int(offset)),
    })
}

fn guard_lines(program: &CandidateProgram) -> Vec<String> {
    let then = sentinel_call(program.then);
    let otherwise = sentinel_call(program.otherwise);
    match program.shape {
        Shape::Flat => {
            let condition = program
                .guards
                .iter()
                .map(|guard| {
                    if program.guards.len() > 1 {
                        format!("({})", guard.render_c())
                    } else {
                        guard.render_c()
                    }
                })
                .collect::<Vec<_>>()
                .join(" && ");
            vec![
                format!("if ({condition}) {{"),
                format!("    {then}"),
                "} else {".to_string(),
                format!("    {otherwise}"),
                "}".to_string(),
            ]
        }
        Shape::Nested => {
            let depth = program.guards.len();
            let mut lines = Vec::new();
            for (level, guard) in program.guards.iter().enumerate() {
                lines.push(format!("{}if ({}) {{", "    ".repeat(level), guard.render_c()));
            }
            lines.push(format!("{}{then}", "    ".repeat(depth)));
            for level in (0..depth).rev() {
                let indent = "    ".repeat(level);
                lines.push(format!("{indent}}} else {{"));
                lines.push(format!("{indent}    {otherwise}"));
                lines.push(format!("{indent}}}"));
            }
            lines
        }
    }
}

/// The freestanding translation unit of a candidate.
pub fn freestanding_unit(program: &CandidateProgram, _options: &GeneratorOptions) -> CUnit {
    let mut unit = CUnit::default();
    unit.push(label_header(&program.id, program.verdict.label(), &program.description));
    unit.push(CItem::global(ERROR_FLAG, format!("volatile int {ERROR_FLAG};")));
    unit.push(CItem::Function(
        CFunction::new("void", VERIFIER_ERROR, "void")
            .noinline()
            .line(format!("{ERROR_FLAG} = 1;")),
    ));

    let slot_inputs: Vec<&InputDecl> = program.slot_inputs().collect();
    match program.accessor {
        AccessorStyle::PerSlot => {
            for input in &slot_inputs {
                let storage = storage_symbol(&input.name);
                unit.push(CItem::global(&storage, format!("volatile int {storage};")));
            }
            for input in &slot_inputs {
                unit.push(CItem::Function(
                    CFunction::new("int", &accessor_symbol(&input.name), "void")
                        .noinline()
                        .line(format!("return {};", storage_symbol(&input.name))),
                ));
            }
        }
        AccessorStyle::Rotating => {
            let count = slot_inputs.len().max(1);
            unit.push(CItem::global(
                ROTATING_STORAGE,
                format!("static volatile int {ROTATING_STORAGE}[{count}];"),
            ));
            unit.push(CItem::global(
                ROTATING_INDEX,
                format!("static volatile int {ROTATING_INDEX} = 0;"),
            ));
            unit.push(CItem::Function(
                CFunction::new("int", ROTATING_ACCESSOR, "void")
                    .noinline()
                    .line(format!("int v = {ROTATING_STORAGE}[{ROTATING_INDEX} % {count}];"))
                    .line(format!("{ROTATING_INDEX} = {ROTATING_INDEX} + 1;"))
                    .line("return v;"),
            ));
        }
    }

    unit.push(CItem::global(SUCCESS_FLAG, format!("volatile int {SUCCESS_FLAG};")));
    unit.push(CItem::Function(
        CFunction::new("void", ERROR_SENTINEL, "void")
            .noinline()
            .line(format!("{VERIFIER_ERROR}();")),
    ));
    unit.push(CItem::Function(
        CFunction::new("void", SUCCESS_SENTINEL, "void")
            .noinline()
            .line(format!("{SUCCESS_FLAG} = 1;")),
    ));

    let params = program
        .inputs
        .iter()
        .map(|input| format!("long long {}", input.name))
        .collect::<Vec<_>>()
        .join(", ");
    unit.push(CItem::Function(
        CFunction::new("void", CANDIDATE_FN, if params.is_empty() { "void" } else { params.as_str() })
            .lines(guard_lines(program)),
    ));

    let mut main = CFunction::new("int", HOST_ENTRY, "void");
    for input in &program.inputs {
        let value = match derived_expr(input) {
            Some(expr) => expr,
            None if program.accessor == AccessorStyle::Rotating => format!("{ROTATING_ACCESSOR}()"),
            None => format!("{}()", accessor_symbol(&input.name)),
        };
        main = main.line(format!("long long {} = {value};", input.name));
    }
    let args = program
        .inputs
        .iter()
        .map(|input| input.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    main = main.line(format!("{CANDIDATE_FN}({args});")).line("return 0;");
    unit.push(CItem::Function(main));
    unit
}

/// A stub routine with its extern declaration and dependencies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stub {
    pub name: String,
    pub declaration: String,
    pub definition: String,
    pub deps: Vec<String>,
}

impl Stub {
    pub fn new(name: &str, declaration: &str, definition: String, deps: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            declaration: declaration.to_string(),
            definition,
            deps: deps.iter().map(|dep| dep.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StubLibrary {
    stubs: BTreeMap<String, Stub>,
}

const NONDET_TYPES: &[(&str, &str)] = &[
    ("int", "int"),
    ("uint", "unsigned int"),
    ("short", "short"),
    ("ushort", "unsigned short"),
    ("long", "long"),
    ("ulong", "unsigned long"),
    ("char", "char"),
    ("uchar", "unsigned char"),
    ("bool", "_Bool"),
];

impl StubLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stub: Stub) {
        self.stubs.insert(stub.name.clone(), stub);
    }

    pub fn get(&self, name: &str) -> Option<&Stub> {
        self.stubs.get(name)
    }

    /// Hooks, sentinels and nondet streams of the shimmed form.
    pub fn standard(steps: &StepValues, capacity: usize) -> Self {
        let (direct, cut) = (steps.direct, steps.cut);
        let mut library = Self::new();
        library.insert(Stub::new(
            ABORT_HOOK,
            &format!("extern void __attribute__((noinline)) {ABORT_HOOK}(void);"),
            format!(
                "unsigned int {ABORT_COUNTER} = 0;\n\
                 unsigned int {ABORT_CUT_COUNTER} = 0;\n\
                 void __attribute__((noinline)) {ABORT_HOOK}(void) {{\n    \
                 {ABORT_COUNTER} += {direct};\n    \
                 {ABORT_CUT_COUNTER} += {cut};\n}}"
            ),
            &[],
        ));
        library.insert(Stub::new(
            EXIT_HOOK,
            &format!("extern void {EXIT_HOOK}(int status);"),
            format!("void {EXIT_HOOK}(int status) {{ {ABORT_HOOK}(); }}"),
            &[ABORT_HOOK],
        ));
        library.insert(Stub::new(
            ASSERT_FAIL_HOOK,
            &format!(
                "extern void __attribute__((noinline)) {ASSERT_FAIL_HOOK}(const char* p1, const char* p2, unsigned int p3, const char* p4);"
            ),
            format!(
                "unsigned int {FAILURE_COUNTER} = 0;\n\
                 unsigned int {FAILURE_CUT_COUNTER} = 0;\n\
                 void __attribute__((noinline)) {ASSERT_FAIL_HOOK}(const char* p1, const char* p2, unsigned int p3, const char* p4) {{\n    \
                 {FAILURE_COUNTER} += {direct};\n    \
                 {FAILURE_CUT_COUNTER} += {cut};\n}}"
            ),
            &[],
        ));
        library.insert(Stub::new(
            ASSERT_HOOK,
            &format!("extern void {ASSERT_HOOK}(int c);"),
            format!(
                "void {ASSERT_HOOK}(int c) {{\n    \
                 if (!c) {{\n        \
                 {ASSERT_FAIL_HOOK}(\"assert\", \"stub\", 0, \"\");\n    \
                 }}\n}}"
            ),
            &[ASSERT_FAIL_HOOK],
        ));
        library.insert(Stub::new(
            ERROR_SENTINEL,
            &format!("extern void {ERROR_SENTINEL}(void);"),
            format!(
                "void {ERROR_SENTINEL}(void) {{ {ASSERT_FAIL_HOOK}(\"stub\", \"stub\", 0, \"{ERROR_SENTINEL}\"); }}"
            ),
            &[ASSERT_FAIL_HOOK],
        ));
        library.insert(Stub::new(
            "__VERIFIER_assert",
            "extern void __VERIFIER_assert(int cond);",
            format!(
                "void __VERIFIER_assert(int cond) {{\n    \
                 if (!cond) {{\n        \
                 {ERROR_SENTINEL}();\n        \
                 {ABORT_HOOK}();\n    \
                 }}\n}}"
            ),
            &[ERROR_SENTINEL, ABORT_HOOK],
        ));
        for (suffix, ty) in NONDET_TYPES {
            let name = format!("{NONDET_PREFIX}{suffix}");
            let size = format!("_STUB_{}_ARRAY_SIZE", suffix.to_ascii_uppercase());
            library.insert(Stub::new(
                &name,
                &format!("extern {ty} {name}(void);"),
                format!(
                    "#define {size} {capacity}\n\
                     volatile unsigned int _stub_{suffix}_index = 0;\n\
                     {ty} _stub_{suffix}_array[{size}] = {{0}};\n\
                     {ty} {name}(void) {{\n    \
                     unsigned int i = _stub_{suffix}_index;\n    \
                     if (i < {size}) {{\n        \
                     _stub_{suffix}_index = i + 1;\n        \
                     return _stub_{suffix}_array[i];\n    \
                     }}\n    \
                     {ABORT_HOOK}();\n    \
                     return 0;\n}}"
                ),
                &[ABORT_HOOK],
            ));
        }
        // The host `main` only adds the cut step on return. It does not call
        // `c2bc_abort` after `c2bc_main`, so a clean return is never counted
        // as an abort.
        library.insert(Stub::new(
            HOST_ENTRY,
            &format!("extern int {SHIM_ENTRY}(void);"),
            format!(
                "int {MAIN_HOOK} = 0;\n\
                 int {HOST_ENTRY}(void) {{\n    \
                 int res = {SHIM_ENTRY}();\n    \
                 {MAIN_HOOK} += {cut};\n    \
                 return res;\n}}"
            ),
            &[],
        ));
        library
    }

    /// Definitions in a candidate that the shimmed form takes from here or
    /// no longer needs.
    pub fn owns(&self, name: &str) -> bool {
        matches!(name, ERROR_SENTINEL | VERIFIER_ERROR | ERROR_FLAG) || name.starts_with(NONDET_PREFIX)
    }

    /// Stubs needed for `roots`, each listed after its dependencies.
    pub fn closure<'a, I>(&self, roots: I) -> Result<Vec<&Stub>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut visited = HashSet::new();
        let mut ordered = Vec::new();
        for root in roots {
            self.visit(root, &mut visited, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit<'s>(
        &'s self,
        name: &str,
        visited: &mut HashSet<String>,
        ordered: &mut Vec<&'s Stub>,
    ) -> Result<()> {
        if !visited.insert(name.to_string()) {
            return Ok(());
        }
        let stub = self
            .stubs
            .get(name)
            .ok_or_else(|| anyhow!("no stub provides `{name}`"))?;
        for dep in &stub.deps {
            self.visit(dep, visited, ordered)?;
        }
        ordered.push(stub);
        Ok(())
    }
}

/// The shimmed name of a routine, if it changes.
pub fn shim_name(name: &str) -> Option<&'static str> {
    if let Some((_, to)) = REPLACE_MAP.iter().find(|(from, _)| *from == name) {
        return Some(*to);
    }
    match name.strip_prefix(NONDET_PREFIX) {
        Some(rest) if rest.starts_with("int_") => Some(ROTATING_ACCESSOR),
        _ => None,
    }
}

fn rename_calls(line: &str) -> String {
    CALL_SITE
        .replace_all(line, |caps: &Captures<'_>| match shim_name(&caps[1]) {
            Some(to) => format!("{to}{}(", &caps[2]),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShimmedUnits {
    pub candidate: CUnit,
    pub stubs: CUnit,
}

/// Derives the shimmed candidate and its stub unit from a freestanding unit.
pub fn shim_transform(unit: &CUnit, library: &StubLibrary) -> Result<ShimmedUnits> {
    let mut body = Vec::new();
    let mut header = Vec::new();
    for item in &unit.items {
        match item {
            CItem::Comment(_) => header.push(item.clone()),
            CItem::Function(function) if library.owns(&function.name) => {}
            CItem::Global { name, .. } if library.owns(name) => {}
            CItem::Function(function) => {
                let mut function = function.clone();
                if let Some(to) = shim_name(&function.name) {
                    function.name = to.to_string();
                }
                function.body = function.body.iter().map(|line| rename_calls(line)).collect();
                body.push(CItem::Function(function));
            }
            other => body.push(other.clone()),
        }
    }

    let draft = CUnit { items: body };
    let undefined = draft.undefined_calls();
    let mut candidate = CUnit { items: header };
    for name in &undefined {
        let stub = library
            .get(name)
            .ok_or_else(|| anyhow!("`{name}` is called but neither defined nor stubbed"))?;
        candidate.push(CItem::Declaration {
            name: name.clone(),
            text: stub.declaration.clone(),
        });
    }
    candidate.items.extend(draft.items);

    let roots = undefined
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(HOST_ENTRY));
    let needed = library.closure(roots)?;
    let mut stubs = CUnit::default();
    for stub in &needed {
        stubs.push(CItem::Declaration {
            name: stub.name.clone(),
            text: stub.declaration.clone(),
        });
    }
    for stub in &needed {
        stubs.push(CItem::Raw(stub.definition.clone()));
    }
    Ok(ShimmedUnits { candidate, stubs })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Form {
    Freestanding,
    Shimmed,
}

impl Form {
    pub fn label(&self) -> &'static str {
        match self {
            Form::Freestanding => "freestanding",
            Form::Shimmed => "shimmed",
        }
    }
}

/// One emitted file, relative to the output root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub form: Form,
    pub file_name: String,
    pub contents: String,
    pub sha256: String,
}

impl Artifact {
    pub fn new(form: Form, file_name: String, contents: String) -> Self {
        let sha256 = hex::encode(Sha256::digest(contents.as_bytes()));
        Self {
            form,
            file_name,
            contents,
            sha256,
        }
    }
}

pub fn generate(program: &CandidateProgram, options: &GeneratorOptions) -> Result<Vec<Artifact>> {
    let unit = freestanding_unit(program, options);
    let mut artifacts = Vec::new();
    if options.forms.contains(&Form::Freestanding) {
        artifacts.push(Artifact::new(
            Form::Freestanding,
            format!("{}/example.c", program.id),
            unit.render(),
        ));
    }
    if options.forms.contains(&Form::Shimmed) {
        let library = StubLibrary::standard(&options.steps, options.nondet_capacity);
        let shimmed = shim_transform(&unit, &library)?;
        artifacts.push(Artifact::new(
            Form::Shimmed,
            format!("{}/example.shim.c", program.id),
            shimmed.candidate.render(),
        ));
        artifacts.push(Artifact::new(
            Form::Shimmed,
            format!("{}/example.stubs.c", program.id),
            shimmed.stubs.render(),
        ));
    }
    tracing::debug!(example = %program.id, files = artifacts.len(), "generated candidate");
    Ok(artifacts)
}

pub fn generate_ct(program: &dyn CtProgram) -> Artifact {
    let mut unit = CUnit::default();
    let verdict = program.verdict();
    let mut header = label_header(program.id(), verdict.label(), program.description());
    if let CItem::Comment(lines) = &mut header {
        let status = verdict.label().trim_start_matches("ct-");
        lines.push(format!("Expected CHECKCT result: {status}"));
    }
    unit.push(header);
    unit.push(CItem::Raw(program.c_source()));
    Artifact::new(
        Form::Freestanding,
        format!("{}/candidate.c", program.id()),
        unit.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use crate::ct::TableLookupLeak;

    fn builtin(id: &str) -> CandidateProgram {
        Corpus::builtin().unwrap().program(id).cloned().unwrap()
    }

    #[test]
    fn freestanding_unit_has_the_full_symbol_set() {
        let unit = freestanding_unit(&builtin("ineq-a-ge-b"), &GeneratorOptions::default());
        let text = unit.render();
        assert!(text.starts_with("/*\n * harness:example ineq-a-ge-b\n * harness:expect error-reachable\n"));
        assert!(text.contains("volatile int __VERIFIER_nondet_slot_a;\nvolatile int __VERIFIER_nondet_slot_b;\n"));
        assert!(text.contains("__attribute__((noinline)) int __VERIFIER_nondet_int_a(void) {"));
        assert!(text.contains("    if (a >= b) {\n        reach_error();\n    } else {\n        reach_success();\n    }\n"));
        assert!(text.contains("    long long a = __VERIFIER_nondet_int_a();\n"));
        assert!(text.contains("int main(void) {"));
        assert!(text.contains("volatile int error_flag;\n"));
        assert!(unit.defines(ERROR_SENTINEL));
        assert!(unit.undefined_calls().is_empty());
    }

    #[test]
    fn sentinels_are_non_inlined_with_side_effects() {
        let text = freestanding_unit(&builtin("ineq-a-ge-b"), &GeneratorOptions::default()).render();
        assert!(text.contains(
            "__attribute__((noinline)) void __VERIFIER_error(void) {\n    error_flag = 1;\n}\n"
        ));
        assert!(text.contains(
            "__attribute__((noinline)) void reach_error(void) {\n    __VERIFIER_error();\n}\n"
        ));
        assert!(text.contains(
            "__attribute__((noinline)) void reach_success(void) {\n    success_flag = 1;\n}\n"
        ));
        let error = text.find("void reach_error(void)").unwrap();
        let flag = text.find("volatile int error_flag;").unwrap();
        assert!(flag < error);
    }

    #[test]
    fn rotating_candidates_share_one_accessor() {
        let text = freestanding_unit(&builtin("ineq-a-gt-a-plus-1"), &GeneratorOptions::default()).render();
        assert!(text.contains("static volatile int __VERIFIER_nondet_slots[1];"));
        assert!(text.contains("long long a = __VERIFIER_nondet_int();"));
        assert!(text.contains("long long b = a + 1;"));
        assert!(text.contains("if (b > a) {"));
    }

    #[test]
    fn nested_shape_falls_through_at_every_level() {
        let program = builtin("chain-if-error");
        let text = freestanding_unit(&program, &GeneratorOptions::default()).render();
        assert_eq!(text.matches("reach_success();").count(), program.guards.len());
        assert!(text.contains("                if (a - d > 100) {\n                    reach_error();"));
    }

    #[test]
    fn shim_transform_renames_and_drops_owned_definitions() {
        let unit = freestanding_unit(&builtin("ineq-a-ge-b"), &GeneratorOptions::default());
        let library = StubLibrary::standard(&StepValues::default(), 1024);
        let shimmed = shim_transform(&unit, &library).unwrap();
        let candidate = shimmed.candidate.render();
        assert!(candidate.contains("int c2bc_main(void) {"));
        assert!(!candidate.contains("int main(void)"));
        assert!(!candidate.contains("void reach_error(void) {"));
        assert!(!candidate.contains("__VERIFIER_nondet_slot_a"));
        assert!(!candidate.contains("error_flag"));
        assert!(candidate.contains("long long a = __VERIFIER_nondet_int();"));
        assert!(candidate.contains("extern void reach_error(void);"));
        assert!(candidate.contains("harness:expect error-reachable"));

        let stubs = shimmed.stubs.render();
        assert!(stubs.contains("_stub_failure_counter += 3;"));
        assert!(stubs.contains("_stub_failure_cut_counter += 7;"));
        assert!(stubs.contains("_main_hook += 7;"));
        assert!(stubs.contains("#define _STUB_INT_ARRAY_SIZE 1024"));
        assert!(stubs.contains("volatile unsigned int _stub_int_index = 0;"));
        let abort = stubs.find("void __attribute__((noinline)) c2bc_abort(void) {").unwrap();
        let nondet = stubs.find("int __VERIFIER_nondet_int(void) {").unwrap();
        assert!(abort < nondet);
    }

    #[test]
    fn replace_map_renames_libc_hooks() {
        assert_eq!(rename_calls("abort();"), "c2bc_abort();");
        assert_eq!(rename_calls("if (x) exit (1);"), "if (x) c2bc_exit (1);");
        assert_eq!(rename_calls("assert(a < b);"), "c2bc_assert(a < b);");
        assert_eq!(rename_calls("__assert_fail(p, q, 1, r);"), "c2bc_assert_fail(p, q, 1, r);");
        assert_eq!(rename_calls("c2bc_assert_fail(p);"), "c2bc_assert_fail(p);");
        assert_eq!(rename_calls("fun(a, b);"), "fun(a, b);");
    }

    #[test]
    fn closure_is_cycle_safe_and_dependencies_first() {
        let mut library = StubLibrary::new();
        library.insert(Stub::new("a", "extern void a(void);", String::new(), &["b"]));
        library.insert(Stub::new("b", "extern void b(void);", String::new(), &["c"]));
        library.insert(Stub::new("c", "extern void c(void);", String::new(), &["a"]));
        let names: Vec<_> = library
            .closure(["a"])
            .unwrap()
            .iter()
            .map(|stub| stub.name.as_str())
            .collect();
        assert_eq!(names, ["c", "b", "a"]);
        assert!(library.closure(["missing"]).is_err());
    }

    #[test]
    fn custom_steps_reach_the_stubs() {
        let options = GeneratorOptions {
            steps: StepValues { direct: 5, cut: 11 },
            nondet_capacity: 8,
            forms: vec![Form::Shimmed],
        };
        let artifacts = generate(&builtin("zero-input"), &options).unwrap();
        assert_eq!(artifacts.len(), 2);
        let stubs = &artifacts[1].contents;
        assert!(stubs.contains("_stub_abort_counter += 5;"));
        assert!(stubs.contains("_main_hook += 11;"));
        assert!(stubs.contains("#define _STUB_INT_ARRAY_SIZE 8"));
    }

    #[test]
    fn artifacts_carry_content_hashes() {
        let artifacts = generate(&builtin("ineq-a-ge-b"), &GeneratorOptions::default()).unwrap();
        let names: Vec<_> = artifacts.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(
            names,
            ["ineq-a-ge-b/example.c", "ineq-a-ge-b/example.shim.c", "ineq-a-ge-b/example.stubs.c"]
        );
        for artifact in &artifacts {
            assert_eq!(artifact.sha256, hex::encode(Sha256::digest(artifact.contents.as_bytes())));
        }
    }

    #[test]
    fn ct_artifact_carries_both_label_styles() {
        let artifact = generate_ct(&TableLookupLeak);
        assert_eq!(artifact.file_name, "ct-multi-leak/candidate.c");
        assert!(artifact.contents.contains("harness:expect ct-insecure"));
        assert!(artifact.contents.contains("Expected CHECKCT result: insecure"));
        assert!(artifact.contents.contains("volatile uint8_t lut[16]"));
    }
}
