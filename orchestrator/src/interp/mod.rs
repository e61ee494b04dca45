//! The session interpreter: an embedded RustPython VM.
//!
//! Each [`Interpreter`] owns one VM with two scopes. The user scope is the
//! session namespace; the runtime scope holds `python/runtime.py`, which
//! installs the `frame` and `stats` modules, redirects `sys.stdout`/`sys.stderr`
//! into the current job's [`OutputSink`] and runs cells under a trace hook
//! that observes the cancel flag. Cells that start with `%` or `!` are routed
//! to [`magic`] and [`shell`] instead.
//!
//! The VM is not `Send`: an interpreter is built and used on exactly one
//! kernel worker thread. Inspectors reach the namespace through worker jobs.

mod bridge;
pub mod context;
pub mod error;
mod magic;
mod shell;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustpython_vm as vm;
use rustpython_vm::builtins::PyBaseException;
use rustpython_vm::function::IntoFuncArgs;
use rustpython_vm::scope::Scope;
use rustpython_vm::{AsObject, InterpreterBuilder, PyObjectRef, PyRef, PyResult, VirtualMachine};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ingest::{self, IngestError, LoadOptions, SourceFormat, DEFAULT_ENCODINGS};
use crate::table::{render_column, render_table, stats, Table};

pub use bridge::{table_from_payload, table_payload, Binding, Classification, ValueKind};
pub use context::{Captured, OutputSink, RunContext, SharedEnv, ShellEnv};
pub use error::{EvalError, EvalResult};

use bridge::Reply;
use context::{read_lock, Stream};

const RUNTIME_SOURCE: &str = include_str!("python/runtime.py");
const FRAME_SOURCE: &str = include_str!("python/frame.py");
const STATS_SOURCE: &str = include_str!("python/stats.py");

/// Largest allocation a single `*` repetition of a str, bytes, list or tuple may request
pub const MAX_REPEAT_BYTES: u64 = 1 << 30;

/// Settings the interpreter reads from the service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpSettings {
    /// Encoding priority for `frame.read_csv(..., encoding="auto")`
    pub encodings: Vec<String>,
}

impl Default for InterpSettings {
    fn default() -> Self {
        Self {
            encodings: DEFAULT_ENCODINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// How a submitted cell is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellMode {
    Code,
    Magic,
    Shell,
}

impl CellMode {
    /// Classify by the first non-blank character
    pub fn classify(text: &str) -> Self {
        match text.trim_start().chars().next() {
            Some('!') => CellMode::Shell,
            Some('%') => CellMode::Magic,
            _ => CellMode::Code,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CellMode::Code => "code",
            CellMode::Magic => "magic",
            CellMode::Shell => "shell",
        }
    }
}

/// Strip the first line's indentation from every line
fn dedent(code: &str) -> String {
    let Some(first) = code.lines().find(|l| !l.trim().is_empty()) else {
        return String::new();
    };
    let indent = &first[..first.len() - first.trim_start().len()];
    if indent.is_empty() {
        return code.to_string();
    }
    code.lines()
        .map(|line| line.strip_prefix(indent).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Bytes requested by repeating `length` items of `item_size` bytes `count` times
pub fn repeat_bytes(length: u64, count: u64, item_size: u64) -> Option<u64> {
    length.checked_mul(item_size)?.checked_mul(count)
}

fn lock_hooks(hooks: &Mutex<RunContext>) -> std::sync::MutexGuard<'_, RunContext> {
    hooks.lock().unwrap_or_else(PoisonError::into_inner)
}

fn exception_error(vm: &VirtualMachine, exc: &PyRef<PyBaseException>) -> EvalError {
    let kind = exc.as_object().class().name().to_string();
    let message = exc
        .as_object()
        .str(vm)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    EvalError::raise(kind, message)
}

fn init_stdlib(builder: InterpreterBuilder) -> InterpreterBuilder {
    let defs = rustpython_stdlib::stdlib_module_defs(&builder.ctx);
    builder
        .add_native_modules(&defs)
        .add_frozen_modules(rustpython_pylib::FROZEN_STDLIB)
        .init_hook(set_frozen_stdlib_dir)
}

fn set_frozen_stdlib_dir(vm: &mut VirtualMachine) {
    use rustpython_vm::common::rc::PyRc;

    if let Some(state) = PyRc::get_mut(&mut vm.state) {
        state.config.paths.stdlib_dir = Some(rustpython_pylib::LIB_PATH.to_owned());
    }
}

fn read_error(vm: &VirtualMachine, err: IngestError, path: &str) -> PyRef<PyBaseException> {
    match err {
        IngestError::NotFound(_) => vm.new_exception_msg(
            vm.ctx.exceptions.file_not_found_error.to_owned(),
            format!("[Errno 2] No such file or directory: '{}'", path).into(),
        ),
        other => vm.new_value_error(other.to_string()),
    }
}

/// Native helpers the runtime scope is seeded with before `runtime.py` runs
fn install_natives(
    vm: &VirtualMachine,
    scope: &Scope,
    hooks: &Arc<Mutex<RunContext>>,
    env: &SharedEnv,
    settings: &InterpSettings,
) -> PyResult<()> {
    let globals = &scope.globals;

    let emit_hooks = hooks.clone();
    let emit = vm.new_function("_emit", move |stream: String, text: String| {
        lock_hooks(&emit_hooks)
            .output
            .write(Stream::from_name(&stream), &text);
    });
    globals.set_item("_emit", emit.into(), vm)?;

    let cancel_hooks = hooks.clone();
    let cancelled = vm.new_function("_cancelled", move || -> bool {
        lock_hooks(&cancel_hooks).is_cancelled()
    });
    globals.set_item("_cancelled", cancelled.into(), vm)?;

    let check_repeat = vm.new_function(
        "_check_repeat",
        |length: u64, count: u64, item_size: u64, vm: &VirtualMachine| -> PyResult<()> {
            match repeat_bytes(length, count, item_size) {
                Some(bytes) if bytes <= MAX_REPEAT_BYTES => Ok(()),
                _ => Err(vm.new_memory_error(format!(
                    "repeating a sequence of length {} {} times exceeds the {} byte limit",
                    length, count, MAX_REPEAT_BYTES
                ))),
            }
        },
    );
    globals.set_item("_check_repeat", check_repeat.into(), vm)?;

    let resolve_env = env.clone();
    let resolve = vm.new_function("_resolve_path", move |path: String| -> String {
        read_lock(&resolve_env)
            .resolve(&path)
            .to_string_lossy()
            .into_owned()
    });
    globals.set_item("_resolve_path", resolve.into(), vm)?;

    let cwd_env = env.clone();
    let cwd = vm.new_function("_cwd", move || -> String {
        read_lock(&cwd_env).cwd.to_string_lossy().into_owned()
    });
    globals.set_item("_cwd", cwd.into(), vm)?;

    let render = vm.new_function(
        "_render_table",
        |payload: String, max_rows: usize, vm: &VirtualMachine| -> PyResult<String> {
            table_from_payload(&payload)
                .map(|table| render_table(&table, max_rows))
                .map_err(|e| vm.new_value_error(e))
        },
    );
    globals.set_item("_render_table", render.into(), vm)?;

    let render_col = vm.new_function(
        "_render_column",
        |payload: String, max_rows: usize, vm: &VirtualMachine| -> PyResult<String> {
            let table = table_from_payload(&payload).map_err(|e| vm.new_value_error(e))?;
            table
                .columns()
                .first()
                .map(|column| render_column(column, max_rows))
                .ok_or_else(|| vm.new_value_error("column payload is empty"))
        },
    );
    globals.set_item("_render_column", render_col.into(), vm)?;

    let describe = vm.new_function(
        "_describe_table",
        |payload: String, vm: &VirtualMachine| -> PyResult<String> {
            table_from_payload(&payload)
                .map(|table| table_payload(&stats::describe(&table)))
                .map_err(|e| vm.new_value_error(e))
        },
    );
    globals.set_item("_describe_table", describe.into(), vm)?;

    let read_env = env.clone();
    let encodings = settings.encodings.clone();
    let read = vm.new_function(
        "_read_table",
        move |format: String, path: String, options: String, vm: &VirtualMachine| -> PyResult<String> {
            let format: SourceFormat = format
                .parse()
                .map_err(|e: IngestError| vm.new_value_error(e.to_string()))?;
            let options: LoadOptions = serde_json::from_str(&options)
                .map_err(|e| vm.new_value_error(format!("invalid read options: {}", e)))?;
            let resolved = read_lock(&read_env).resolve(&path);
            ingest::read_table(&resolved, format, &options, &encodings)
                .map(|parsed| table_payload(&parsed.table))
                .map_err(|e| read_error(vm, e, &path))
        },
    );
    globals.set_item("_read_table", read.into(), vm)?;

    globals.set_item("_frame_source", vm.ctx.new_str(FRAME_SOURCE).into(), vm)?;
    globals.set_item("_stats_source", vm.ctx.new_str(STATS_SOURCE).into(), vm)?;
    Ok(())
}

pub struct Interpreter {
    vm: vm::Interpreter,
    user: Scope,
    runtime: Scope,
    hooks: Arc<Mutex<RunContext>>,
    env: SharedEnv,
}

impl Interpreter {
    pub fn new(env: SharedEnv, settings: InterpSettings) -> EvalResult<Self> {
        let interpreter = init_stdlib(InterpreterBuilder::new()).interpreter();
        let hooks = Arc::new(Mutex::new(RunContext::idle()));
        let (user, runtime) = interpreter.enter(|vm| {
            let setup = || -> PyResult<(Scope, Scope)> {
                let user = vm.new_scope_with_builtins();
                user.globals
                    .set_item("__name__", vm.ctx.new_str("__main__").into(), vm)?;
                let runtime = vm.new_scope_with_builtins();
                install_natives(vm, &runtime, &hooks, &env, &settings)?;
                vm.run_string(runtime.clone(), RUNTIME_SOURCE, "runtime.py".to_owned())?;
                Ok((user, runtime))
            };
            setup().map_err(|exc| exception_error(vm, &exc))
        })?;
        Ok(Self {
            vm: interpreter,
            user,
            runtime,
            hooks,
            env,
        })
    }

    pub fn env(&self) -> &SharedEnv {
        &self.env
    }

    /// Call a runtime entry point; `None` when it returned `None`
    fn call_runtime(&self, name: &str, args: impl IntoFuncArgs) -> EvalResult<Option<String>> {
        self.vm.enter(|vm| {
            let result = self
                .runtime
                .globals
                .get_item(name, vm)
                .and_then(|func| func.call(args, vm))
                .and_then(|out: PyObjectRef| {
                    if vm.is_none(&out) {
                        Ok(None)
                    } else {
                        out.try_to_value::<String>(vm).map(Some)
                    }
                });
            result.map_err(|exc| exception_error(vm, &exc))
        })
    }

    /// Call an entry point that answers with a JSON [`Reply`]
    fn call_reply(&self, name: &str, args: impl IntoFuncArgs) -> EvalResult<Reply> {
        let raw = self
            .call_runtime(name, args)?
            .ok_or_else(|| EvalError::system(format!("{} returned nothing", name)))?;
        let reply: Reply = serde_json::from_str(&raw)
            .map_err(|e| EvalError::system(format!("malformed reply from {}: {}", name, e)))?;
        if reply.ok {
            return Ok(reply);
        }
        let kind = reply.kind.unwrap_or_else(|| "Exception".to_string());
        if kind == "KeyboardInterrupt" && lock_hooks(&self.hooks).is_cancelled() {
            return Err(EvalError::Interrupted);
        }
        Err(EvalError::raise(kind, reply.message.unwrap_or_default()))
    }

    fn globals(&self) -> PyObjectRef {
        self.user.globals.clone().into()
    }

    /// Bind module `name` under its own name
    pub fn import_module(&self, name: &str) -> Result<(), String> {
        self.call_reply("import_module", (name.to_string(), self.globals()))
            .map(|_| ())
            .map_err(|e| match e {
                EvalError::Raised { message, .. } if !message.is_empty() => message,
                other => other.to_string(),
            })
    }

    /// Run one cell. Returns the repr of its final value, if any.
    pub fn run_cell(&mut self, code: &str, ctx: &RunContext) -> EvalResult<Option<String>> {
        ctx.check()?;
        let code = dedent(code);
        *lock_hooks(&self.hooks) = ctx.clone();
        let result = match CellMode::classify(&code) {
            CellMode::Code => self.run_code(&code, ctx),
            _ if code.trim_start().starts_with("%%") => magic::run_cell_magic(self, &code, ctx),
            _ => self.run_lines(&code, ctx),
        };
        *lock_hooks(&self.hooks) = RunContext::idle();
        result
    }

    /// Execute Python source in the session namespace
    pub(crate) fn run_code(&mut self, code: &str, _ctx: &RunContext) -> EvalResult<Option<String>> {
        let reply = self.call_reply("run_cell", (code.to_string(), self.globals()))?;
        Ok(reply.result)
    }

    /// Run `code` `loops` times without recompiling; wall time of the loop
    pub(crate) fn time_loops(&mut self, code: &str, loops: u64) -> EvalResult<Duration> {
        let reply = self.call_reply("time_loops", (code.to_string(), self.globals(), loops))?;
        Ok(Duration::from_secs_f64(reply.elapsed.unwrap_or(0.0).max(0.0)))
    }

    /// Bind a host value to `_` and return its repr
    pub(crate) fn show(&mut self, value: Json) -> EvalResult<Option<String>> {
        Ok(self.call_reply("show", (value.to_string(), self.globals()))?.result)
    }

    /// Magic and shell lines one at a time; runs of other lines as code
    fn run_lines(&mut self, code: &str, ctx: &RunContext) -> EvalResult<Option<String>> {
        let mut last = None;
        let mut pending: Vec<&str> = Vec::new();
        for line in code.lines() {
            let trimmed = line.trim_start();
            if !(trimmed.starts_with('%') || trimmed.starts_with('!')) {
                pending.push(line);
                continue;
            }
            if !pending.is_empty() {
                last = self.run_code(&pending.join("\n"), ctx)?;
                pending.clear();
            }
            ctx.check()?;
            last = if let Some(magic_line) = trimmed.strip_prefix('%') {
                magic::run_line_magic(self, magic_line, ctx)?
            } else {
                shell::run_shell(&trimmed[1..], &self.env, ctx)?;
                None
            };
        }
        if !pending.is_empty() && pending.iter().any(|l| !l.trim().is_empty()) {
            last = self.run_code(&pending.join("\n"), ctx)?;
        }
        Ok(last)
    }

    /// Every visible binding, ordered by name
    pub fn bindings(&self) -> EvalResult<Vec<Binding>> {
        let raw = self
            .call_runtime("inventory", (self.globals(),))?
            .unwrap_or_else(|| "[]".to_string());
        serde_json::from_str(&raw).map_err(|e| EvalError::system(format!("malformed inventory: {}", e)))
    }

    /// A single visible binding
    pub fn binding(&self, name: &str) -> EvalResult<Option<Binding>> {
        let raw = self
            .call_runtime("inventory", (self.globals(), name.to_string()))?
            .unwrap_or_else(|| "[]".to_string());
        let mut found: Vec<Binding> = serde_json::from_str(&raw)
            .map_err(|e| EvalError::system(format!("malformed inventory: {}", e)))?;
        Ok(found.pop())
    }

    /// Sum of the footprints of every visible binding
    pub fn footprint(&self) -> u64 {
        self.bindings()
            .map(|bindings| bindings.iter().map(|b| b.size_bytes).sum())
            .unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vm
            .enter(|vm| self.user.globals.contains_key(name, vm))
    }

    /// Display text of a binding; a table shows its first five rows
    pub fn preview(&self, name: &str) -> EvalResult<String> {
        Ok(self
            .call_runtime("preview", (self.globals(), name.to_string()))?
            .unwrap_or_default())
    }

    /// Copy of the table bound to `name`; `None` when the value is not a table
    pub fn table(&self, name: &str) -> EvalResult<Option<Table>> {
        match self.call_runtime("export_table", (self.globals(), name.to_string()))? {
            Some(payload) => table_from_payload(&payload).map(Some).map_err(EvalError::system),
            None => Ok(None),
        }
    }

    /// Bind `table` to `name` as a `frame.DataFrame`
    pub fn bind_table(&self, name: &str, table: &Table) -> EvalResult<()> {
        self.call_runtime(
            "bind_table",
            (self.globals(), name.to_string(), table_payload(table)),
        )
        .map(|_| ())
    }

    pub fn remove(&self, names: &[String]) -> EvalResult<()> {
        let names = serde_json::to_string(names).map_err(|e| EvalError::system(e.to_string()))?;
        self.call_runtime("remove", (self.globals(), names)).map(|_| ())
    }

    /// Drop every user binding
    pub fn reset(&self) -> EvalResult<()> {
        self.call_runtime("reset", (self.globals(),)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Cell, Column};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) struct Harness {
        pub interp: Interpreter,
        pub buffer: Arc<Mutex<Captured>>,
        pub cancel: Arc<AtomicBool>,
        workdir: tempfile::TempDir,
    }

    impl Harness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let env = ShellEnv::new(dir.path()).shared();
            Self {
                interp: Interpreter::new(env, InterpSettings::default()).unwrap(),
                buffer: Arc::new(Mutex::new(Captured::default())),
                cancel: Arc::new(AtomicBool::new(false)),
                workdir: dir,
            }
        }

        pub fn dir(&self) -> &std::path::Path {
            self.workdir.path()
        }

        pub fn run(&mut self, code: &str) -> EvalResult<Option<String>> {
            let ctx = RunContext::new(self.cancel.clone(), OutputSink::capturing(self.buffer.clone()));
            self.interp.run_cell(code, &ctx)
        }

        pub fn ok(&mut self, code: &str) -> Option<String> {
            match self.run(code) {
                Ok(v) => v,
                Err(e) => panic!("{:?} failed: {}", code, e),
            }
        }

        pub fn err(&mut self, code: &str) -> String {
            match self.run(code) {
                Ok(v) => panic!("{:?} unexpectedly succeeded with {:?}", code, v),
                Err(e) => e.to_string(),
            }
        }

        pub fn stdout(&self) -> String {
            std::mem::take(&mut self.buffer.lock().unwrap().stdout)
        }

        pub fn stderr(&self) -> String {
            std::mem::take(&mut self.buffer.lock().unwrap().stderr)
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(CellMode::classify("x = 1"), CellMode::Code);
        assert_eq!(CellMode::classify("  %who"), CellMode::Magic);
        assert_eq!(CellMode::classify("%%time\nx"), CellMode::Magic);
        assert_eq!(CellMode::classify("!ls -la"), CellMode::Shell);
    }

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("    x = 1\n    y = 2"), "x = 1\ny = 2");
        assert_eq!(dedent("\n  if x:\n      y"), "\nif x:\n    y");
        assert_eq!(dedent("a\n  b"), "a\n  b");
    }

    #[test]
    fn test_repeat_bytes_is_checked() {
        assert_eq!(repeat_bytes(1, 10, 1), Some(10));
        assert_eq!(repeat_bytes(3, 1 << 62, 8), None);
        assert_eq!(repeat_bytes(0, u64::MAX, 8), Some(0));
    }

    #[test]
    fn test_assignment_then_expression() {
        let mut h = Harness::new();
        assert_eq!(h.ok("x = 41"), None);
        assert_eq!(h.ok("x + 1"), Some("42".to_string()));
        assert_eq!(h.ok("_ * 2"), Some("84".to_string()));
    }

    #[test]
    fn test_functions_classes_and_exceptions() {
        let mut h = Harness::new();
        h.ok("def f(x):\n    return x * 2\n");
        assert_eq!(h.ok("f(21)"), Some("42".to_string()));
        h.ok("try:\n    1 / 0\nexcept ZeroDivisionError as exc:\n    caught = str(exc)\nfinally:\n    done = True");
        assert_eq!(h.ok("caught, done"), Some("('division by zero', True)".to_string()));
        h.ok("class Point:\n    def __init__(self, x):\n        self.x = x\n\n    def double(self):\n        return Point(self.x * 2)\n");
        assert_eq!(h.ok("Point(4).double().x"), Some("8".to_string()));
        assert_eq!(
            h.ok("with open('notes.txt', 'w') as fh:\n    fh.write('kept')\nopen('notes.txt').read()"),
            Some("'kept'".to_string())
        );
        assert!(h.dir().join("notes.txt").exists());
    }

    #[test]
    fn test_statements_before_failure_keep_effects() {
        let mut h = Harness::new();
        let err = h.err("a = 1\nb = missing\nc = 3");
        assert_eq!(err, "NameError: name 'missing' is not defined");
        assert_eq!(h.ok("a"), Some("1".to_string()));
        assert!(h.err("c").starts_with("NameError"));
    }

    #[test]
    fn test_print_and_stderr() {
        let mut h = Harness::new();
        h.ok("import sys\nprint('a', 1, sep='-')\nprint('bad', file=sys.stderr)");
        assert_eq!(h.stdout(), "a-1\n");
        assert_eq!(h.stderr(), "bad\n");
    }

    #[test]
    fn test_control_flow() {
        let mut h = Harness::new();
        h.ok("total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        continue\n    total += i\n");
        assert_eq!(h.ok("total"), Some("25".to_string()));
        h.ok("n = 0\nwhile True:\n    n += 1\n    if n >= 3: break");
        assert_eq!(h.ok("n"), Some("3".to_string()));
    }

    #[test]
    fn test_containers_and_comprehensions() {
        let mut h = Harness::new();
        h.ok("xs = [3, 1, 2]\nxs.append(0)\nxs.sort()");
        assert_eq!(h.ok("xs"), Some("[0, 1, 2, 3]".to_string()));
        h.ok("d = {'a': 1}\nd['b'] = 2");
        assert_eq!(h.ok("d"), Some("{'a': 1, 'b': 2}".to_string()));
        assert_eq!(h.ok("[x * x for x in xs if x > 1]"), Some("[4, 9]".to_string()));
        assert_eq!(
            h.ok("sorted(['bb', 'a', 'ccc'], key=lambda s: len(s), reverse=True)"),
            Some("['ccc', 'bb', 'a']".to_string())
        );
        assert_eq!(h.ok("f'{3.14159:.2f}'"), Some("'3.14'".to_string()));
    }

    #[test]
    fn test_sequence_repeat_is_bounded() {
        let mut h = Harness::new();
        let err = h.err("s = 'x' * 10**13");
        assert!(err.starts_with("MemoryError"), "{}", err);
        assert!(h.err("s").starts_with("NameError"));
        assert!(h.err("xs = [0]\nxs *= 10**12").starts_with("MemoryError"));
        assert!(h.err("10**13 * (1, 2)").starts_with("MemoryError"));
        assert_eq!(h.ok("'ab' * 3"), Some("'ababab'".to_string()));
        assert_eq!(h.ok("2 * [1]"), Some("[1, 1]".to_string()));
        assert_eq!(h.ok("xs"), Some("[0]".to_string()));
        assert_eq!(h.ok("6 * 7"), Some("42".to_string()));
    }

    #[test]
    fn test_range_uses_arbitrary_precision() {
        let mut h = Harness::new();
        assert_eq!(
            h.ok("sum(range(3, 2**70, 2**68))"),
            Some("1770887431076116955148".to_string())
        );
        let err = h.err("len(range(2**64))");
        assert!(err.starts_with("OverflowError"), "{}", err);
        assert_eq!(h.ok("len(range(-2**63, 2**63 - 1, 2**62))"), Some("4".to_string()));
    }

    #[test]
    fn test_tables() {
        let mut h = Harness::new();
        std::fs::write(h.dir().join("data.csv"), "a,b\n1,x\n2,y\n3,z\n").unwrap();
        h.ok("import pandas as pd\ndf = pd.read_csv('data.csv')");
        assert_eq!(h.ok("df.shape"), Some("(3, 2)".to_string()));
        assert_eq!(h.ok("df['a'].sum()"), Some("6".to_string()));
        assert_eq!(h.ok("len(df[df['a'] > 1])"), Some("2".to_string()));
        h.ok("df['c'] = df['a'] * 10");
        assert_eq!(h.ok("df.columns"), Some("['a', 'b', 'c']".to_string()));
        assert_eq!(h.ok("df.c.max()"), Some("30".to_string()));
        let shown = h.ok("df").unwrap();
        assert!(shown.lines().next().unwrap().ends_with("c"), "{}", shown);
        assert_eq!(shown.lines().count(), 4);
        assert!(h.err("pd.read_csv('nope.csv')").starts_with("FileNotFoundError"));
    }

    #[test]
    fn test_stats_module() {
        let mut h = Harness::new();
        h.ok("import stats");
        assert_eq!(h.ok("stats.median([3, 1, 2])"), Some("2".to_string()));
        assert_eq!(h.ok("stats.mean([1, 2, None, 3])"), Some("2.0".to_string()));
        assert!(h.err("stats.mean([])").starts_with("ValueError"));
    }

    #[test]
    fn test_errors_are_python_style() {
        let mut h = Harness::new();
        assert_eq!(h.err("1 / 0"), "ZeroDivisionError: division by zero");
        assert!(h.err("import nothing_here").starts_with("ModuleNotFoundError"));
        assert!(h.err("x = (1,").starts_with("SyntaxError"));
        assert!(h.err("'a' + 1").starts_with("TypeError"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut h = Harness::new();
        h.cancel.store(true, Ordering::SeqCst);
        assert!(matches!(h.run("x = 1"), Err(EvalError::Interrupted)));
    }

    #[test]
    fn test_cancel_interrupts_sleep_and_loops() {
        let mut h = Harness::new();
        let flag = h.cancel.clone();
        let setter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        });
        assert!(matches!(h.run("import time\ntime.sleep(30)"), Err(EvalError::Interrupted)));
        setter.join().unwrap();

        h.cancel.store(false, Ordering::SeqCst);
        let flag = h.cancel.clone();
        let setter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        });
        let looping = "i = 0\nwhile True:\n    i += 1\n    j = i\n";
        assert!(matches!(h.run(looping), Err(EvalError::Interrupted)));
        setter.join().unwrap();
    }

    #[test]
    fn test_mixed_magic_and_shell_lines() {
        let mut h = Harness::new();
        h.ok("%cd .\nx = 5\n!echo hi");
        assert!(h.stdout().contains("hi\n"));
        assert_eq!(h.ok("x"), Some("5".to_string()));
    }

    #[test]
    fn test_import_module() {
        let h = Harness::new();
        assert!(h.interp.import_module("math").is_ok());
        assert_eq!(
            h.interp.import_module("nope").unwrap_err(),
            "No module named 'nope'"
        );
        assert!(h.interp.contains("math"));
    }

    #[test]
    fn test_bindings_describe_the_namespace() {
        let mut h = Harness::new();
        h.interp.import_module("math").unwrap();
        h.ok("import frame\ndf = frame.DataFrame({'a': [1, 2], 'b': ['x', None]})\nn = 3\nname = 'abc'\n_hidden = 1\ndef f():\n    pass");
        let bindings = h.interp.bindings().unwrap();
        let names: Vec<&str> = bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["df", "f", "frame", "math", "n", "name"]);

        let df = h.interp.binding("df").unwrap().unwrap();
        assert_eq!(df.classification(), Classification::Table);
        assert_eq!(df.shape, Some(vec![2, 2]));
        assert_eq!(df.dtypes, Some(vec![("a".into(), "int64".into()), ("b".into(), "object".into())]));
        // 128 + (128 + 16) + (128 + 49 + 1 + 8)
        assert_eq!(df.size_bytes, 458);

        let math = h.interp.binding("math").unwrap().unwrap();
        assert!(math.imported);
        assert_eq!(math.classification(), Classification::Other);
        assert_eq!(h.interp.binding("n").unwrap().unwrap().size_bytes, 28);
        assert_eq!(h.interp.binding("name").unwrap().unwrap().length, Some(3));
        assert!(h.interp.binding("_hidden").unwrap().is_none());
    }

    #[test]
    fn test_table_exchange() {
        let h = Harness::new();
        let table = Table::new(vec![
            Column::new("id", vec![Cell::Int(1), Cell::Int(2)]),
            Column::new("v", vec![Cell::Float(0.5), Cell::Null]),
        ])
        .unwrap();
        h.interp.bind_table("t", &table).unwrap();
        assert_eq!(h.interp.table("t").unwrap(), Some(table.clone()));
        assert_eq!(
            h.interp.binding("t").unwrap().unwrap().size_bytes,
            table.footprint_bytes()
        );
        assert!(h.interp.preview("t").unwrap().contains("id"));

        h.interp.remove(&["t".to_string()]).unwrap();
        assert!(!h.interp.contains("t"));
        assert_eq!(h.interp.table("t").unwrap(), None);
    }

    #[test]
    fn test_magics() {
        let mut h = Harness::new();
        h.interp.import_module("math").unwrap();
        h.ok("b = 2\na = 1");
        h.ok("%who");
        assert_eq!(h.stdout(), "a\tb\n");
        h.ok("%env DATASHELL_MAGIC=on");
        assert_eq!(h.ok("%env DATASHELL_MAGIC"), Some("'on'".to_string()));
        assert_eq!(h.ok("!echo $DATASHELL_MAGIC"), None);
        assert!(h.stdout().ends_with("on\n"));
        assert_eq!(
            h.err("%nope"),
            "UsageError: Line magic function `%nope` not found."
        );
        assert_eq!(h.ok("%%time\nc = 3\nc * 2"), Some("6".to_string()));
        assert!(h.stdout().starts_with("Wall time:"));
        h.ok("%reset -f");
        assert!(h.err("a").starts_with("NameError"));
    }

    #[test]
    fn test_timeit_with_fixed_loops() {
        let mut h = Harness::new();
        h.ok("%timeit -n 3 -r 2 sum(range(10))");
        assert!(h.stdout().contains("(mean ± std. dev. of 2 runs, 3 loops each)"));
    }
}
