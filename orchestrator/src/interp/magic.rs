//! `%` line magics and `%%` cell magics.

use std::time::{Duration, Instant};

use serde_json::Value as Json;

use super::bridge::{Binding, ValueKind};
use super::context::{read_lock, write_lock, RunContext};
use super::error::{EvalError, EvalResult};
use super::shell::run_shell;
use super::Interpreter;

const LINE_MAGICS: &[&str] = &[
    "cd", "env", "lsmagic", "pwd", "reset", "time", "timeit", "who", "whos",
];
const CELL_MAGICS: &[&str] = &["bash", "time"];

/// Target wall time of one `%timeit` run when the loop count is automatic
const TIMEIT_TARGET: Duration = Duration::from_millis(200);
const TIMEIT_MAX_LOOPS: u64 = 1_000_000;
const TIMEIT_DEFAULT_RUNS: u64 = 7;

fn split_magic(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    }
}

/// Run `%name args`; `line` excludes the leading `%`
pub fn run_line_magic(
    interp: &mut Interpreter,
    line: &str,
    ctx: &RunContext,
) -> EvalResult<Option<String>> {
    let (name, rest) = split_magic(line);
    match name {
        "who" => who(interp, ctx),
        "whos" => whos(interp, ctx),
        "pwd" => {
            let cwd = read_lock(interp.env()).cwd.display().to_string();
            interp.show(Json::String(cwd))
        }
        "cd" => cd(interp, rest, ctx),
        "env" => env(interp, rest, ctx),
        "reset" => reset(interp, rest, ctx),
        "lsmagic" => {
            ctx.stdout(&lsmagic());
            Ok(None)
        }
        "time" => {
            if rest.is_empty() {
                return Err(EvalError::usage("%time requires a statement"));
            }
            timed(interp, rest, ctx)
        }
        "timeit" => timeit(interp, rest, ctx),
        other => Err(EvalError::usage(format!(
            "Line magic function `%{}` not found.",
            other
        ))),
    }
}

/// Run a `%%name` cell; `cell` includes the magic line
pub fn run_cell_magic(
    interp: &mut Interpreter,
    cell: &str,
    ctx: &RunContext,
) -> EvalResult<Option<String>> {
    let cell = cell.trim_start();
    let (first, body) = cell.split_once('\n').unwrap_or((cell, ""));
    let (name, _) = split_magic(first.trim_start_matches('%'));
    match name {
        "time" => timed(interp, body, ctx),
        "bash" => {
            run_shell(body, interp.env(), ctx)?;
            Ok(None)
        }
        other => Err(EvalError::usage(format!(
            "Cell magic `%%{}` not found.",
            other
        ))),
    }
}

fn lsmagic() -> String {
    let line: Vec<String> = LINE_MAGICS.iter().map(|m| format!("%{}", m)).collect();
    let cell: Vec<String> = CELL_MAGICS.iter().map(|m| format!("%%{}", m)).collect();
    format!(
        "Available line magics:\n{}\n\nAvailable cell magics:\n{}\n",
        line.join("  "),
        cell.join("  ")
    )
}

/// Variables a user created, as opposed to modules and native functions
fn user_variables(interp: &Interpreter) -> EvalResult<Vec<Binding>> {
    Ok(interp
        .bindings()?
        .into_iter()
        .filter(|b| !b.imported)
        .collect())
}

fn who(interp: &Interpreter, ctx: &RunContext) -> EvalResult<Option<String>> {
    let vars = user_variables(interp)?;
    if vars.is_empty() {
        ctx.stdout("Interactive namespace is empty.\n");
    } else {
        let names: Vec<&str> = vars.iter().map(|b| b.name.as_str()).collect();
        ctx.stdout(&format!("{}\n", names.join("\t")));
    }
    Ok(None)
}

fn short_info(interp: &Interpreter, binding: &Binding) -> EvalResult<String> {
    let info = match (binding.kind, binding.shape.as_deref(), &binding.column) {
        (ValueKind::Table, Some([rows, cols]), _) => format!("{} rows x {} cols", rows, cols),
        (ValueKind::Column, _, Some((_, dtype))) => {
            format!("{} values, dtype {}", binding.length.unwrap_or(0), dtype)
        }
        (ValueKind::Collection, _, _) => format!("n={}", binding.length.unwrap_or(0)),
        _ => {
            let text = interp.preview(&binding.name)?;
            let text = text.lines().next().unwrap_or_default().to_string();
            match text.char_indices().nth(50) {
                Some((cut, _)) => format!("{}...", &text[..cut]),
                None => text,
            }
        }
    };
    Ok(info)
}

fn whos(interp: &Interpreter, ctx: &RunContext) -> EvalResult<Option<String>> {
    let vars = user_variables(interp)?;
    if vars.is_empty() {
        ctx.stdout("Interactive namespace is empty.\n");
        return Ok(None);
    }
    let mut rows: Vec<(&str, &str, String)> = Vec::with_capacity(vars.len());
    for binding in &vars {
        rows.push((
            binding.name.as_str(),
            binding.type_name.as_str(),
            short_info(interp, binding)?,
        ));
    }
    let name_w = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max(8) + 3;
    let type_w = rows.iter().map(|r| r.1.len()).max().unwrap_or(0).max(4) + 3;
    let mut out = format!(
        "{:<name_w$}{:<type_w$}Data/Info\n",
        "Variable",
        "Type",
        name_w = name_w,
        type_w = type_w
    );
    out.push_str(&"-".repeat(name_w + type_w + 9));
    out.push('\n');
    for (name, type_name, info) in rows {
        out.push_str(&format!(
            "{:<name_w$}{:<type_w$}{}\n",
            name,
            type_name,
            info,
            name_w = name_w,
            type_w = type_w
        ));
    }
    ctx.stdout(&out);
    Ok(None)
}

fn cd(interp: &Interpreter, rest: &str, ctx: &RunContext) -> EvalResult<Option<String>> {
    let mut env = write_lock(interp.env());
    let raw = if rest.is_empty() { "~" } else { rest };
    let raw = raw.trim_matches(|c| c == '"' || c == '\'');
    let target = env.resolve(raw);
    let cwd = env
        .change_dir(&target)
        .map_err(|e| EvalError::os_error(&e, raw))?;
    ctx.stdout(&format!("{}\n", cwd.display()));
    Ok(None)
}

fn env(interp: &mut Interpreter, rest: &str, ctx: &RunContext) -> EvalResult<Option<String>> {
    if rest.is_empty() {
        let vars = read_lock(interp.env()).all_vars();
        let map = vars.into_iter().map(|(k, v)| (k, Json::String(v))).collect();
        return interp.show(Json::Object(map));
    }
    let assignment = rest
        .split_once('=')
        .or_else(|| rest.split_once(char::is_whitespace));
    match assignment {
        Some((name, value)) => {
            let (name, value) = (name.trim(), value.trim());
            write_lock(interp.env())
                .vars
                .insert(name.to_string(), value.to_string());
            ctx.stdout(&format!("env: {}={}\n", name, value));
            Ok(None)
        }
        None => {
            let value = read_lock(interp.env()).var(rest).ok_or_else(|| {
                EvalError::usage(format!("Environment does not have key: {}", rest))
            })?;
            interp.show(Json::String(value))
        }
    }
}

fn reset(interp: &Interpreter, rest: &str, ctx: &RunContext) -> EvalResult<Option<String>> {
    let force = rest.split_whitespace().any(|flag| flag == "-f");
    if !force {
        ctx.stdout("Once deleted, variables cannot be recovered. Proceeding without confirmation.\n");
    }
    interp.reset()?;
    Ok(None)
}

fn format_duration(secs: f64) -> String {
    if secs >= 1.0 {
        format!("{:.2} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.2} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.2} µs", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

fn timed(interp: &mut Interpreter, code: &str, ctx: &RunContext) -> EvalResult<Option<String>> {
    let start = Instant::now();
    let result = interp.run_code(code, ctx);
    ctx.stdout(&format!(
        "Wall time: {}\n",
        format_duration(start.elapsed().as_secs_f64())
    ));
    result
}

struct TimeitArgs<'a> {
    loops: Option<u64>,
    runs: u64,
    code: &'a str,
}

fn parse_timeit(rest: &str) -> EvalResult<TimeitArgs<'_>> {
    let mut args = TimeitArgs {
        loops: None,
        runs: TIMEIT_DEFAULT_RUNS,
        code: rest,
    };
    let mut remaining = rest.trim_start();
    loop {
        let Some(flag) = remaining.strip_prefix('-').and_then(|r| r.chars().next()) else {
            break;
        };
        if flag != 'n' && flag != 'r' {
            break;
        }
        let after = remaining[2..].trim_start();
        let (number, tail) = after.split_once(char::is_whitespace).unwrap_or((after, ""));
        let n: u64 = number
            .parse()
            .map_err(|_| EvalError::usage(format!("%timeit -{} expects a number", flag)))?;
        if n == 0 {
            return Err(EvalError::usage(format!("%timeit -{} must be positive", flag)));
        }
        if flag == 'n' {
            args.loops = Some(n);
        } else {
            args.runs = n;
        }
        remaining = tail.trim_start();
    }
    args.code = remaining;
    if args.code.is_empty() {
        return Err(EvalError::usage("%timeit requires a statement"));
    }
    Ok(args)
}

fn time_loops(
    interp: &mut Interpreter,
    code: &str,
    loops: u64,
    ctx: &RunContext,
) -> EvalResult<Duration> {
    ctx.check()?;
    interp.time_loops(code, loops)
}

fn timeit(interp: &mut Interpreter, rest: &str, ctx: &RunContext) -> EvalResult<Option<String>> {
    let args = parse_timeit(rest)?;
    let loops = match args.loops {
        Some(n) => n,
        None => {
            let mut n = 1;
            loop {
                let elapsed = time_loops(interp, args.code, n, ctx)?;
                if elapsed >= TIMEIT_TARGET || n >= TIMEIT_MAX_LOOPS {
                    break n;
                }
                n *= 10;
            }
        }
    };

    let mut per_loop = Vec::with_capacity(args.runs as usize);
    for _ in 0..args.runs {
        let elapsed = time_loops(interp, args.code, loops, ctx)?;
        per_loop.push(elapsed.as_secs_f64() / loops as f64);
    }
    let mean = per_loop.iter().sum::<f64>() / per_loop.len() as f64;
    let std = if per_loop.len() > 1 {
        (per_loop.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / per_loop.len() as f64).sqrt()
    } else {
        0.0
    };
    ctx.stdout(&format!(
        "{} ± {} per loop (mean ± std. dev. of {} run{}, {} loop{} each)\n",
        format_duration(mean),
        format_duration(std),
        args.runs,
        if args.runs == 1 { "" } else { "s" },
        loops,
        if loops == 1 { "" } else { "s" },
    ));
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_magic() {
        assert_eq!(split_magic("cd  /tmp "), ("cd", "/tmp"));
        assert_eq!(split_magic("who"), ("who", ""));
    }

    #[test]
    fn test_parse_timeit_flags() {
        let args = parse_timeit("-n 10 -r 2 x + 1").unwrap();
        assert_eq!((args.loops, args.runs, args.code), (Some(10), 2, "x + 1"));
        let args = parse_timeit("sum(range(5))").unwrap();
        assert_eq!((args.loops, args.runs), (None, TIMEIT_DEFAULT_RUNS));
        assert!(parse_timeit("-n x 1").is_err());
        assert!(parse_timeit("").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(2.5), "2.50 s");
        assert_eq!(format_duration(0.0125), "12.50 ms");
        assert_eq!(format_duration(0.000_003), "3.00 µs");
    }

    #[test]
    fn test_lsmagic_lists_everything() {
        let listing = lsmagic();
        assert!(listing.contains("%timeit"));
        assert!(listing.contains("%%bash"));
    }
}
