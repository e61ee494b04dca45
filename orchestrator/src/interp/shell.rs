//! `!cmd` shell escapes.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::context::{read_lock, OutputSink, RunContext, SharedEnv, Stream};
use super::error::{EvalError, EvalResult};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn pump<R>(source: R, sink: OutputSink, stream: Stream) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => sink.write(stream, &String::from_utf8_lossy(&line)),
            }
        }
    })
}

/// Run `command` with `sh -c` in the session directory. A non-zero exit is
/// reported on stderr and is not an error.
pub fn run_shell(command: &str, env: &SharedEnv, ctx: &RunContext) -> EvalResult<()> {
    let (cwd, vars) = {
        let env = read_lock(env);
        (env.cwd.clone(), env.vars.clone())
    };
    debug!(command, cwd = %cwd.display(), "spawning shell escape");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&cwd)
        .envs(&vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EvalError::os_error(&e, "sh"))?;

    let mut pumps = Vec::new();
    if let Some(out) = child.stdout.take() {
        pumps.push(pump(out, ctx.output.clone(), Stream::Stdout));
    }
    if let Some(err) = child.stderr.take() {
        pumps.push(pump(err, ctx.output.clone(), Stream::Stderr));
    }

    let status = loop {
        if ctx.is_cancelled() {
            // Grandchildren may still hold the pipes; the pumps are left detached
            let _ = child.kill();
            let _ = child.wait();
            return Err(EvalError::Interrupted);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(EvalError::os_error(&e, "sh")),
        }
    };
    for handle in pumps {
        let _ = handle.join();
    }

    if !status.success() {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        ctx.stderr(&format!("[command exited with status {}]\n", code));
    }
    Ok(())
}
