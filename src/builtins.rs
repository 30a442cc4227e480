//! ビルトインコマンドの実装。
//!
//! ビルトインは子プロセスを作らずシェル内で直接実行される。
//! `try_exec()` が `Ok(true)` を返せばビルトインとして処理済み、
//! `Ok(false)` なら外部コマンドとして executor に委ねる。
//!
//! 出力先は引数の `out`（通常は stdout）。ユーザ入力の誤りは 1 行のメッセージを
//! 出すだけで、ジョブテーブルは変更しない。

use std::io::{self, Write};

use libc::pid_t;
use thiserror::Error;
use tracing::{debug, warn};

use crate::job::{self, JobState, JobTable};
use crate::shell::Shell;

/// ビルトインコマンドの実行を試みる。
///
/// 戻り値:
/// - `Ok(true)` — ビルトインとして実行済み
/// - `Ok(false)` — 該当するビルトインなし（外部コマンドとして実行すべき）
pub fn try_exec(shell: &mut Shell, args: &[&str], out: &mut dyn Write) -> io::Result<bool> {
    match args[0] {
        "quit" => {
            shell.should_exit = true;
            Ok(true)
        }
        "jobs" => {
            builtin_jobs(shell, out)?;
            Ok(true)
        }
        "fg" | "bg" => {
            do_bgfg(shell, args, out)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// `jobs` — 全ジョブを `[jid] (pid) State cmdline` 形式で表示する。
fn builtin_jobs(shell: &Shell, out: &mut dyn Write) -> io::Result<()> {
    let jobs = shell.jobs.enter();
    for job in jobs.list() {
        writeln!(out, "{}", job)?;
    }
    Ok(())
}

// ── fg / bg ─────────────────────────────────────────────────────────

/// `fg` / `bg` の引数の誤り。表示はそのまま 1 行のメッセージになる。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BgFgError {
    #[error("{0} command requires PID or %jobid argument")]
    MissingArgument(String),
    /// 引数は `%N` の原文。
    #[error("{0}: No such job")]
    NoSuchJob(String),
    #[error("({0}): No such process")]
    NoSuchProcess(pid_t),
    #[error("{0}: argument must be a PID or %jobid")]
    BadArgument(String),
}

/// `fg` / `bg` の対象を pid に解決する。
///
/// `%N` はジョブ ID、数字で始まる引数は先頭の数字列を pid として扱う。
fn resolve_target(jobs: &JobTable, cmd: &str, arg: Option<&str>) -> Result<pid_t, BgFgError> {
    let arg = arg.ok_or_else(|| BgFgError::MissingArgument(cmd.to_string()))?;

    if let Some(jid) = arg.strip_prefix('%') {
        return jid
            .parse::<usize>()
            .ok()
            .and_then(|jid| jobs.find_by_jid(jid))
            .map(|job| job.pid())
            .ok_or_else(|| BgFgError::NoSuchJob(arg.to_string()));
    }

    if arg.starts_with(|c: char| c.is_ascii_digit()) {
        // 先頭の数字列だけを pid とみなす（`12x` は pid 12）
        let digits = arg
            .find(|c: char| !c.is_ascii_digit())
            .map_or(arg, |end| &arg[..end]);
        let pid = digits
            .parse::<pid_t>()
            .map_err(|_| BgFgError::BadArgument(cmd.to_string()))?;
        return jobs
            .find_by_pid(pid)
            .map(|job| job.pid())
            .ok_or(BgFgError::NoSuchProcess(pid));
    }

    Err(BgFgError::BadArgument(cmd.to_string()))
}

/// `fg <pid|%jid>` / `bg <pid|%jid>` — 停止中またはバックグラウンドのジョブを再開する。
///
/// プロセスグループ全体に SIGCONT を送り、
/// - `fg`: Foreground にして、Foreground でなくなるまで待つ
/// - `bg`: Background にして、起動時と同じ `[jid] (pid) cmdline` を表示する
fn do_bgfg(shell: &Shell, args: &[&str], out: &mut dyn Write) -> io::Result<()> {
    let cmd = args[0];
    let mut jobs = shell.jobs.enter();

    let pid = match resolve_target(&jobs, cmd, args.get(1).copied()) {
        Ok(pid) => pid,
        Err(e) => return writeln!(out, "{}", e),
    };

    unsafe {
        libc::kill(-pid, libc::SIGCONT);
    }

    if cmd == "fg" {
        if !jobs.set_state(pid, JobState::Foreground) {
            warn!(pid, "fg: another job already holds the foreground");
            return Ok(());
        }
        debug!(pid, "fg: waiting for job");
        out.flush()?;
        job::wait_fg(&mut jobs, pid);
    } else {
        jobs.set_state(pid, JobState::Background);
        if let Some(job) = jobs.find_by_pid(pid) {
            writeln!(out, "{}", job.launched())?;
        }
    }
    Ok(())
}
