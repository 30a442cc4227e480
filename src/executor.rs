//! コマンド実行: ビルトイン判定、リダイレクト適用、子プロセス起動、ジョブ登録。
//!
//! - [`eval`]: 1 行を解析し、ビルトインならその場で実行、それ以外は [`launch`] で起動
//! - 起動から登録までは中継シグナルをブロックしたまま行う。ブロックしないと、
//!   すぐ終了した子を SIGCHLD ハンドラが登録前に回収してしまい、
//!   消えたはずのジョブがテーブルに残る
//! - foreground: [`job::wait_fg`] で Foreground でなくなるまで待機
//! - background: `[jid] (pid) cmdline` を表示して即座に返る

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;

use thiserror::Error;
use tracing::{debug, warn};

use crate::builtins;
use crate::job::{self, JobState};
use crate::parser::{self, ParsedLine, Redirect, RedirectKind};
use crate::shell::Shell;
use crate::spawn::{self, Stdio};

/// 1 行を評価する。
///
/// ユーザ入力・起動の失敗は 1 行報告して戻る。シェルを止めることはない。
pub fn eval(shell: &mut Shell, cmdline: &str) {
    let parsed = match parser::parse(cmdline) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return,
        Err(e) => {
            println!("tsh: {}", e);
            return;
        }
    };

    let mut stdout = io::stdout();
    match builtins::try_exec(shell, &parsed.args, &mut stdout) {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => {
            warn!(error = %e, "failed to write builtin output");
            return;
        }
    }

    launch(shell, &parsed, cmdline.trim());
}

// ── リダイレクト ───────────────────────────────────────────────────

/// リダイレクト先ファイルを開けなかった。
#[derive(Debug, Error)]
#[error("{target}: {source}")]
pub struct RedirectError {
    target: String,
    #[source]
    source: io::Error,
}

/// 子プロセスに渡すために開いたファイル。
///
/// 起動後にこの値を Drop すると親側の fd が閉じる。同じストリームへの
/// 複数指定は最後のものが有効（先に開いたファイルはその時点で閉じる）。
#[derive(Default)]
struct Redirections {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl Redirections {
    fn open(redirects: &[Redirect<'_>]) -> Result<Self, RedirectError> {
        let mut files = Redirections::default();
        for r in redirects {
            let opened = match r.kind {
                RedirectKind::Input => File::open(r.target),
                RedirectKind::Output | RedirectKind::Stderr => File::create(r.target),
                RedirectKind::Append => OpenOptions::new().create(true).append(true).open(r.target),
            };
            let file = opened.map_err(|source| RedirectError {
                target: r.target.to_string(),
                source,
            })?;
            match r.kind {
                RedirectKind::Input => files.stdin = Some(file),
                RedirectKind::Output | RedirectKind::Append => files.stdout = Some(file),
                RedirectKind::Stderr => files.stderr = Some(file),
            }
        }
        Ok(files)
    }

    fn stdio(&self) -> Stdio {
        Stdio {
            stdin: self.stdin.as_ref().map(|f| f.as_raw_fd()),
            stdout: self.stdout.as_ref().map(|f| f.as_raw_fd()),
            stderr: self.stderr.as_ref().map(|f| f.as_raw_fd()),
        }
    }
}

// ── 起動 ────────────────────────────────────────────────────────────

/// 外部コマンドを起動してジョブとして登録する。
///
/// 処理の流れ:
/// 1. リダイレクト先を開く（失敗したら何も起動しない）
/// 2. 中継シグナルをブロック（[`JobsGuard`](crate::signals::JobsGuard) を取得）
/// 3. `posix_spawn` で起動。子はブロック前のマスクで exec する
/// 4. ジョブテーブルに登録
/// 5. background → 表示して返る / foreground → 待機
///
/// テーブルが満杯のときは診断を出し、ジョブは追跡しないまま走らせる。
fn launch(shell: &mut Shell, parsed: &ParsedLine<'_>, cmdline: &str) {
    let redirections = match Redirections::open(&parsed.redirects) {
        Ok(r) => r,
        Err(e) => {
            println!("tsh: {}", e);
            return;
        }
    };

    let state = if parsed.background {
        JobState::Background
    } else {
        JobState::Foreground
    };

    let mut jobs = shell.jobs.enter();

    let pid = match spawn::spawn(&parsed.args, &redirections.stdio(), jobs.child_mask()) {
        Ok(pid) => pid,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };
    // 親側のリダイレクト fd を閉じる
    drop(redirections);

    match jobs.insert(pid, state, cmdline) {
        Ok(jid) => debug!("Added job [{}] {} {}", jid, pid, cmdline),
        Err(e) => {
            println!("{}", e);
            debug!(pid, "job left untracked");
            return;
        }
    }

    if parsed.background {
        if let Some(job) = jobs.find_by_pid(pid) {
            println!("{}", job.launched());
        }
    } else {
        let _ = io::stdout().flush();
        job::wait_fg(&mut jobs, pid);
    }
}
