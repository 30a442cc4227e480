//! tsh — ジョブ制御付きの小さなシェル
//!
//! REPL ループ: プロンプト表示 → 1 行読み取り → 評価 → ループ
//!
//! 起動時に stderr を stdout に合流させ、シグナルハンドラを登録する。
//! 初期化の失敗は致命的で、メッセージを出して終了ステータス 1 で終わる。

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tsh::config::{Config, ConfigError, USAGE};
use tsh::error::ShellError;
use tsh::executor;
use tsh::shell::{Shell, PROMPT};
use tsh::signals::{self, SharedJobs};

/// ログ初期化。`-v` で debug、なければ warn。`RUST_LOG` があればそちらを優先する。
///
/// 出力はシェル自身の出力と同じストリームに混ざるので時刻と色は付けない。
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .without_time()
                .with_target(false)
                .with_ansi(false)
                .with_writer(io::stderr),
        )
        .with(filter)
        .init();
}

fn run(config: Config) -> Result<(), ShellError> {
    // stderr を stdout に合流させる（ドライバが 1 本のパイプで全出力を受け取れるように）
    if unsafe { libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) } < 0 {
        return Err(ShellError::last_os_error("dup2"));
    }

    init_tracing(config.verbose);

    // テーブルはシェルの生存期間中ずっと使うので 'static にする
    let jobs: &'static SharedJobs = Box::leak(Box::new(SharedJobs::new()));
    signals::install(jobs)?;

    let mut shell = Shell::new(jobs, config);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buf = Vec::new();

    loop {
        if config.emit_prompt {
            print!("{}", PROMPT);
            stdout.flush()?;
        }

        buf.clear();
        if stdin.lock().read_until(b'\n', &mut buf)? == 0 {
            // EOF (Ctrl+D)
            stdout.flush()?;
            return Ok(());
        }

        // UTF-8 でないバイトは U+FFFD に置き換えて評価を続ける
        let line = String::from_utf8_lossy(&buf);
        executor::eval(&mut shell, &line);
        stdout.flush()?;

        if shell.should_exit {
            return Ok(());
        }
    }
}

fn main() -> ExitCode {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            if e != ConfigError::Help {
                println!("tsh: {}", e);
            }
            print!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{}", e);
            ExitCode::FAILURE
        }
    }
}
