//! シェル自身の致命的エラー。
//!
//! ユーザ入力やコマンド起動の失敗は各モジュールのエラー型で 1 行報告して続行する。
//! ここに来るのはシェルの初期化（`sigaction`, `dup2`）や端末入出力の失敗だけで、
//! `main` が表示して終了ステータス 1 で終わる。

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    /// システムコールの失敗。`call` は表示用の呼び出し名。
    #[error("{call} error: {source}")]
    Sys {
        call: &'static str,
        #[source]
        source: io::Error,
    },
    /// 入力の読み取りやプロンプトの書き出しの失敗。
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ShellError {
    /// 直前の errno から [`ShellError::Sys`] を作る。
    pub fn last_os_error(call: &'static str) -> Self {
        ShellError::Sys {
            call,
            source: io::Error::last_os_error(),
        }
    }
}
