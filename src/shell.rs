//! シェルの実行状態。REPL ループ全体で共有される。
//!
//! ジョブテーブルは [`SharedJobs`] への参照として持ち、シグナル中継
//! （[`signals::install`](crate::signals::install)）にも同じテーブルが登録される。

use crate::config::Config;
use crate::signals::SharedJobs;

/// コマンドプロンプト。
pub const PROMPT: &str = "tsh> ";

pub struct Shell {
    /// ジョブテーブル。シグナルハンドラと共有するので [`SharedJobs::enter`] 経由で触る。
    pub jobs: &'static SharedJobs,
    /// 起動フラグ。
    pub config: Config,
    /// `quit` ビルトインで true にセットされ、REPL ループを終了させる。
    pub should_exit: bool,
}

impl Shell {
    pub fn new(jobs: &'static SharedJobs, config: Config) -> Self {
        Self {
            jobs,
            config,
            should_exit: false,
        }
    }
}
