//! tsh ライブラリ — テスト・ベンチマーク用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の REPL ループ。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`parser`] | トークナイザ（空白区切り、シングルクォート、リダイレクト `<`/`>`/`>>`/`2>`、末尾 `&`） |
//! | [`executor`] | 1 行の評価（ビルトイン判定、リダイレクト、起動、ジョブ登録、foreground 待機） |
//! | [`builtins`] | ビルトイン（`quit`, `jobs`, `fg`, `bg`） |
//! | [`job`] | 固定長ジョブテーブルと foreground 待機 |
//! | [`signals`] | シグナル中継（SIGCHLD/SIGINT/SIGTSTP/SIGQUIT）とシグナルマスクによる排他 |
//! | [`sio`] | シグナルハンドラ内で使える固定長バッファ出力 |
//! | [`spawn`] | `posix_spawn` ラッパー（プロセスグループ、シグナルマスク、fd 付け替え） |
//! | [`shell`] | シェルの実行状態（ジョブテーブル参照、設定、終了フラグ） |
//! | [`config`] | コマンドラインフラグ `-h`/`-v`/`-p` |
//! | [`error`] | 致命的エラー型 |

pub mod builtins;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod parser;
pub mod shell;
pub mod signals;
pub mod sio;
pub mod spawn;
