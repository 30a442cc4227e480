//! `posix_spawn()` の安全な Rust ラッパー。外部コマンド起動の境界。
//!
//! fork + exec の間に子側で必要な準備（プロセスグループ、シグナルマスク、
//! シグナルのデフォルト化、fd の付け替え）を全て属性とファイルアクションで宣言し、
//! exec の失敗は子が親の制御フローに落ちてくることなくエラーとして返る。
//!
//! ## 構成
//!
//! | 型 | 役割 |
//! |-----|------|
//! | [`SpawnAttr`] | `posix_spawnattr_t` の RAII ラッパー（プロセスグループ、シグナルマスク、シグナル設定） |
//! | [`FileActions`] | `posix_spawn_file_actions_t` の RAII ラッパー（fd 操作） |
//! | [`CStringVec`] | argv 用の NULL 終端ポインタ配列 |
//! | [`spawn`] | 上記を組み合わせて `posix_spawn` を呼ぶ公開関数 |

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;
use tracing::debug;

use crate::signals;

// ── エラー型 ──────────────────────────────────────────────────────

/// `posix_spawn` の失敗。表示はそのままユーザ向けの 1 行になる。
#[derive(Debug, Error)]
pub enum SpawnError {
    /// プログラムを exec できなかった（存在しない・実行権限がない・形式が不正など）。
    #[error("{command}: Command not found")]
    NotFound { command: String },
    #[error("{command}: argument contains a NUL byte")]
    InvalidArgument { command: String },
    /// 子プロセス自体を作れなかった（`EAGAIN` / `ENOMEM`）。
    #[error("{command}: {source}")]
    Os {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    fn from_errno(errno: i32, command: &str) -> Self {
        let command = command.to_string();
        let source = io::Error::from_raw_os_error(errno);
        match errno {
            libc::EAGAIN | libc::ENOMEM => SpawnError::Os { command, source },
            _ => {
                debug!(%command, error = %source, "exec failed");
                SpawnError::NotFound { command }
            }
        }
    }
}

// ── SpawnAttr ─────────────────────────────────────────────────────

/// `posix_spawnattr_t` の RAII ラッパー。Drop で自動 destroy。
struct SpawnAttr {
    inner: libc::posix_spawnattr_t,
}

impl SpawnAttr {
    /// `posix_spawnattr_init` で初期化する。
    fn new() -> Self {
        unsafe {
            let mut attr: libc::posix_spawnattr_t = std::mem::zeroed();
            libc::posix_spawnattr_init(&mut attr);
            Self { inner: attr }
        }
    }

    fn add_flags(&mut self, flag: libc::c_int) {
        unsafe {
            let mut flags: libc::c_short = 0;
            libc::posix_spawnattr_getflags(&self.inner, &mut flags);
            flags |= flag as libc::c_short;
            libc::posix_spawnattr_setflags(&mut self.inner, flags);
        }
    }

    /// 子を新しいプロセスグループのリーダーにする（pgid = 子の pid）。
    ///
    /// 端末から来る SIGINT / SIGTSTP がバックグラウンドの子に直接届かないようにするため。
    fn set_new_pgroup(&mut self) {
        self.add_flags(libc::POSIX_SPAWN_SETPGROUP);
        unsafe {
            libc::posix_spawnattr_setpgroup(&mut self.inner, 0);
        }
    }

    /// exec 時のシグナルマスクを `mask` にする。
    ///
    /// 親は登録が終わるまで SIGCHLD 等をブロックしているので、子にはブロック前のマスクを渡す。
    fn set_sigmask(&mut self, mask: &libc::sigset_t) {
        self.add_flags(libc::POSIX_SPAWN_SETSIGMASK);
        unsafe {
            libc::posix_spawnattr_setsigmask(&mut self.inner, mask);
        }
    }

    /// シェルがハンドラを設定しているシグナルを `SIG_DFL` に戻す。
    fn set_sigdefault(&mut self) {
        self.add_flags(libc::POSIX_SPAWN_SETSIGDEF);
        let sigset = signals::sigset_of(&signals::CHILD_DEFAULT_SIGNALS);
        unsafe {
            libc::posix_spawnattr_setsigdefault(&mut self.inner, &sigset);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.inner
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.inner);
        }
    }
}

// ── FileActions ───────────────────────────────────────────────────

/// `posix_spawn_file_actions_t` の RAII ラッパー。Drop で自動 destroy。
struct FileActions {
    inner: libc::posix_spawn_file_actions_t,
}

impl FileActions {
    fn new() -> Self {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            libc::posix_spawn_file_actions_init(&mut actions);
            Self { inner: actions }
        }
    }

    /// `dup2(fd, newfd)` アクションを追加する。
    ///
    /// 元の `fd` は `O_CLOEXEC` 付きで開かれている前提で、exec 時に子側から消える。
    fn add_dup2(&mut self, fd: RawFd, newfd: RawFd) {
        unsafe {
            libc::posix_spawn_file_actions_adddup2(&mut self.inner, fd, newfd);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.inner
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.inner);
        }
    }
}

// ── CStringVec ────────────────────────────────────────────────────

/// argv 用の CString ベクタ。NULL 終端のポインタ配列を構築する。
struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*mut libc::c_char>,
}

impl CStringVec {
    fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, SpawnError> {
        let strings = args
            .iter()
            .map(|s| CString::new(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SpawnError::InvalidArgument {
                command: args[0].as_ref().to_string(),
            })?;
        let mut ptrs: Vec<*mut libc::c_char> = strings
            .iter()
            .map(|s| s.as_ptr() as *mut libc::c_char)
            .collect();
        ptrs.push(std::ptr::null_mut()); // NULL 終端
        Ok(Self {
            _strings: strings,
            ptrs,
        })
    }

    /// 実行するプログラムのパス（`argv[0]`）。
    fn path(&self) -> *const libc::c_char {
        self.ptrs[0]
    }

    fn as_ptr(&self) -> *const *mut libc::c_char {
        self.ptrs.as_ptr()
    }
}

// ── spawn 関数 ────────────────────────────────────────────────────

/// 子プロセスの標準入出力に付け替える fd。`None` なら継承。
#[derive(Debug, Default, Clone, Copy)]
pub struct Stdio {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub stderr: Option<RawFd>,
}

/// `posix_spawn` で子プロセスを 1 つ起動し、pid を返す。
///
/// - `args`: `args[0]` がプログラムのパス（PATH 検索はしない）。空であってはならない
/// - `stdio`: 付け替える fd
/// - `child_mask`: 子が exec 時に持つシグナルマスク（呼び出し側がブロックする前のもの）
///
/// 子は自身のプロセスグループのリーダーになり、環境変数はそのまま継承する。
/// 登録（ジョブテーブルへの追加）は呼び出し側の責任。
pub fn spawn<S: AsRef<str>>(
    args: &[S],
    stdio: &Stdio,
    child_mask: &libc::sigset_t,
) -> Result<libc::pid_t, SpawnError> {
    let argv = CStringVec::from_args(args)?;

    let mut attr = SpawnAttr::new();
    attr.set_new_pgroup();
    attr.set_sigmask(child_mask);
    attr.set_sigdefault();

    let mut actions = FileActions::new();
    if let Some(fd) = stdio.stdin {
        actions.add_dup2(fd, libc::STDIN_FILENO);
    }
    if let Some(fd) = stdio.stdout {
        actions.add_dup2(fd, libc::STDOUT_FILENO);
    }
    if let Some(fd) = stdio.stderr {
        actions.add_dup2(fd, libc::STDERR_FILENO);
    }

    // environ を継承
    extern "C" {
        static environ: *const *mut libc::c_char;
    }

    let mut pid: libc::pid_t = 0;

    let ret = unsafe {
        libc::posix_spawn(
            &mut pid,
            argv.path(),
            actions.as_ptr(),
            attr.as_ptr(),
            argv.as_ptr(),
            environ as *const *mut libc::c_char,
        )
    };

    if ret != 0 {
        return Err(SpawnError::from_errno(ret, args[0].as_ref()));
    }

    // 親側でもプロセスグループを設定（exec 済みなら EACCES で失敗するが無害）
    unsafe {
        libc::setpgid(pid, pid);
    }

    Ok(pid)
}
