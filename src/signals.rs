//! シグナル中継: SIGCHLD / SIGINT / SIGTSTP / SIGQUIT のハンドラと、
//! ジョブテーブルを共有するためのシグナルマスク規律。
//!
//! ## 排他モデル
//!
//! シェルはシングルスレッドで、並行性はメインループと非同期に割り込むハンドラの間にしかない。
//! ハンドラはブロックできないので Mutex は使えない。代わりに「中継対象シグナル
//! （[`RELAY_SIGNALS`]）をブロックしている間だけメインループがテーブルに触る」という
//! 規律で排他する。
//!
//! - メインループ側: [`SharedJobs::enter`] が返す [`JobsGuard`] 経由でのみアクセスする。
//!   ガードはシグナルをブロックし、Drop で元のマスクに戻す。
//! - ハンドラ側: `sa_mask` で中継対象シグナルを互いにブロックして登録するので、
//!   ハンドラ同士も入れ子にならない。
//!
//! ハンドラは文脈を受け取れないため、[`install`] で渡されたテーブルへの参照だけを
//! プロセス全体のスロット（`RELAY`）に登録する。テーブル本体は呼び出し側が所有する。

use std::cell::UnsafeCell;
use std::fmt::Write as _;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use libc::{c_int, pid_t};

use crate::error::ShellError;
use crate::job::{JobState, JobTable};
use crate::sio::{self, SioBuf};

/// テーブルを更新しうるシグナル。メインループのクリティカルセクションでブロックする。
pub const RELAY_SIGNALS: [c_int; 3] = [libc::SIGCHLD, libc::SIGINT, libc::SIGTSTP];

/// 子プロセスの exec 前にデフォルト処理へ戻すシグナル。
///
/// SIGPIPE は Rust ランタイムが無視に設定しているので、ここで戻す。
pub const CHILD_DEFAULT_SIGNALS: [c_int; 5] = [
    libc::SIGCHLD,
    libc::SIGINT,
    libc::SIGTSTP,
    libc::SIGQUIT,
    libc::SIGPIPE,
];

/// [`install`] で登録されたテーブル。ハンドラからの唯一の入口。
static RELAY: AtomicPtr<SharedJobs> = AtomicPtr::new(ptr::null_mut());

// ── シグナルマスク ───────────────────────────────────────────────────

/// `signals` からなるシグナル集合を作る。
pub fn sigset_of(signals: &[c_int]) -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        for &sig in signals {
            libc::sigaddset(&mut set, sig);
        }
        set
    }
}

/// 中継対象シグナルをブロックし、Drop で元のマスクに戻す RAII ガード。
///
/// プロセス全体ではなく呼び出しスレッドのマスクを操作する（`pthread_sigmask`）。
pub struct SignalMask {
    saved: libc::sigset_t,
}

impl SignalMask {
    pub fn block_relay() -> Self {
        let block = sigset_of(&RELAY_SIGNALS);
        unsafe {
            let mut saved: libc::sigset_t = mem::zeroed();
            // how と set が正しい限り失敗しない
            libc::pthread_sigmask(libc::SIG_BLOCK, &block, &mut saved);
            Self { saved }
        }
    }

    /// ブロック前のマスク。子プロセスはこのマスクで exec する。
    pub fn saved(&self) -> &libc::sigset_t {
        &self.saved
    }

    /// ブロック前のマスクで一時的に眠り、ハンドラが 1 つ走ったら戻る。
    pub fn suspend(&self) {
        unsafe {
            libc::sigsuspend(&self.saved);
        }
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.saved, ptr::null_mut());
        }
    }
}

// ── 共有ジョブテーブル ───────────────────────────────────────────────

/// メインループとハンドラが共有するジョブテーブル。
///
/// `Shell` はこれへの `&'static` 参照を持ち、ディスパッチャ・ビルトイン・待機処理へ渡す。
pub struct SharedJobs {
    table: UnsafeCell<JobTable>,
    entered: AtomicBool,
}

// アクセスはシグナルマスクで直列化される（モジュール冒頭を参照）。
unsafe impl Sync for SharedJobs {}

impl Default for SharedJobs {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedJobs {
    pub const fn new() -> Self {
        Self {
            table: UnsafeCell::new(JobTable::new()),
            entered: AtomicBool::new(false),
        }
    }

    /// 中継対象シグナルをブロックしてテーブルへのアクセスを開く。
    ///
    /// ガードの生存中に再度呼んではならない。
    pub fn enter(&self) -> JobsGuard<'_> {
        let mask = SignalMask::block_relay();
        let nested = self.entered.swap(true, Ordering::SeqCst);
        debug_assert!(!nested, "SharedJobs::enter called while already entered");
        JobsGuard { shared: self, mask }
    }

    /// ハンドラ文脈からテーブルを得る。
    ///
    /// # Safety
    ///
    /// 中継対象シグナルのハンドラ内（他の中継シグナルがブロックされた状態）でのみ呼ぶこと。
    /// メインループはガード保持中はシグナルをブロックしているか、
    /// [`JobsGuard::suspend`] で参照を手放して眠っている。
    #[allow(clippy::mut_from_ref)]
    unsafe fn from_handler(&self) -> &mut JobTable {
        &mut *self.table.get()
    }
}

/// [`SharedJobs::enter`] のガード。テーブルへ `Deref` し、Drop でマスクを戻す。
pub struct JobsGuard<'a> {
    shared: &'a SharedJobs,
    mask: SignalMask,
}

impl JobsGuard<'_> {
    /// 子プロセスに引き継ぐ、ブロック前のシグナルマスク。
    pub fn child_mask(&self) -> &libc::sigset_t {
        self.mask.saved()
    }

    /// マスクを一時的に戻して中継シグナルを待つ。
    ///
    /// `&mut self` を取るので、眠っている間にテーブルへの参照は残らない。
    pub fn suspend(&mut self) {
        self.mask.suspend();
    }
}

impl Deref for JobsGuard<'_> {
    type Target = JobTable;

    fn deref(&self) -> &JobTable {
        unsafe { &*self.shared.table.get() }
    }
}

impl DerefMut for JobsGuard<'_> {
    fn deref_mut(&mut self) -> &mut JobTable {
        unsafe { &mut *self.shared.table.get() }
    }
}

impl Drop for JobsGuard<'_> {
    fn drop(&mut self) {
        // mask フィールドはこの後で Drop されるので、ここではまだブロック中
        self.shared.entered.store(false, Ordering::SeqCst);
    }
}

// ── ハンドラ登録 ─────────────────────────────────────────────────────

/// ハンドラを登録し、`jobs` を中継先として記録する。
///
/// SIGCHLD / SIGINT / SIGTSTP は互いをブロックした状態で走る。
/// どれか 1 つでも `sigaction` に失敗したらエラーを返す（呼び出し側で致命的扱い）。
pub fn install(jobs: &'static SharedJobs) -> Result<(), ShellError> {
    RELAY.store(jobs as *const SharedJobs as *mut SharedJobs, Ordering::SeqCst);

    set_handler(libc::SIGCHLD, sigchld_handler)?;
    set_handler(libc::SIGINT, sigint_handler)?;
    set_handler(libc::SIGTSTP, sigtstp_handler)?;
    set_handler(libc::SIGQUIT, sigquit_handler)?;
    Ok(())
}

fn set_handler(sig: c_int, handler: extern "C" fn(c_int)) -> Result<(), ShellError> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_mask = sigset_of(&RELAY_SIGNALS);
        // 割り込まれた read などを再開させる
        action.sa_flags = libc::SA_RESTART;
        if libc::sigaction(sig, &action, ptr::null_mut()) < 0 {
            return Err(ShellError::last_os_error("Signal"));
        }
    }
    Ok(())
}

fn registered() -> Option<&'static SharedJobs> {
    unsafe { RELAY.load(Ordering::SeqCst).as_ref() }
}

// ── ハンドラ本体 ─────────────────────────────────────────────────────

/// ハンドラの前後で errno を保存・復元する。
struct ErrnoGuard(c_int);

impl ErrnoGuard {
    fn save() -> Self {
        Self(unsafe { *errno_location() })
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        unsafe {
            *errno_location() = self.0;
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut c_int {
    #[cfg(target_os = "linux")]
    {
        libc::__errno_location()
    }
    #[cfg(target_os = "android")]
    {
        libc::__errno()
    }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__error()
}

/// `Job [jid] (pid) <what> by signal <sig>` を stdout に書き出す。
fn report(jid: usize, pid: pid_t, what: &str, sig: c_int) {
    let mut buf = SioBuf::<96>::new();
    let _ = writeln!(buf, "Job [{}] ({}) {} by signal {}", jid, pid, what, sig);
    buf.write_to(libc::STDOUT_FILENO);
}

/// SIGCHLD: 状態が変わった子を待たずに全て回収する。
///
/// - 正常終了 → ジョブを削除
/// - シグナルで終了 → 報告してから削除
/// - 停止 → Stopped にして報告
///
/// 再開（SIGCONT）は報告しない。テーブルにない子も回収だけは行う。
extern "C" fn sigchld_handler(_sig: c_int) {
    let _errno = ErrnoGuard::save();
    let Some(shared) = registered() else {
        return;
    };
    let jobs = unsafe { shared.from_handler() };

    loop {
        let mut status: c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED) };
        if pid <= 0 {
            break;
        }

        let jid = jobs.find_by_pid(pid).map(|j| j.jid());
        if libc::WIFSTOPPED(status) {
            if let Some(jid) = jid {
                jobs.set_state(pid, JobState::Stopped);
                report(jid, pid, "stopped", libc::WSTOPSIG(status));
            }
        } else if libc::WIFSIGNALED(status) {
            if let Some(jid) = jid {
                report(jid, pid, "terminated", libc::WTERMSIG(status));
            }
            jobs.remove(pid);
        } else if libc::WIFEXITED(status) {
            jobs.remove(pid);
        }
    }
}

/// SIGINT / SIGTSTP を Foreground ジョブのプロセスグループ全体へ転送する。
/// Foreground ジョブがなければ何もしない。
fn forward_to_foreground(sig: c_int) {
    let _errno = ErrnoGuard::save();
    let Some(shared) = registered() else {
        return;
    };
    let jobs = unsafe { shared.from_handler() };
    if let Some(pid) = jobs.foreground_pid() {
        unsafe {
            libc::kill(-pid, sig);
        }
    }
}

/// SIGINT (Ctrl+C)。
extern "C" fn sigint_handler(sig: c_int) {
    forward_to_foreground(sig);
}

/// SIGTSTP (Ctrl+Z)。停止の記録は SIGCHLD 側が OS の通知を受けてから行う。
extern "C" fn sigtstp_handler(sig: c_int) {
    forward_to_foreground(sig);
}

/// SIGQUIT: ドライバからシェルを終了させるための入口。
extern "C" fn sigquit_handler(_sig: c_int) {
    sio::sio_puts("Terminating after receipt of SIGQUIT signal\n");
    unsafe { libc::_exit(1) };
}
