//! ジョブテーブルとフォアグラウンド待機。
//!
//! [`JobTable`] はメインループとシグナルハンドラ（[`signals`](crate::signals)）の
//! 両方から更新される唯一の共有状態。ハンドラ文脈から呼ばれるため、全操作は
//! ヒープ確保なし・ブロックなし・O([`MAXJOBS`]) で完了する。
//! 排他の規律（シグナルマスクによるクリティカルセクション）は
//! [`SharedJobs`](crate::signals::SharedJobs) 側が担う。

use std::fmt;

use libc::pid_t;
use thiserror::Error;

use crate::signals::JobsGuard;

/// 同時に追跡できるジョブ数。
pub const MAXJOBS: usize = 16;
/// ジョブ ID の上限。次の ID がこれを超えると 1 に巻き戻る。
pub const MAXJID: usize = 1 << 16;
/// 表示用コマンドライン・バッファのバイト数。
pub const MAXLINE: usize = 1024;

// ── データ構造 ───────────────────────────────────────────────────────

/// ジョブの状態。`Foreground` はテーブル全体で高々 1 つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// 空きスロット。
    Undefined,
    Foreground,
    Background,
    /// SIGTSTP 等で停止中。`fg` / `bg` で再開される。
    Stopped,
}

impl JobState {
    /// `jobs` の表示ラベル。Background は `Running` と表示する。
    pub fn label(self) -> &'static str {
        match self {
            JobState::Undefined => "Undefined",
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

/// 固定長のコマンドライン保持領域。
///
/// `String` を持つとハンドラ内の削除で解放が走るため、スロットに埋め込んだ
/// バイト配列へコピーする。[`MAXLINE`] を超える入力は UTF-8 の文字境界で切り詰める。
#[derive(Clone, Copy)]
struct CmdLine {
    buf: [u8; MAXLINE],
    len: usize,
}

impl CmdLine {
    const EMPTY: CmdLine = CmdLine {
        buf: [0; MAXLINE],
        len: 0,
    };

    fn set(&mut self, s: &str) {
        let mut end = s.len().min(MAXLINE);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf[..end].copy_from_slice(&s.as_bytes()[..end]);
        self.len = end;
    }

    fn as_str(&self) -> &str {
        // set() が文字境界で切るので失敗しない
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

/// 追跡中の子プロセス 1 つ。`pid == 0` のスロットは空き。
#[derive(Clone, Copy)]
pub struct Job {
    pid: pid_t,
    jid: usize,
    state: JobState,
    cmdline: CmdLine,
}

impl Job {
    const EMPTY: Job = Job {
        pid: 0,
        jid: 0,
        state: JobState::Undefined,
        cmdline: CmdLine::EMPTY,
    };

    /// プロセス ID。プロセスグループ ID も兼ねる（子は自身のグループリーダー）。
    pub fn pid(&self) -> pid_t {
        self.pid
    }

    /// `[N]` 形式で表示されるジョブ番号。
    pub fn jid(&self) -> usize {
        self.jid
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// 入力されたコマンドライン（末尾の `&` を含む）。
    pub fn cmdline(&self) -> &str {
        self.cmdline.as_str()
    }

    /// バックグラウンド起動時と `bg` で出す `[jid] (pid) cmdline` 形式の表示。
    pub fn launched(&self) -> Launched<'_> {
        Launched(self)
    }

    fn is_empty(&self) -> bool {
        self.pid == 0
    }

    fn clear(&mut self) {
        *self = Job::EMPTY;
    }
}

/// `jobs` の 1 行: `[jid] (pid) State cmdline`。
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] ({}) {} {}",
            self.jid,
            self.pid,
            self.state.label(),
            self.cmdline()
        )
    }
}

/// [`Job::launched`] の表示ラッパー。
pub struct Launched<'a>(&'a Job);

impl fmt::Display for Launched<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({}) {}", self.0.jid, self.0.pid, self.0.cmdline())
    }
}

/// [`JobTable::insert`] の失敗理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid pid {0}")]
    InvalidPid(pid_t),
    #[error("pid {0} is already tracked")]
    Duplicate(pid_t),
    #[error("another job is already in the foreground")]
    ForegroundBusy,
    #[error("Tried to create too many jobs")]
    Full,
}

// ── JobTable ─────────────────────────────────────────────────────────

/// 固定長のジョブテーブル。
///
/// pid からの逆引きとジョブ ID からの参照を線形走査で提供する。
/// 次に割り当てるジョブ ID は挿入ごとに 1 進み（[`MAXJID`] で巻き戻る）、
/// 削除ごとに「生存ジョブの最大 ID + 1」へ戻る。
pub struct JobTable {
    jobs: [Job; MAXJOBS],
    next_jid: usize,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub const fn new() -> Self {
        Self {
            jobs: [Job::EMPTY; MAXJOBS],
            next_jid: 1,
        }
    }

    /// ジョブを登録し、割り当てたジョブ ID を返す。
    ///
    /// 同じ pid の二重登録と、2 つ目の Foreground ジョブは拒否する。
    pub fn insert(&mut self, pid: pid_t, state: JobState, cmdline: &str) -> Result<usize, JobError> {
        if pid < 1 {
            return Err(JobError::InvalidPid(pid));
        }
        if self.find_by_pid(pid).is_some() {
            return Err(JobError::Duplicate(pid));
        }
        if state == JobState::Foreground && self.foreground_pid().is_some() {
            return Err(JobError::ForegroundBusy);
        }

        let slot = self
            .jobs
            .iter_mut()
            .find(|j| j.is_empty())
            .ok_or(JobError::Full)?;

        let jid = self.next_jid;
        self.next_jid = if jid >= MAXJID { 1 } else { jid + 1 };

        slot.pid = pid;
        slot.jid = jid;
        slot.state = state;
        slot.cmdline.set(cmdline);
        Ok(jid)
    }

    /// pid のジョブを削除する。削除できたら `true`。
    pub fn remove(&mut self, pid: pid_t) -> bool {
        if pid < 1 {
            return false;
        }
        match self.jobs.iter_mut().find(|j| j.pid == pid) {
            Some(job) => {
                job.clear();
                self.next_jid = self.max_jid() + 1;
                true
            }
            None => false,
        }
    }

    pub fn find_by_pid(&self, pid: pid_t) -> Option<&Job> {
        if pid < 1 {
            return None;
        }
        self.jobs.iter().find(|j| j.pid == pid)
    }

    pub fn find_by_jid(&self, jid: usize) -> Option<&Job> {
        if jid < 1 {
            return None;
        }
        self.jobs.iter().find(|j| !j.is_empty() && j.jid == jid)
    }

    /// ジョブの状態を変える。
    ///
    /// 別のジョブが Foreground のときに Foreground へ移すことはできない（`false` を返す）。
    pub fn set_state(&mut self, pid: pid_t, state: JobState) -> bool {
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground_pid() {
                if fg != pid {
                    return false;
                }
            }
        }
        match self.jobs.iter_mut().find(|j| pid > 0 && j.pid == pid) {
            Some(job) => {
                job.state = state;
                true
            }
            None => false,
        }
    }

    /// Foreground ジョブの pid。なければ `None`。
    pub fn foreground_pid(&self) -> Option<pid_t> {
        self.jobs
            .iter()
            .find(|j| !j.is_empty() && j.state == JobState::Foreground)
            .map(|j| j.pid)
    }

    /// 登録中のジョブをスロット順に列挙する。
    pub fn list(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|j| !j.is_empty())
    }

    pub fn len(&self) -> usize {
        self.list().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == MAXJOBS
    }

    fn max_jid(&self) -> usize {
        self.list().map(|j| j.jid).max().unwrap_or(0)
    }
}

// ── 待機ヘルパー ─────────────────────────────────────────────────────

/// `pid` が Foreground でなくなるまでブロックする。
///
/// 呼び出し時点でテーブルにない pid は処理済みとみなして即座に返る。
/// 待機はシグナルマスクを保持したまま `sigsuspend` で行うので、
/// 状態の確認と眠りの間に SIGCHLD を取りこぼさない。
/// 状態を変えるのは常にシグナル中継側で、ここではテーブルを読むだけ。
pub fn wait_fg(jobs: &mut JobsGuard<'_>, pid: pid_t) {
    if jobs.find_by_pid(pid).is_none() {
        return;
    }
    while jobs.foreground_pid() == Some(pid) {
        jobs.suspend();
    }
}
