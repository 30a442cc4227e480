//! ビルド済みの `tsh` バイナリを `-p` で起動し、パイプ越しに行を送って出力を検証する。
//!
//! 出力が空になることを確かめたい箇所では、後ろに `/bin/echo END` を送って
//! その行が来るまでを 1 つの応答として読む。

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;

use tsh::job::MAXJOBS;
use std::time::{Duration, Instant};

use libc::pid_t;

struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// テスト終了時に片付けるバックグラウンドジョブ。
    leftovers: Vec<pid_t>,
}

impl Session {
    fn start() -> Self {
        Self::start_with(&["-p"])
    }

    fn start_with(args: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_tsh"))
            .args(args)
            .env_remove("RUST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start tsh");
        let stdin = child.stdin.take();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        Session {
            child,
            stdin,
            stdout,
            leftovers: Vec::new(),
        }
    }

    fn send(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().unwrap();
        writeln!(stdin, "{}", line).unwrap();
        stdin.flush().unwrap();
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        let stdin = self.stdin.as_mut().unwrap();
        stdin.write_all(bytes).unwrap();
        stdin.flush().unwrap();
    }

    fn line(&mut self) -> String {
        let mut buf = String::new();
        self.stdout.read_line(&mut buf).unwrap();
        buf.trim_end_matches('\n').to_string()
    }

    /// `cmd` を送り、続けて送った `END` マーカーまでの出力行を返す。
    fn run(&mut self, cmd: &str) -> Vec<String> {
        self.send(cmd);
        self.send("/bin/echo END");
        let mut lines = Vec::new();
        loop {
            let line = self.line();
            if line == "END" {
                return lines;
            }
            lines.push(line);
        }
    }

    fn signal(&self, sig: libc::c_int) {
        unsafe {
            libc::kill(self.child.id() as pid_t, sig);
        }
    }

    /// stdin を閉じて終了を待つ。
    fn finish(mut self) -> ExitStatus {
        self.stdin.take();
        let status = self.child.wait().unwrap();
        for &pid in &self.leftovers {
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
        status
    }
}

/// `[1] (1234) ...` から pid を取り出す。
fn pid_in(line: &str) -> pid_t {
    let start = line.find('(').expect("no pid in line") + 1;
    let end = line[start..].find(')').unwrap() + start;
    line[start..end].parse().unwrap()
}

fn settle() {
    thread::sleep(Duration::from_millis(300));
}

#[test]
fn background_job_is_listed() {
    let mut sh = Session::start();
    let ack = sh.run("/bin/sleep 5 &");
    assert_eq!(ack.len(), 1);
    let pid = pid_in(&ack[0]);
    sh.leftovers.push(pid);
    assert_eq!(ack[0], format!("[1] ({}) /bin/sleep 5 &", pid));

    let listing = sh.run("jobs");
    assert_eq!(listing, vec![format!("[1] ({}) Running /bin/sleep 5 &", pid)]);

    sh.send("quit");
    assert!(sh.finish().success());
}

#[test]
fn foreground_job_blocks_until_exit() {
    let mut sh = Session::start();
    let started = Instant::now();
    let out = sh.run("/bin/sleep 1");
    assert!(out.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(900));

    assert!(sh.run("jobs").is_empty());
    assert!(sh.finish().success());
}

#[test]
fn foreground_output_reaches_stdout() {
    let mut sh = Session::start();
    assert_eq!(sh.run("/bin/echo 'hello   world'"), vec!["hello   world"]);
    assert!(sh.finish().success());
}

#[test]
fn missing_command_is_reported_and_not_tracked() {
    let mut sh = Session::start();
    assert_eq!(
        sh.run("/no/such/program arg"),
        vec!["/no/such/program: Command not found"]
    );
    assert!(sh.run("jobs").is_empty());
    assert!(sh.finish().success());
}

#[test]
fn fg_unknown_job() {
    let mut sh = Session::start();
    assert_eq!(sh.run("fg %99"), vec!["%99: No such job"]);
    assert_eq!(sh.run("bg 123456"), vec!["(123456): No such process"]);
    assert_eq!(sh.run("fg"), vec!["fg command requires PID or %jobid argument"]);
    assert!(sh.run("jobs").is_empty());
    assert!(sh.finish().success());
}

#[test]
fn suspend_then_bg() {
    let mut sh = Session::start();
    sh.send("/bin/sleep 5");
    settle();
    sh.signal(libc::SIGTSTP);

    let stopped = sh.line();
    let pid = pid_in(&stopped);
    sh.leftovers.push(pid);
    assert_eq!(
        stopped,
        format!("Job [1] ({}) stopped by signal {}", pid, libc::SIGTSTP)
    );

    assert_eq!(sh.run("jobs"), vec![format!("[1] ({}) Stopped /bin/sleep 5", pid)]);
    assert_eq!(sh.run("bg %1"), vec![format!("[1] ({}) /bin/sleep 5", pid)]);
    assert_eq!(sh.run("jobs"), vec![format!("[1] ({}) Running /bin/sleep 5", pid)]);

    sh.send("quit");
    assert!(sh.finish().success());
}

#[test]
fn suspend_then_fg_then_interrupt() {
    let mut sh = Session::start();
    sh.send("/bin/sleep 5");
    settle();
    sh.signal(libc::SIGTSTP);
    let pid = pid_in(&sh.line());
    sh.leftovers.push(pid);

    sh.send("fg %1");
    settle();
    sh.signal(libc::SIGINT);
    assert_eq!(
        sh.line(),
        format!("Job [1] ({}) terminated by signal {}", pid, libc::SIGINT)
    );
    assert!(sh.run("jobs").is_empty());
    assert!(sh.finish().success());
}

#[test]
fn interrupt_without_foreground_job_is_ignored() {
    let mut sh = Session::start();
    sh.signal(libc::SIGINT);
    settle();
    assert_eq!(sh.run("/bin/echo alive"), vec!["alive"]);
    assert!(sh.finish().success());
}

#[test]
fn background_job_killed_externally_is_reported() {
    let mut sh = Session::start();
    let ack = sh.run("/bin/sleep 5 &");
    let pid = pid_in(&ack[0]);
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    assert_eq!(
        sh.line(),
        format!("Job [1] ({}) terminated by signal {}", pid, libc::SIGKILL)
    );
    assert!(sh.run("jobs").is_empty());
    assert!(sh.finish().success());
}

#[test]
fn job_ids_are_reused_after_removal() {
    let mut sh = Session::start();
    let first = pid_in(&sh.run("/bin/sleep 5 &")[0]);
    sh.leftovers.push(first);
    let second = sh.run("/bin/sleep 0.2 &");
    assert!(second[0].starts_with("[2] "));

    // 2 番が終わると次は再び 2 番
    thread::sleep(Duration::from_millis(600));
    let third = sh.run("/bin/sleep 5 &");
    sh.leftovers.push(pid_in(&third[0]));
    assert!(third[0].starts_with("[2] "));

    sh.send("quit");
    assert!(sh.finish().success());
}

#[test]
fn quit_does_not_wait_for_background_jobs() {
    let mut sh = Session::start();
    let pid = pid_in(&sh.run("/bin/sleep 5 &")[0]);
    sh.leftovers.push(pid);

    let started = Instant::now();
    sh.send("quit");
    assert!(sh.finish().success());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn sigquit_terminates_shell() {
    let mut sh = Session::start();
    assert_eq!(sh.run("/bin/echo ready"), vec!["ready"]);
    sh.signal(libc::SIGQUIT);
    assert_eq!(sh.line(), "Terminating after receipt of SIGQUIT signal");
    assert_eq!(sh.finish().code(), Some(1));
}

#[test]
fn end_of_input_exits_successfully() {
    let sh = Session::start();
    assert!(sh.finish().success());
}

#[test]
fn prompt_is_printed_without_p_flag() {
    let mut sh = Session::start_with(&[]);
    sh.send("quit");
    let mut rest = String::new();
    std::io::Read::read_to_string(&mut sh.stdout, &mut rest).unwrap();
    assert_eq!(rest, "tsh> ");
    assert!(sh.finish().success());
}

#[test]
fn help_flag_prints_usage() {
    let mut sh = Session::start_with(&["-h"]);
    assert_eq!(sh.line(), "Usage: shell [-hvp]");
    assert_eq!(sh.finish().code(), Some(1));
}

#[test]
fn output_redirection() {
    let path = std::env::temp_dir().join(format!("tsh-it-{}.txt", std::process::id()));
    let target = path.to_str().unwrap().to_string();

    let mut sh = Session::start();
    assert!(sh.run(&format!("/bin/echo first > {}", target)).is_empty());
    assert!(sh.run(&format!("/bin/echo second >> {}", target)).is_empty());
    assert_eq!(sh.run(&format!("/bin/cat < {}", target)), vec!["first", "second"]);
    assert!(sh.finish().success());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn stderr_is_merged_into_stdout() {
    let mut sh = Session::start();
    // ls のエラーメッセージは stderr に出るが、同じパイプで受け取れる
    let out = sh.run("/bin/ls /no/such/dir/for/tsh");
    assert_eq!(out.len(), 1);
    assert!(out[0].contains("/no/such/dir/for/tsh"));
    assert!(sh.finish().success());
}

#[test]
fn unterminated_quote_is_reported() {
    let mut sh = Session::start();
    assert_eq!(
        sh.run("/bin/echo 'oops"),
        vec!["tsh: unexpected EOF while looking for matching `'`"]
    );
    assert!(sh.finish().success());
}

#[test]
fn invalid_utf8_line_does_not_stop_the_shell() {
    let mut sh = Session::start();
    sh.send_bytes(b"/bin/echo \xff\n");
    let out = sh.run("/bin/echo after");
    assert_eq!(out.last().map(String::as_str), Some("after"));
    assert_eq!(out.len(), 2);
    assert!(sh.finish().success());
}

#[test]
fn unexecutable_program_is_command_not_found() {
    let mut sh = Session::start();
    assert_eq!(sh.run("/tmp"), vec!["/tmp: Command not found"]);
    assert!(sh.run("jobs").is_empty());
    assert!(sh.finish().success());
}

#[test]
fn full_table_leaves_extra_job_untracked() {
    let mut sh = Session::start();
    for jid in 1..=MAXJOBS {
        sh.send("/bin/sleep 5 &");
        let ack = sh.line();
        assert!(ack.starts_with(&format!("[{}] ", jid)), "{}", ack);
        sh.leftovers.push(pid_in(&ack));
    }

    sh.send("/bin/sleep 5 &");
    assert_eq!(sh.line(), "Tried to create too many jobs");

    sh.send("jobs");
    let listing: Vec<String> = (0..MAXJOBS).map(|_| sh.line()).collect();
    for (i, line) in listing.iter().enumerate() {
        assert!(line.starts_with(&format!("[{}] ", i + 1)), "{}", line);
        assert!(line.ends_with(" Running /bin/sleep 5 &"), "{}", line);
    }

    // テーブルが満杯でもビルトインは応答する
    sh.send("fg %99");
    assert_eq!(sh.line(), "%99: No such job");

    sh.send("quit");
    assert!(sh.finish().success());
}

#[test]
fn pid_argument_with_trailing_garbage() {
    let mut sh = Session::start();
    assert_eq!(sh.run("bg 123456x"), vec!["(123456): No such process"]);
    assert_eq!(sh.run("fg x1"), vec!["fg: argument must be a PID or %jobid"]);
    assert!(sh.finish().success());
}

#[test]
fn pipeline_is_rejected() {
    let mut sh = Session::start();
    assert_eq!(
        sh.run("/bin/echo a | /bin/cat"),
        vec!["tsh: pipelines are not supported"]
    );
    assert!(sh.run("jobs").is_empty());
    assert!(sh.finish().success());
}
