//! シグナルハンドラから安全に使える出力ヘルパー。
//!
//! `println!` は stdout のロックとバッファを経由するため、ハンドラ内では使えない。
//! [`SioBuf`] はスタック上の固定長バッファに `core::fmt` で整形し、
//! `write(2)` で直接書き出す。ヒープ確保もロックも行わない。

use std::fmt;

/// 固定長の整形バッファ。容量を超えた分は切り捨てる。
pub struct SioBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> SioBuf<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// バッファの内容を `fd` に書き出す。EINTR と部分書き込みは再試行する。
    pub fn write_to(&self, fd: libc::c_int) {
        write_all(fd, self.as_bytes());
    }
}

impl<const N: usize> Default for SioBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for SioBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        if n < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

/// 文字列をそのまま stdout に書き出す。
pub fn sio_puts(s: &str) {
    write_all(libc::STDOUT_FILENO, s.as_bytes());
}

fn write_all(fd: libc::c_int, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let n = unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
        if n < 0 {
            if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return;
        }
        bytes = &bytes[n as usize..];
    }
}
