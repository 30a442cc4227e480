//! コマンドラインフラグ（`-h`, `-v`, `-p`）の解析。
//!
//! getopt と同じく `-vp` のような結合を受け付ける。`-` で始まらない引数は無視する。

use thiserror::Error;

/// `-h` または不正なフラグで表示する使い方。
pub const USAGE: &str = "\
Usage: shell [-hvp]
   -h   print this message
   -v   print additional diagnostic information
   -p   do not emit a command prompt
";

/// 起動時の設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// プロンプト `tsh> ` を表示するか。自動テストでは `-p` で切る。
    pub emit_prompt: bool,
    /// 診断ログ（`tracing` の debug レベル）を出すか。
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            emit_prompt: true,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("help requested")]
    Help,
    #[error("invalid option -- '{0}'")]
    UnknownFlag(char),
}

impl Config {
    /// プログラム名を除いた引数列から設定を作る。
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Config::default();
        for arg in args {
            let arg = arg.as_ref();
            let Some(flags) = arg.strip_prefix('-') else {
                continue;
            };
            for c in flags.chars() {
                match c {
                    'h' => return Err(ConfigError::Help),
                    'v' => config.verbose = true,
                    'p' => config.emit_prompt = false,
                    other => return Err(ConfigError::UnknownFlag(other)),
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_args(Vec::<String>::new()).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.emit_prompt);
        assert!(!config.verbose);
    }

    #[test]
    fn separate_and_combined_flags() {
        let a = Config::from_args(["-v", "-p"]).unwrap();
        let b = Config::from_args(["-vp"]).unwrap();
        assert_eq!(a, b);
        assert!(a.verbose);
        assert!(!a.emit_prompt);
    }

    #[test]
    fn help_flag() {
        assert_eq!(Config::from_args(["-p", "-h"]), Err(ConfigError::Help));
    }

    #[test]
    fn unknown_flag() {
        assert_eq!(Config::from_args(["-x"]), Err(ConfigError::UnknownFlag('x')));
    }

    #[test]
    fn non_flag_arguments_are_ignored() {
        let config = Config::from_args(["script.txt", "-p"]).unwrap();
        assert!(!config.emit_prompt);
    }
}
