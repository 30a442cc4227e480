//! トークナイザ: 入力行を引数ベクタ・リダイレクト指定・バックグラウンドフラグに分解する。
//!
//! 手書きトークナイザでゼロコピー（入力への `&str` スライス）のワード列を生成し、
//! [`ParsedLine`] に組み立てる。
//!
//! ## 対応構文
//!
//! - 空白区切りのワード
//! - シングルクォート: ワード先頭の `'...'` は空白を含めて 1 引数
//! - リダイレクト: `<`, `>`, `>>`, `2>`（クォートされていない独立したワードのみ）
//! - バックグラウンド実行: 最後のワードが `&` で始まる（そのワードは取り除く）
//!
//! パイプライン、変数展開、エスケープは扱わない。クォートされていない `|` は
//! [`ParseError::Pipeline`] として行ごと拒否する。

use thiserror::Error;

// ── AST ─────────────────────────────────────────────────────────────

/// 1 行分の解析結果。
#[derive(Debug, PartialEq)]
pub struct ParsedLine<'a> {
    /// `args[0]` が実行するプログラムのパス（またはビルトイン名）。
    pub args: Vec<&'a str>,
    pub redirects: Vec<Redirect<'a>>,
    /// 末尾に `&` が指定された場合に `true`。
    pub background: bool,
}

/// ファイルリダイレクト指定。
#[derive(Debug, PartialEq)]
pub struct Redirect<'a> {
    pub kind: RedirectKind,
    pub target: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `<` — stdin をファイルから読み取り
    Input,
    /// `>` — stdout を上書き
    Output,
    /// `>>` — stdout を追記
    Append,
    /// `2>` — stderr を上書き
    Stderr,
}

impl RedirectKind {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "<" => Some(Self::Input),
            ">" => Some(Self::Output),
            ">>" => Some(Self::Append),
            "2>" => Some(Self::Stderr),
            _ => None,
        }
    }
}

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected EOF while looking for matching `'`")]
    UnterminatedQuote,
    #[error("syntax error: missing redirect target")]
    MissingRedirectTarget,
    #[error("pipelines are not supported")]
    Pipeline,
}

// ── Tokenizer (crate-private) ───────────────────────────────────────

/// トークナイザが生成するワード。クォートされたワードは演算子として解釈しない。
struct Word<'a> {
    text: &'a str,
    quoted: bool,
}

/// 入力文字列をワード列に変換するイテレータ。
struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Word<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let bytes = self.input.as_bytes();
        let ch = *bytes.get(self.pos)?;

        if ch == b'\'' {
            // 閉じクォートまでを 1 ワードに。閉じクォートは区切りを兼ねる。
            let start = self.pos + 1;
            return match self.input[start..].find('\'') {
                Some(len) => {
                    self.pos = start + len + 1;
                    Some(Ok(Word {
                        text: &self.input[start..start + len],
                        quoted: true,
                    }))
                }
                None => {
                    self.pos = bytes.len();
                    Some(Err(ParseError::UnterminatedQuote))
                }
            };
        }

        let start = self.pos;
        while self.pos < bytes.len() && !bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        Some(Ok(Word {
            text: &self.input[start..self.pos],
            quoted: false,
        }))
    }
}

// ── Parser ──────────────────────────────────────────────────────────

/// 1 行を解析する。空行（または `&` だけの行）は `Ok(None)`。
pub fn parse(input: &str) -> Result<Option<ParsedLine<'_>>, ParseError> {
    let mut words = Tokenizer::new(input).collect::<Result<Vec<_>, _>>()?;

    let background = matches!(words.last(), Some(w) if !w.quoted && w.text.starts_with('&'));
    if background {
        words.pop();
    }

    let mut args = Vec::with_capacity(words.len());
    let mut redirects = Vec::new();
    let mut iter = words.into_iter();
    while let Some(word) = iter.next() {
        if !word.quoted && word.text.starts_with('|') {
            return Err(ParseError::Pipeline);
        }
        let kind = if word.quoted {
            None
        } else {
            RedirectKind::from_word(word.text)
        };
        match kind {
            Some(kind) => {
                let target = iter.next().ok_or(ParseError::MissingRedirectTarget)?;
                redirects.push(Redirect {
                    kind,
                    target: target.text,
                });
            }
            None => args.push(word.text),
        }
    }

    if args.is_empty() {
        return Ok(None);
    }
    Ok(Some(ParsedLine {
        args,
        redirects,
        background,
    }))
}
