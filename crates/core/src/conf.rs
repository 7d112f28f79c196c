//! Run-time configuration file
//!
//! A minimal `key = value` format:
//!
//! ```text
//! # log to a file instead of stderr
//! logfile = /var/log/kalends.log
//! debug = 2
//! ```
//!
//! `#` starts a comment; `\#` escapes a literal hash. A missing file is
//! not an error, but any malformed line is fatal so misconfiguration
//! never passes silently.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct Conf {
    pub logfile: Option<String>,
    /// 0 silences debug output; 10 is the most verbose.
    pub verbose: u8,
}

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("line {0}: malformed configuration")]
    Malformed(usize),
    #[error("line {0}: unknown key \"{1}\"")]
    UnknownKey(usize, String),
    #[error("line {0}: bad value for \"{1}\"")]
    BadValue(usize, String),
}

impl Conf {
    /// Read the configuration file at `path`. Absence yields the
    /// defaults.
    pub fn read(path: &Path) -> Result<Conf, ConfError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Conf::default()),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Conf, ConfError> {
        let mut conf = Conf::default();

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = strip_comment(raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, val)) = line.split_once('=') else {
                return Err(ConfError::Malformed(lineno));
            };
            let key = key.trim();
            let val = val.trim();
            if key.is_empty() {
                return Err(ConfError::Malformed(lineno));
            }
            if val.is_empty() {
                continue;
            }

            match key {
                "logfile" => conf.logfile = Some(val.to_string()),
                "debug" => {
                    conf.verbose = val
                        .parse::<u8>()
                        .ok()
                        .filter(|v| *v <= 10)
                        .ok_or_else(|| ConfError::BadValue(lineno, key.to_string()))?;
                }
                _ => return Err(ConfError::UnknownKey(lineno, key.to_string())),
            }
        }

        Ok(conf)
    }
}

/// Cut everything after the first unescaped `#`, turning `\#` into a
/// literal hash along the way.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut escaped = false;
    for ch in line.chars() {
        match ch {
            '\\' if !escaped => escaped = true,
            '#' if escaped => {
                out.push('#');
                escaped = false;
            }
            '#' => break,
            ch => {
                if escaped {
                    out.push('\\');
                    escaped = false;
                }
                out.push(ch);
            }
        }
    }
    if escaped {
        out.push('\\');
    }
    out
}
