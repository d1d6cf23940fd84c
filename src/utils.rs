//! Logging

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// Escape control characters so protocol strings taken from the wire are
/// safe to print to a terminal or a log file.
pub fn safe_log_string(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => result.push_str("\\0"),
            '\x01'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f' | '\x7f' => {
                result.push_str(&format!("\\x{:02x}", c as u32));
            }
            _ if c.is_ascii_graphic() || c.is_ascii_whitespace() => {
                result.push(c);
            }
            _ if !c.is_control() => result.push(c),
            _ => result.push_str(&format!("\\u{{{:x}}}", c as u32)),
        }
    }
    result
}

/// Timestamped log lines to stdout, and to an append-only file when one
/// was configured (daemon mode runs with stdout detached).
pub struct Logger {
    writer: Option<Mutex<BufWriter<File>>>,
}

impl Logger {
    pub fn new(log_file: Option<PathBuf>) -> anyhow::Result<Self> {
        let writer = match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };
        Ok(Self { writer })
    }

    pub fn log(&self, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("{} {}\n", timestamp, safe_log_string(message));

        print!("{line}");

        if let Some(writer) = &self.writer {
            if let Ok(mut writer) = writer.lock() {
                let _ = writer.write_all(line.as_bytes());
                let _ = writer.flush();
            }
        }
    }
}
