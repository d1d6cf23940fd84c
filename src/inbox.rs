//! HTML inbox rendering
//!
//! Each received message becomes one timestamped page under the inbox
//! directory, and `index.html` keeps a newest-first table of everything
//! received so far. Message text is escaped before it touches a page;
//! http(s) URLs inside the body are made clickable.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Duration, Local};

const ENTRY_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
<meta http-equiv="Content-Type" content="text/html; charset=utf-8" />
<link rel="index" href="./index.html" />
<title>{subject} ({date})</title>
</head>
<body style="background:#eee">
<h1 id="subject">{subject}</h1>
<div><p id="date" style="font-size:0.8em;">{date}</p></div>
<div id="source" style="border: solid 1px #666; background:white; padding:2em;">
<p>{source}</p>
</div>
</body>
</html>
"#;

const INDEX_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
<meta http-equiv="Content-Type" content="text/html; charset=utf-8" />
<link rel="index" href="./index.html" />
<title>Inbox</title>
<style type="text/css">
body {
  background:#eee;
}
table {
  border: 1px #999 solid;
  border-collapse: collapse;
}
th, td {
  border: 1px #999 solid;
  padding: 6px 12px;
}
th {
  background: #ccc;
}
td {
  background: white;
}
</style>
</head>
<body>
<h1>Inbox</h1>
<table>
<thead>
<tr>
<th>Date</th>
<th>Subject</th>
<th>From</th>
<th>To</th>
</tr>
</thead>

<tbody>
<!-- ADD -->

</tbody>
</table>
</body>
</html>
"#;

const INDEX_ROW: &str = r#"<!-- ADD -->

<tr>
<td>{date}</td>
<td><a href="{file}">{subject}</a></td>
<td>{sender}</td>
<td>{recipients}</td>
</tr>"#;

/// Marker new index rows are inserted at. The row template re-emits it, so
/// later messages always land on top.
const ADD_MARK: &str = "<!-- ADD -->";

pub struct Inbox {
    dir: PathBuf,
}

impl Inbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the inbox directory if it is missing.
    pub fn ensure_created(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create inbox directory: {}", self.dir.display()))
    }

    /// Render one message into the inbox and record it in the index.
    /// Returns the path of the entry page written.
    pub fn save(
        &self,
        source: &str,
        sender: &str,
        recipients: &[String],
    ) -> anyhow::Result<PathBuf> {
        let subject = header_value(source, "Subject:").unwrap_or_default();
        let date = header_value(source, "Date:")
            .and_then(|d| DateTime::parse_from_rfc2822(&d).ok())
            .map(|d| d.with_timezone(&Local))
            .unwrap_or_else(Local::now);

        let (file_name, path, date) = self.pick_entry_path(date);

        let entry = fill(
            ENTRY_PAGE,
            &[
                ("{subject}", &html_escape(&subject)),
                ("{date}", &date.format("%Y-%m-%d %H:%M:%S %z").to_string()),
                ("{source}", &render_source(source)),
            ],
        );
        std::fs::write(&path, entry)
            .with_context(|| format!("failed to write mail entry: {}", path.display()))?;

        self.add_index_row(&file_name, &subject, &date, sender, recipients)?;
        Ok(path)
    }

    /// Entry files are named by timestamp; on a collision the timestamp is
    /// nudged forward a second until a free name is found.
    fn pick_entry_path(&self, mut date: DateTime<Local>) -> (String, PathBuf, DateTime<Local>) {
        loop {
            let file_name = format!("{}.html", date.format("%Y%m%d%H%M%S"));
            let path = self.dir.join(&file_name);
            if !path.exists() {
                return (file_name, path, date);
            }
            date = date + Duration::seconds(1);
        }
    }

    fn add_index_row(
        &self,
        file_name: &str,
        subject: &str,
        date: &DateTime<Local>,
        sender: &str,
        recipients: &[String],
    ) -> anyhow::Result<()> {
        let index_path = self.dir.join("index.html");
        if !index_path.exists() {
            std::fs::write(&index_path, INDEX_PAGE)
                .with_context(|| format!("failed to create index: {}", index_path.display()))?;
        }

        let page = std::fs::read_to_string(&index_path)
            .with_context(|| format!("failed to read index: {}", index_path.display()))?;
        let row = fill(
            INDEX_ROW,
            &[
                ("{date}", &date.format("%Y-%m-%d %H:%M:%S").to_string()),
                ("{file}", &html_escape(file_name)),
                ("{subject}", &html_escape(subject)),
                ("{sender}", &html_escape(sender)),
                ("{recipients}", &html_escape(&recipients.join(","))),
            ],
        );
        let page = page.replacen(ADD_MARK, &row, 1);
        std::fs::write(&index_path, page)
            .with_context(|| format!("failed to update index: {}", index_path.display()))?;
        Ok(())
    }
}

/// Substitute `{name}` markers in a template. Only the template itself is
/// scanned, so substituted values cannot smuggle markers in.
fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    'outer: while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        for (key, value) in pairs {
            if tail.starts_with(key) {
                out.push_str(value);
                rest = &tail[key.len()..];
                continue 'outer;
            }
        }
        out.push('{');
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// First `Name: value` line anywhere in the message, case-insensitive.
fn header_value(source: &str, name: &str) -> Option<String> {
    source.lines().find_map(|line| {
        let head = line.get(..name.len())?;
        if head.eq_ignore_ascii_case(name) {
            Some(line[name.len()..].trim().to_string())
        } else {
            None
        }
    })
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape, linkify, and convert line endings to `<br />` tags.
fn render_source(source: &str) -> String {
    break_lines(&linkify(&html_escape(source)))
}

const URL_CHARS: &str =
    "-_.!~*'()abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789;/?:@&=+$,%#";

/// Wrap `http://` / `https://` runs in anchor tags. Operates on escaped
/// text, so the character run may include escaped entities.
fn linkify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = url_start(rest) {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let scheme_len = if candidate.starts_with("https://") { 8 } else { 7 };
        let tail_len = candidate[scheme_len..]
            .find(|c: char| !URL_CHARS.contains(c))
            .unwrap_or(candidate.len() - scheme_len);
        if tail_len == 0 {
            // A bare scheme is not a link.
            out.push_str(&candidate[..scheme_len]);
            rest = &candidate[scheme_len..];
            continue;
        }
        let url = &candidate[..scheme_len + tail_len];
        out.push_str(&format!("<a href=\"{url}\">{url}</a>"));
        rest = &candidate[url.len()..];
    }
    out.push_str(rest);
    out
}

fn url_start(s: &str) -> Option<usize> {
    match (s.find("http://"), s.find("https://")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn break_lines(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("<br />\n");
            }
            '\n' => out.push_str("<br />\n"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_ignores_markers_inside_values() {
        let out = fill("a {x} b {y} {x}", &[("{x}", "[{y}]"), ("{y}", "Y")]);
        assert_eq!(out, "a [{y}] b Y [{y}]");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape(r#"<b>"a" & 'b'</b>"#),
            "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn linkifies_urls() {
        assert_eq!(
            linkify("see http://example.com/x?a=1 now"),
            "see <a href=\"http://example.com/x?a=1\">http://example.com/x?a=1</a> now"
        );
        assert_eq!(
            linkify("https://example.com"),
            "<a href=\"https://example.com\">https://example.com</a>"
        );
    }

    #[test]
    fn bare_scheme_is_left_alone() {
        assert_eq!(linkify("not a link: http:// end"), "not a link: http:// end");
    }

    #[test]
    fn converts_line_endings() {
        assert_eq!(break_lines("a\r\nb\nc\r"), "a<br />\nb<br />\nc<br />\n");
    }

    #[test]
    fn header_scrape_is_case_insensitive() {
        let src = "subject: Hello\r\nDate: Tue, 1 Jul 2008 10:52:37 +0200\r\n\r\nbody\r\n";
        assert_eq!(header_value(src, "Subject:").as_deref(), Some("Hello"));
        assert!(header_value(src, "Date:").is_some());
        assert_eq!(header_value(src, "X-Missing:"), None);
    }

    #[test]
    fn saves_entry_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path());

        let src = "Subject: First <test>\r\nDate: Tue, 1 Jul 2008 10:52:37 +0200\r\n\r\nhello\r\n";
        let path = inbox
            .save(src, "a@example.com", &["b@example.com".to_string()])
            .unwrap();
        assert!(path.exists());

        let entry = std::fs::read_to_string(&path).unwrap();
        assert!(entry.contains("First &lt;test&gt;"));
        assert!(entry.contains("hello<br />"));

        let index = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
        assert!(index.contains("a@example.com"));
        assert!(index.contains("b@example.com"));
        assert!(index.contains(path.file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn newer_entries_insert_above_older_ones() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path());

        let first = "Subject: one\r\nDate: Tue, 1 Jul 2008 10:00:00 +0000\r\n\r\nx\r\n";
        let second = "Subject: two\r\nDate: Tue, 1 Jul 2008 11:00:00 +0000\r\n\r\nx\r\n";
        inbox.save(first, "a@x", &["b@x".to_string()]).unwrap();
        inbox.save(second, "a@x", &["b@x".to_string()]).unwrap();

        let index = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
        let one = index.find(">one<").unwrap();
        let two = index.find(">two<").unwrap();
        assert!(two < one);
    }

    #[test]
    fn colliding_timestamps_get_bumped() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path());

        let src = "Subject: s\r\nDate: Tue, 1 Jul 2008 10:52:37 +0000\r\n\r\nx\r\n";
        let p1 = inbox.save(src, "a@x", &["b@x".to_string()]).unwrap();
        let p2 = inbox.save(src, "a@x", &["b@x".to_string()]).unwrap();
        assert_ne!(p1, p2);
        assert!(p1.exists() && p2.exists());
    }

    #[test]
    fn missing_date_falls_back_to_now() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path());
        let path = inbox
            .save("Subject: s\r\n\r\nx\r\n", "a@x", &["b@x".to_string()])
            .unwrap();
        assert!(path.exists());
    }
}
