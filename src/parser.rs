//! LIST / MLSD listing parser.
//!
//! Three grammars, tried in order per line:
//! 1. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//! 2. **Unix `ls -l`**: `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 3. **Windows/IIS**: `01-01-26  12:00AM       1234 file.txt`
//!
//! Anything unrecognized is surfaced as a raw entry rather than dropped,
//! so callers can still display exotic server output.

use crate::types::{FtpEntry, FtpEntryKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Parse a complete LIST or MLSD response body. `.` and `..` entries are
/// dropped.
pub fn parse_listing(raw: &str) -> Vec<FtpEntry> {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter_map(parse_line)
        .filter(|entry| entry.name != "." && entry.name != "..")
        .collect()
}

fn parse_line(line: &str) -> Option<FtpEntry> {
    let line = line.trim();
    if looks_like_mlsd(line) {
        if let Some(entry) = parse_mlsd(line) {
            return Some(entry);
        }
    }
    if let Some(entry) = parse_unix(line) {
        return Some(entry);
    }
    if let Some(entry) = parse_windows(line) {
        return Some(entry);
    }
    Some(raw_entry(line))
}

fn raw_entry(line: &str) -> FtpEntry {
    FtpEntry {
        name: line.to_string(),
        kind: FtpEntryKind::Unknown,
        size: 0,
        modified: None,
        permissions: None,
        owner: None,
        group: None,
        link_target: None,
        raw: Some(line.to_string()),
        facts: HashMap::new(),
    }
}

// ─── MLSD ────────────────────────────────────────────────────────────

fn looks_like_mlsd(line: &str) -> bool {
    match line.find(' ') {
        Some(space) => line[..space].contains('=') && line[..space].contains(';'),
        None => line.contains('=') && line.contains(';'),
    }
}

/// `fact=value;fact=value; filename` — the name begins after the first
/// `"; "` separator.
fn parse_mlsd(line: &str) -> Option<FtpEntry> {
    let (fact_part, name) = line.split_once("; ")?;
    if name.is_empty() {
        return None;
    }

    let mut facts = HashMap::new();
    for fact in fact_part.split(';') {
        if let Some((key, value)) = fact.trim().split_once('=') {
            facts.insert(key.to_ascii_lowercase(), value.to_string());
        }
    }

    let kind = match facts.get("type").map(String::as_str) {
        Some("dir") | Some("cdir") | Some("pdir") => FtpEntryKind::Directory,
        Some("file") => FtpEntryKind::File,
        Some(t) if t.contains("link") => FtpEntryKind::Symlink,
        _ => FtpEntryKind::Unknown,
    };

    let size = facts
        .get("size")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let modified = facts.get("modify").and_then(|v| parse_mlsd_time(v));

    Some(FtpEntry {
        name: name.to_string(),
        kind,
        size,
        modified,
        permissions: facts.get("unix.mode").cloned(),
        owner: facts.get("unix.owner").cloned(),
        group: facts.get("unix.group").cloned(),
        link_target: None,
        raw: Some(line.to_string()),
        facts,
    })
}

/// MLSD timestamp: `YYYYMMDDHHMMSS[.fraction]`, UTC.
fn parse_mlsd_time(value: &str) -> Option<DateTime<Utc>> {
    let base = value.get(..14).unwrap_or(value);
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix ls -l ──────────────────────────────────────────────────────

fn unix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^([dlcbps-][rwxsStT-]{9})\s+    # permissions
            \d+\s+                          # link count
            (\S+)\s+                        # owner
            (\S+)\s+                        # group
            (\d+)\s+                        # size
            (\w{3}\s+\d{1,2}\s+[\d:]+)\s+   # date
            (.+)$                           # name, possibly 'link -> target'
            ",
        )
        .unwrap()
    })
}

fn parse_unix(line: &str) -> Option<FtpEntry> {
    let caps = unix_re().captures(line)?;

    let permissions = caps.get(1)?.as_str();
    let owner = caps.get(2).map(|m| m.as_str().to_string());
    let group = caps.get(3).map(|m| m.as_str().to_string());
    let size = caps.get(4)?.as_str().parse::<u64>().unwrap_or(0);
    let modified = parse_unix_date(caps.get(5)?.as_str());
    let name_field = caps.get(6)?.as_str();

    let kind = match permissions.as_bytes()[0] {
        b'd' => FtpEntryKind::Directory,
        b'l' => FtpEntryKind::Symlink,
        b'-' => FtpEntryKind::File,
        _ => FtpEntryKind::Unknown,
    };

    let (name, link_target) = match kind {
        FtpEntryKind::Symlink => match name_field.split_once(" -> ") {
            Some((name, target)) => (name.to_string(), Some(target.to_string())),
            None => (name_field.to_string(), None),
        },
        _ => (name_field.to_string(), None),
    };

    Some(FtpEntry {
        name,
        kind,
        size,
        modified,
        permissions: Some(permissions.to_string()),
        owner,
        group,
        link_target,
        raw: Some(line.to_string()),
        facts: HashMap::new(),
    })
}

/// `Jan  1 12:00` (current year implied) or `Jan  1  2025`.
fn parse_unix_date(value: &str) -> Option<DateTime<Utc>> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 3 {
        return None;
    }

    if fields[2].contains(':') {
        let composed = format!(
            "{} {} {} {}",
            Utc::now().format("%Y"),
            fields[0],
            fields[1],
            fields[2]
        );
        return NaiveDateTime::parse_from_str(&composed, "%Y %b %d %H:%M")
            .ok()
            .map(|dt| Utc.from_utc_datetime(&dt));
    }

    let composed = format!("{} {} {}", fields[0], fields[1], fields[2]);
    NaiveDate::parse_from_str(&composed, "%b %d %Y")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Windows / IIS ───────────────────────────────────────────────────

fn windows_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^(\d{2}-\d{2}-\d{2})\s+         # date
            (\d{1,2}:\d{2}(?:AM|PM)?)\s+    # time
            (<DIR>|\d+)\s+                  # size or <DIR>
            (.+)$                           # name
            ",
        )
        .unwrap()
    })
}

fn parse_windows(line: &str) -> Option<FtpEntry> {
    let caps = windows_re().captures(line)?;

    let date = caps.get(1)?.as_str();
    let time = caps.get(2)?.as_str();
    let size_field = caps.get(3)?.as_str();
    let name = caps.get(4)?.as_str().to_string();

    let (kind, size) = if size_field == "<DIR>" {
        (FtpEntryKind::Directory, 0)
    } else {
        (FtpEntryKind::File, size_field.parse::<u64>().unwrap_or(0))
    };

    Some(FtpEntry {
        name,
        kind,
        size,
        modified: parse_windows_date(date, time),
        permissions: None,
        owner: None,
        group: None,
        link_target: None,
        raw: Some(line.to_string()),
        facts: HashMap::new(),
    })
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{} {}", date, time);
    for pattern in ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&combined, pattern) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_file() {
        let entries = parse_listing("-rw-r--r--   1 user group  1234 Jan  1 12:00 readme.txt");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "readme.txt");
        assert_eq!(entries[0].kind, FtpEntryKind::File);
        assert_eq!(entries[0].size, 1234);
        assert_eq!(entries[0].owner.as_deref(), Some("user"));
    }

    #[test]
    fn unix_directory() {
        let entries = parse_listing("drwxr-xr-x   2 root root  4096 Mar  1 09:30 subdir");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, FtpEntryKind::Directory);
    }

    #[test]
    fn unix_symlink_with_target() {
        let entries = parse_listing("lrwxrwxrwx   1 root root    22 Jan  5 08:00 link -> /var/target");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, FtpEntryKind::Symlink);
        assert_eq!(entries[0].name, "link");
        assert_eq!(entries[0].link_target.as_deref(), Some("/var/target"));
    }

    #[test]
    fn unix_year_form_date() {
        let entries = parse_listing("-rw-r--r--   1 user group  99 Jan  1  2025 old.txt");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].modified.is_some());
    }

    #[test]
    fn mlsd_fact_line() {
        let entries = parse_listing("type=file;size=1024;modify=20260101120000; example.bin");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "example.bin");
        assert_eq!(entries[0].kind, FtpEntryKind::File);
        assert_eq!(entries[0].size, 1024);
        assert!(entries[0].modified.is_some());
        assert_eq!(entries[0].facts.get("size").map(String::as_str), Some("1024"));
    }

    #[test]
    fn mlsd_name_with_spaces() {
        let entries = parse_listing("type=file;size=5; my file.txt");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "my file.txt");
    }

    #[test]
    fn filters_dot_entries() {
        let raw = "type=cdir;; .\ntype=pdir;; ..\ntype=file;size=10; real.txt";
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "real.txt");
    }

    #[test]
    fn windows_directory() {
        let entries = parse_listing("01-01-26  12:00AM      <DIR> My Documents");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, FtpEntryKind::Directory);
        assert_eq!(entries[0].name, "My Documents");
    }

    #[test]
    fn windows_file() {
        let entries = parse_listing("03-15-26  02:30PM       5120 report.pdf");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, FtpEntryKind::File);
        assert_eq!(entries[0].size, 5120);
    }

    #[test]
    fn unknown_line_becomes_raw_entry() {
        let entries = parse_listing("totally unparseable noise");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, FtpEntryKind::Unknown);
        assert!(entries[0].raw.is_some());
    }
}
