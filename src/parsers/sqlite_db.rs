use rusqlite::Connection;

use crate::extract::database::open_immutable;
use crate::parsers::browser::{
    ArtifactKind, Browser, BrowserArtifact, SocialDetail, SocialRecord, cookie_host, matches_any, url_host,
};

/// Read a browser database and keep the rows whose host belongs to one of
/// `domains`. The database is opened immutable, so journals and WAL files
/// next to it are neither replayed nor created.
pub fn extract_social_records(artifact: &BrowserArtifact, domains: &[String]) -> rusqlite::Result<Vec<SocialRecord>> {
    let conn = open_immutable(&artifact.path)?;
    match (artifact.kind, artifact.browser) {
        (ArtifactKind::History, Browser::Firefox) => firefox_history(&conn, artifact, domains),
        (ArtifactKind::History, Browser::Safari) => safari_history(&conn, artifact, domains),
        (ArtifactKind::History, _) => chromium_history(&conn, artifact, domains),
        (ArtifactKind::Cookies, Browser::Firefox) => cookies(&conn, artifact, domains, "moz_cookies", "host"),
        (ArtifactKind::Cookies, Browser::Safari) => Ok(Vec::new()),
        (ArtifactKind::Cookies, _) => cookies(&conn, artifact, domains, "cookies", "host_key"),
    }
}

fn history_record(
    artifact: &BrowserArtifact,
    domains: &[String],
    url: String,
    title: Option<String>,
    visit_count: Option<i64>,
    last_visit_time: Option<chrono::NaiveDateTime>,
) -> Option<SocialRecord> {
    let host = url_host(&url)?;
    if !matches_any(&host, domains) {
        return None;
    }
    Some(SocialRecord {
        browser: artifact.browser,
        partition: artifact.partition.clone(),
        source_file: artifact.path.clone(),
        host,
        detail: SocialDetail::History {
            url,
            title,
            visit_count,
            last_visit_time,
        },
    })
}

fn chromium_history(
    conn: &Connection,
    artifact: &BrowserArtifact,
    domains: &[String],
) -> rusqlite::Result<Vec<SocialRecord>> {
    let mut out = Vec::new();
    let mut stmt = conn.prepare("SELECT url, title, visit_count, last_visit_time FROM urls")?;
    let rows = stmt.query_map([], |row| {
        let url: String = row.get(0)?;
        let title: Option<String> = row.get(1)?;
        let visit_count: Option<i64> = row.get(2)?;
        let last_visit_time: Option<i64> = row.get(3)?;
        Ok((url, title, visit_count, last_visit_time))
    })?;

    for row in rows {
        let (url, title, visit_count, last_visit_time) = row?;
        let visit_time = last_visit_time.and_then(webkit_timestamp_to_datetime);
        out.extend(history_record(artifact, domains, url, title, visit_count, visit_time));
    }

    Ok(out)
}

fn firefox_history(
    conn: &Connection,
    artifact: &BrowserArtifact,
    domains: &[String],
) -> rusqlite::Result<Vec<SocialRecord>> {
    let mut out = Vec::new();
    let mut stmt = conn.prepare("SELECT url, title, visit_count, last_visit_date FROM moz_places")?;
    let rows = stmt.query_map([], |row| {
        let url: String = row.get(0)?;
        let title: Option<String> = row.get(1)?;
        let visit_count: Option<i64> = row.get(2)?;
        let last_visit_date: Option<i64> = row.get(3)?;
        Ok((url, title, visit_count, last_visit_date))
    })?;

    for row in rows {
        let (url, title, visit_count, last_visit_date) = row?;
        let visit_time = last_visit_date.and_then(unix_micro_to_datetime);
        out.extend(history_record(artifact, domains, url, title, visit_count, visit_time));
    }

    Ok(out)
}

fn safari_history(
    conn: &Connection,
    artifact: &BrowserArtifact,
    domains: &[String],
) -> rusqlite::Result<Vec<SocialRecord>> {
    let mut out = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT history_items.url, MAX(history_visits.title), history_items.visit_count, MAX(history_visits.visit_time) \
         FROM history_items LEFT JOIN history_visits ON history_visits.history_item = history_items.id \
         GROUP BY history_items.id",
    )?;
    let rows = stmt.query_map([], |row| {
        let url: String = row.get(0)?;
        let title: Option<String> = row.get(1)?;
        let visit_count: Option<i64> = row.get(2)?;
        let visit_time: Option<f64> = row.get(3)?;
        Ok((url, title, visit_count, visit_time))
    })?;

    for row in rows {
        let (url, title, visit_count, visit_time) = row?;
        let visit_time = visit_time.and_then(mac_absolute_to_datetime);
        out.extend(history_record(artifact, domains, url, title, visit_count, visit_time));
    }

    Ok(out)
}

fn cookies(
    conn: &Connection,
    artifact: &BrowserArtifact,
    domains: &[String],
    table: &str,
    host_column: &str,
) -> rusqlite::Result<Vec<SocialRecord>> {
    let mut out = Vec::new();
    let mut stmt = conn.prepare(&format!("SELECT {host_column}, name, value FROM {table}"))?;
    let rows = stmt.query_map([], |row| {
        let host_key: String = row.get(0)?;
        let name: Option<String> = row.get(1)?;
        let value: Option<String> = row.get(2)?;
        Ok((host_key, name, value))
    })?;

    for row in rows {
        let (host_key, name, value) = row?;
        let host = cookie_host(&host_key);
        if !matches_any(&host, domains) {
            continue;
        }
        out.push(SocialRecord {
            browser: artifact.browser,
            partition: artifact.partition.clone(),
            source_file: artifact.path.clone(),
            host,
            detail: SocialDetail::Cookie {
                name: name.unwrap_or_default(),
                value: value.unwrap_or_default(),
            },
        });
    }

    Ok(out)
}

fn webkit_timestamp_to_datetime(microseconds: i64) -> Option<chrono::NaiveDateTime> {
    if microseconds <= 0 {
        return None;
    }
    let unix_offset_seconds = 11_644_473_600i64;
    let secs = microseconds / 1_000_000 - unix_offset_seconds;
    if secs < 0 {
        return None;
    }
    let nsecs = ((microseconds % 1_000_000).abs() as u32) * 1000;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nsecs).map(|dt| dt.naive_utc())
}

fn unix_micro_to_datetime(microseconds: i64) -> Option<chrono::NaiveDateTime> {
    if microseconds <= 0 {
        return None;
    }
    let secs = microseconds / 1_000_000;
    let nsecs = ((microseconds % 1_000_000).abs() as u32) * 1000;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nsecs).map(|dt| dt.naive_utc())
}

/// Seconds since 2001-01-01 UTC.
fn mac_absolute_to_datetime(seconds: f64) -> Option<chrono::NaiveDateTime> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    let mac_epoch_offset = 978_307_200i64;
    let secs = seconds.trunc() as i64 + mac_epoch_offset;
    let nsecs = (seconds.fract() * 1e9) as u32;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nsecs).map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn domains() -> Vec<String> {
        vec!["facebook.com".to_string(), "reddit.com".to_string()]
    }

    fn artifact(path: &Path, browser: Browser, kind: ArtifactKind) -> BrowserArtifact {
        BrowserArtifact {
            path: path.to_path_buf(),
            browser,
            kind,
            partition: "loop0p1".to_string(),
        }
    }

    #[test]
    fn keeps_social_chrome_history() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("History");
        let conn = Connection::open(&path).expect("conn");
        conn.execute(
            "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT, title TEXT, visit_count INTEGER, last_visit_time INTEGER)",
            [],
        )
        .expect("create");
        conn.execute(
            "INSERT INTO urls (url, title, visit_count, last_visit_time) VALUES (?1, ?2, 3, ?3)",
            ("https://www.facebook.com/jane", "Jane", 13_303_449_600_000_000i64),
        )
        .expect("insert");
        conn.execute(
            "INSERT INTO urls (url, title, visit_count, last_visit_time) VALUES ('https://example.com', 'Example', 1, 0)",
            [],
        )
        .expect("insert");
        drop(conn);

        let records =
            extract_social_records(&artifact(&path, Browser::Chrome, ArtifactKind::History), &domains()).expect("history");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].host, "www.facebook.com");
        match &records[0].detail {
            SocialDetail::History { visit_count, last_visit_time, .. } => {
                assert_eq!(*visit_count, Some(3));
                assert!(last_visit_time.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keeps_social_firefox_cookies() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cookies.sqlite");
        let conn = Connection::open(&path).expect("conn");
        conn.execute(
            "CREATE TABLE moz_cookies (id INTEGER PRIMARY KEY, host TEXT, name TEXT, value TEXT)",
            [],
        )
        .expect("create");
        conn.execute(
            "INSERT INTO moz_cookies (host, name, value) VALUES ('.reddit.com', 'session', 'abc'), ('.example.org', 'x', 'y')",
            [],
        )
        .expect("insert");
        drop(conn);

        let records =
            extract_social_records(&artifact(&path, Browser::Firefox, ArtifactKind::Cookies), &domains()).expect("cookies");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].host, "reddit.com");
        assert_eq!(
            records[0].detail,
            SocialDetail::Cookie {
                name: "session".to_string(),
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn safari_history_joins_visits() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("History.db");
        let conn = Connection::open(&path).expect("conn");
        conn.execute_batch(
            "CREATE TABLE history_items (id INTEGER PRIMARY KEY, url TEXT, visit_count INTEGER);
             CREATE TABLE history_visits (id INTEGER PRIMARY KEY, history_item INTEGER, visit_time REAL, title TEXT);
             INSERT INTO history_items (id, url, visit_count) VALUES (1, 'https://facebook.com/', 2);
             INSERT INTO history_visits (history_item, visit_time, title) VALUES (1, 700000000.5, 'Facebook');",
        )
        .expect("schema");
        drop(conn);

        let records =
            extract_social_records(&artifact(&path, Browser::Safari, ArtifactKind::History), &domains()).expect("history");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].browser, Browser::Safari);
    }

    #[test]
    fn missing_tables_are_errors() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("History");
        let conn = Connection::open(&path).expect("conn");
        conn.execute("CREATE TABLE other (x TEXT)", []).expect("create");
        drop(conn);
        assert!(extract_social_records(&artifact(&path, Browser::Chrome, ArtifactKind::History), &domains()).is_err());
    }
}
