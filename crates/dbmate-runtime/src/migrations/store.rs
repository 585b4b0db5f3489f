//! Migration file discovery, parsing and creation.
//!
//! Files are named `<version>_<name>.sql`, where the version is a string of
//! digits. Each file holds two sections introduced by marker comments:
//!
//! ```sql
//! -- migrate:up
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- migrate:down
//! DROP TABLE users;
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use dbmate_core::error::{DbmateError, Result};

/// Marker line opening the forward section.
pub const UP_MARKER: &str = "migrate:up";

/// Marker line opening the reverse section.
pub const DOWN_MARKER: &str = "migrate:down";

/// Timestamp layout of generated versions. Fixed width, so lexicographic and
/// chronological order agree.
pub const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

const TEMPLATE: &str = "-- migrate:up\n\n\n-- migrate:down\n\n";

/// A single migration reconstructed from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Sortable version, e.g. `20240131120000`.
    pub version: String,
    /// Name portion of the file name, without the version.
    pub name: String,
    /// SQL applied on the way up.
    pub up_sql: String,
    /// SQL applied on rollback.
    pub down_sql: String,
    /// File the migration was read from.
    pub file_name: String,
}

/// Raw contents of one migration file.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    pub file_name: String,
    pub contents: String,
}

impl MigrationSource {
    pub fn new(file_name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            contents: contents.into(),
        }
    }
}

/// Load all migrations from a directory, ascending by version.
///
/// Only `*.sql` files are considered. The directory must exist.
pub fn scan(dir: &Path) -> Result<Vec<Migration>> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("could not find migrations directory {}", dir.display()),
        )
        .into());
    }

    let mut sources = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map(|e| e != "sql").unwrap_or(true) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            return Err(DbmateError::malformed(
                path.display().to_string(),
                "file name is not valid UTF-8",
            ));
        };
        let contents = fs::read_to_string(&path)?;
        sources.push(MigrationSource::new(file_name, contents));
    }

    let migrations = migrations_from_snapshot(sources)?;
    debug!("Loaded {} migrations from {:?}", migrations.len(), dir);
    Ok(migrations)
}

/// Parse a snapshot of migration files into an ordered migration list.
///
/// The result is sorted by version regardless of input order. Every file is
/// validated, and duplicate versions are rejected.
pub fn migrations_from_snapshot(sources: Vec<MigrationSource>) -> Result<Vec<Migration>> {
    let mut migrations = sources
        .iter()
        .map(|source| parse_migration(&source.file_name, &source.contents))
        .collect::<Result<Vec<_>>>()?;

    migrations.sort_by(|a, b| a.version.cmp(&b.version));

    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(DbmateError::malformed(
            pair[1].file_name.clone(),
            format!(
                "version {} is also used by {}",
                pair[1].version, pair[0].file_name
            ),
        ));
    }

    Ok(migrations)
}

/// Build a [`Migration`] from a file name and its contents.
pub fn parse_migration(file_name: &str, contents: &str) -> Result<Migration> {
    let (version, name) = parse_file_name(file_name)?;
    let (up_sql, down_sql) = parse_sections(file_name, contents)?;
    Ok(Migration {
        version,
        name,
        up_sql,
        down_sql,
        file_name: file_name.to_string(),
    })
}

/// Split `<version>_<name>.sql` into its version and name.
pub fn parse_file_name(file_name: &str) -> Result<(String, String)> {
    let stem = file_name
        .strip_suffix(".sql")
        .ok_or_else(|| DbmateError::malformed(file_name, "expected a .sql extension"))?;

    let (version, name) = stem.split_once('_').unwrap_or((stem, ""));
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DbmateError::malformed(
            file_name,
            "file name must start with a numeric version",
        ));
    }

    Ok((version.to_string(), name.to_string()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

enum Marker {
    Up,
    Down,
}

/// Which marker, if any, a line carries.
fn marker(line: &str) -> Option<Marker> {
    let comment = line.trim().strip_prefix("--")?.trim();
    match comment {
        UP_MARKER => Some(Marker::Up),
        DOWN_MARKER => Some(Marker::Down),
        _ => None,
    }
}

/// Split file contents into `(up_sql, down_sql)`.
///
/// Both markers must appear exactly once, up before down. Only blank lines
/// and comments may precede the up marker.
pub fn parse_sections(file_name: &str, contents: &str) -> Result<(String, String)> {
    let mut section = Section::Preamble;
    let mut seen_up = false;
    let mut seen_down = false;
    let mut up = Vec::new();
    let mut down = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        match marker(line) {
            Some(Marker::Up) => {
                if seen_up {
                    return Err(DbmateError::malformed(
                        file_name,
                        format!("duplicate '-- {}' marker on line {}", UP_MARKER, index + 1),
                    ));
                }
                if seen_down {
                    return Err(DbmateError::malformed(
                        file_name,
                        format!("'-- {}' must come before '-- {}'", UP_MARKER, DOWN_MARKER),
                    ));
                }
                seen_up = true;
                section = Section::Up;
            }
            Some(Marker::Down) => {
                if seen_down {
                    return Err(DbmateError::malformed(
                        file_name,
                        format!("duplicate '-- {}' marker on line {}", DOWN_MARKER, index + 1),
                    ));
                }
                if !seen_up {
                    return Err(DbmateError::malformed(
                        file_name,
                        format!("'-- {}' must come before '-- {}'", UP_MARKER, DOWN_MARKER),
                    ));
                }
                seen_down = true;
                section = Section::Down;
            }
            None => match section {
                Section::Preamble => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() && !trimmed.starts_with("--") {
                        return Err(DbmateError::malformed(
                            file_name,
                            format!("SQL on line {} precedes '-- {}'", index + 1, UP_MARKER),
                        ));
                    }
                }
                Section::Up => up.push(line),
                Section::Down => down.push(line),
            },
        }
    }

    if !seen_up {
        return Err(DbmateError::malformed(
            file_name,
            format!("missing '-- {}' marker", UP_MARKER),
        ));
    }
    if !seen_down {
        return Err(DbmateError::malformed(
            file_name,
            format!("missing '-- {}' marker", DOWN_MARKER),
        ));
    }

    Ok((
        up.join("\n").trim().to_string(),
        down.join("\n").trim().to_string(),
    ))
}

/// Normalize a migration name into a file-name slug.
///
/// ASCII letters and digits are kept (lowercased); every other run of
/// characters becomes a single underscore.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    slug
}

/// Write a new, empty migration stamped with the current UTC time.
pub fn create_new(dir: &Path, name: &str) -> Result<PathBuf> {
    create_new_at(dir, name, Utc::now())
}

/// Write a new, empty migration stamped with `now`.
///
/// Fails if a file with the same version and name already exists.
pub fn create_new_at(dir: &Path, name: &str, now: DateTime<Utc>) -> Result<PathBuf> {
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(DbmateError::Config(
            "Migration name must contain at least one letter or digit".to_string(),
        ));
    }

    fs::create_dir_all(dir)?;

    let version = now.format(VERSION_FORMAT).to_string();
    let path = dir.join(format!("{}_{}.sql", version, slug));

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    file.write_all(TEMPLATE.as_bytes())?;

    debug!("Created migration file {:?}", path);
    Ok(path)
}
