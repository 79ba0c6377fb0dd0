//! Loading SQL schema modules from a directory.
//!
//! Each module is one file named `<rank>_<name>.sql`:
//!
//! ```text
//! modules/
//! ├── 000_identity.sql
//! ├── 010_billing.sql
//! └── 020_projects.sql     -- requires: users
//! ```
//!
//! Leading `-- requires: a, b` comment lines fill `required_after`.

use std::path::{Path, PathBuf};

use regex_lite::Regex;
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};
use crate::module::SqlModule;
use crate::registry::{SchemaRegistry, SchemaRegistryBuilder};

/// A directory of `<rank>_<name>.sql` module files.
#[derive(Debug, Clone)]
pub struct ModuleDirectory {
    dir: PathBuf,
}

impl ModuleDirectory {
    /// Point at a module directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Read every module file, sorted by file name.
    pub async fn load(&self) -> SchemaResult<Vec<SqlModule>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        let pattern = file_name_pattern()?;
        let mut modules = Vec::with_capacity(paths.len());
        for path in paths {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| SchemaError::invalid_module(format!("invalid path {}", path.display())))?;
            let (rank, name) = parse_file_name(&pattern, file_name)?;
            let content = tokio::fs::read_to_string(&path).await?;
            let module = parse_module(name, rank, &content);
            debug!(module = %name, rank, statements = module.sql().len(), "Loaded schema module file");
            modules.push(module);
        }
        Ok(modules)
    }

    /// Load the directory into a registry builder.
    pub async fn builder(&self) -> SchemaResult<SchemaRegistryBuilder> {
        Ok(SchemaRegistry::builder().extend_sql(self.load().await?))
    }

    /// Load the directory straight into a registry.
    pub async fn registry(&self) -> SchemaResult<SchemaRegistry> {
        self.builder().await?.build()
    }
}

fn file_name_pattern() -> SchemaResult<Regex> {
    Regex::new(r"^(\d+)_([A-Za-z0-9_]+)\.sql$")
        .map_err(|e| SchemaError::invalid_module(format!("module file pattern: {e}")))
}

fn parse_file_name<'a>(pattern: &Regex, file_name: &'a str) -> SchemaResult<(i32, &'a str)> {
    let caps = pattern.captures(file_name).ok_or_else(|| {
        SchemaError::invalid_module(format!(
            "'{file_name}' does not match <rank>_<name>.sql"
        ))
    })?;
    let rank = caps
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse::<i32>()
        .map_err(|e| SchemaError::invalid_module(format!("bad rank in '{file_name}': {e}")))?;
    let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    Ok((rank, name))
}

/// Build a module from file content.
pub fn parse_module(name: &str, rank: i32, content: &str) -> SqlModule {
    let mut module = SqlModule::new(name, rank);

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(comment) = line.strip_prefix("--") else {
            break;
        };
        if let Some(list) = comment.trim().strip_prefix("requires:") {
            for relation in list.split(',').map(str::trim).filter(|r| !r.is_empty()) {
                module = module.requires(relation);
            }
        }
    }

    module.statements(split_statements(content))
}

/// Split a SQL script on top-level `;`.
///
/// Semicolons inside string literals, quoted identifiers, comments and
/// dollar-quoted bodies do not split. Comments before a statement are not
/// part of it, and chunks that hold only comments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut code_start: Option<usize> = None;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                let quote = bytes[i];
                code_start.get_or_insert(i);
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // Doubled quote is an escape.
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            b'$' => {
                code_start.get_or_insert(i);
                match dollar_tag(&sql[i..]) {
                    Some(tag) => {
                        let body_start = i + tag.len();
                        i = match sql[body_start..].find(tag) {
                            Some(end) => body_start + end + tag.len(),
                            None => bytes.len(),
                        };
                    }
                    None => i += 1,
                }
            }
            b';' => {
                if let Some(start) = code_start.take() {
                    statements.push(sql[start..i].trim().to_string());
                }
                i += 1;
            }
            c => {
                if !c.is_ascii_whitespace() {
                    code_start.get_or_insert(i);
                }
                i += 1;
            }
        }
    }

    if let Some(start) = code_start {
        let tail = sql[start..].trim();
        if !tail.is_empty() {
            statements.push(tail.to_string());
        }
    }
    statements
}

/// Match a dollar-quote opener such as `$$` or `$body$` at the start of `s`.
fn dollar_tag(s: &str) -> Option<&str> {
    let rest = &s[1..];
    let end = rest.find('$')?;
    let tag = &rest[..end];
    if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !tag.starts_with(|c: char| c.is_ascii_digit())
    {
        Some(&s[..end + 2])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::SchemaModule;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_simple() {
        let stmts = split_statements(
            "CREATE TABLE IF NOT EXISTS a (id INT);\nCREATE TABLE IF NOT EXISTS b (id INT);\n",
        );
        assert_eq!(
            stmts,
            vec![
                "CREATE TABLE IF NOT EXISTS a (id INT)",
                "CREATE TABLE IF NOT EXISTS b (id INT)",
            ]
        );
    }

    #[test]
    fn test_split_respects_dollar_quotes_and_strings() {
        let sql = r#"
            CREATE OR REPLACE FUNCTION touch() RETURNS TRIGGER AS $fn$
            BEGIN NEW.updated_at = NOW(); RETURN NEW; END;
            $fn$ LANGUAGE plpgsql;
            INSERT INTO notes (body) VALUES ('a; b') ON CONFLICT DO NOTHING;
            DO $$ BEGIN PERFORM 1; END $$;
        "#;
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].ends_with("LANGUAGE plpgsql"));
        assert!(stmts[1].contains("'a; b'"));
        assert!(stmts[2].starts_with("DO $$"));
    }

    #[test]
    fn test_split_drops_comment_only_chunks() {
        let stmts = split_statements("-- header; still header\n;\n/* a; b */ SELECT 1;");
        assert_eq!(stmts, vec!["SELECT 1"]);
    }

    #[test]
    fn test_parse_module_reads_requires_header() {
        let module = parse_module(
            "projects",
            20,
            "-- requires: users, tenants\n-- owner: pm team\nCREATE TABLE IF NOT EXISTS projects (id INT);",
        );
        assert_eq!(module.required_after(), ["users".to_string(), "tenants".to_string()]);
        assert_eq!(module.sql(), ["CREATE TABLE IF NOT EXISTS projects (id INT)".to_string()]);
        assert!(module.lint().is_empty());
    }

    #[test]
    fn test_parse_file_name() {
        let pattern = file_name_pattern().unwrap();
        assert_eq!(parse_file_name(&pattern, "010_billing.sql").unwrap(), (10, "billing"));
        assert!(parse_file_name(&pattern, "billing.sql").is_err());
        assert!(parse_file_name(&pattern, "010-billing.sql").is_err());
    }

    #[tokio::test]
    async fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("010_billing.sql"),
            "CREATE TABLE IF NOT EXISTS invoices (id INT);",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("000_identity.sql"),
            "CREATE TABLE IF NOT EXISTS users (id INT);\nCREATE TABLE IF NOT EXISTS tenants (id INT);",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let registry = ModuleDirectory::new(dir.path()).registry().await.unwrap();

        assert_eq!(registry.names(), vec!["identity", "billing"]);
        assert_eq!(registry.get("billing").map(|m| m.rank()), Some(10));
    }

    #[tokio::test]
    async fn test_load_rejects_bad_file_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("billing.sql"), "SELECT 1;").unwrap();

        let err = ModuleDirectory::new(dir.path()).load().await.unwrap_err();
        assert!(matches!(err, SchemaError::InvalidModule(_)));
    }
}
