use std::fs;
use std::path::Path;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the worker's subscriber.
///
/// `log_config` names a file holding one `EnvFilter` directive. When it is
/// absent, unreadable or invalid the filter comes from `RUST_LOG`, defaulting
/// to `info`.
pub fn init_tracing(log_config: Option<&Path>) {
    let filter = log_config.and_then(filter_from_file).unwrap_or_else(|| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    });
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn filter_from_file(path: &Path) -> Option<EnvFilter> {
    let directive = read_directive(path)?;
    match EnvFilter::try_new(&directive) {
        Ok(filter) => Some(filter),
        Err(err) => {
            eprintln!("ignoring log config {}: {err}", path.display());
            None
        }
    }
}

fn read_directive(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let directive = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join(",");
    (!directive.is_empty()).then_some(directive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn directive_lines_are_joined_and_comments_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("worker-log.filter");
        fs::write(&path, "# verbose worker\nwarn\n\nconductor_worker=debug\n").expect("write");

        assert_eq!(
            read_directive(&path).as_deref(),
            Some("warn,conductor_worker=debug")
        );
        assert!(filter_from_file(&path).is_some());
    }

    #[test]
    fn missing_or_blank_file_yields_nothing() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(read_directive(&dir.path().join("absent")), None);

        let blank = dir.path().join("blank");
        fs::write(&blank, "  \n# only a comment\n").expect("write");
        assert_eq!(read_directive(&blank), None);
    }
}
