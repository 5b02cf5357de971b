use anyhow::Result;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.trim().to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Clean up old log files, keeping only the most recent one
    cleanup_old_logs(log_dir)?;

    let log_file_name = format!("tempest_live_{}.log", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        // Handshake and TLS chatter from the transport stack
        .level_for("tungstenite", log::LevelFilter::Warn)
        .level_for("tokio_tungstenite", log::LevelFilter::Warn)
        .level_for("rustls", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .collect();

    // Newest first
    entries.sort_by_key(|(modified, _)| std::cmp::Reverse(*modified));

    for (_, path) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to delete old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_level("error"), log::LevelFilter::Error);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Info);
        assert_eq!(parse_level(""), log::LevelFilter::Info);
    }

    #[test]
    fn test_cleanup_keeps_only_newest_log() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("tempest_live_old.log");
        let new = dir.path().join("tempest_live_new.log");
        let other = dir.path().join("notes.txt");

        fs::write(&old, "old").unwrap();
        fs::write(&other, "keep").unwrap();
        // Coarse filesystems only record whole seconds.
        std::thread::sleep(Duration::from_millis(1100));
        fs::write(&new, "new").unwrap();

        cleanup_old_logs(dir.path()).unwrap();

        assert!(!old.exists());
        assert!(new.exists());
        assert!(other.exists());
    }
}
