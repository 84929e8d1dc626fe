use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

// UTC с миллисекундами
struct CustomTime;

impl FormatTime for CustomTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// `RUST_LOG` имеет приоритет, иначе используется `level` из конфигурации
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

pub fn init_logging(level: &str) {
    // Имена потоков нужны: очереди у каждого воркера свои
    let result = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_timer(CustomTime)
        .with_ansi(true)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_does_not_panic() {
        init_logging("debug");
        init_logging("info");
    }

    #[test]
    fn custom_time_is_rfc3339_utc() {
        let mut out = String::new();
        CustomTime.format_time(&mut Writer::new(&mut out)).unwrap();
        assert!(out.ends_with('Z'));
        assert_eq!(out.len(), "2024-01-01T00:00:00.000Z".len());
    }
}
