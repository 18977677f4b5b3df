use tracing::level_filters::LevelFilter;

/// Client verbosity. Each `-v` moves one step to the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warning,
    Normal,
    Info,
    Debug,
}

impl LogLevel {
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Warning,
            1 => LogLevel::Normal,
            2 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Normal => LevelFilter::INFO,
            LogLevel::Info => LevelFilter::DEBUG,
            LogLevel::Debug => LevelFilter::TRACE,
        }
    }
}

/// Installs the stderr subscriber. Repeated calls keep the first one.
pub fn init(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level.filter())
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .try_init();
}

/// Operator-facing output on stdout. Not subject to the log filter.
#[macro_export]
macro_rules! notice {
    ($($arg:tt)*) => {
        println!($($arg)*)
    };
}
