use crate::config::{ProjectDirsExt, SIMSFORGE_DIRECTORY};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use tokio::fs;

const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_NAME: &str = "simsforge.log";
const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} | {({l}):5.5} | {m}{n}";
const CONSOLE_LOG_PATTERN: &str = "{d(%H:%M:%S)} | {h({l}):5.5} | {m}{n}";
const LOG_FILE_SIZE_LIMIT_MB: u64 = 10;
const LOG_FILE_BACKUP_COUNT: u32 = 5;

/// Initializes the logging system: a rolling file appender under the data
/// root plus a console appender.
pub async fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = SIMSFORGE_DIRECTORY.root_dir().join(LOG_DIR_NAME);

    if !log_dir.exists() {
        fs::create_dir_all(&log_dir).await?;
    }

    let log_file_path = log_dir.join(LOG_FILE_NAME);

    let size_trigger = SizeTrigger::new(LOG_FILE_SIZE_LIMIT_MB * 1024 * 1024);
    let roller_pattern = log_dir.join(format!("{}.{{}}", LOG_FILE_NAME));
    let roller = FixedWindowRoller::builder()
        .base(1)
        .build(roller_pattern.to_str().unwrap(), LOG_FILE_BACKUP_COUNT)?;
    let compound_policy = CompoundPolicy::new(Box::new(size_trigger), Box::new(roller));

    let file_appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build(log_file_path, Box::new(compound_policy))?;

    let console_appender = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_LOG_PATTERN)))
        .target(Target::Stderr)
        .build();

    let console_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .appender(
            Appender::builder()
                .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
                    console_level,
                )))
                .build("stderr", Box::new(console_appender)),
        )
        .build(
            Root::builder()
                .appender("file")
                .appender("stderr")
                .build(LevelFilter::Debug),
        )?;

    log4rs::init_config(config)?;

    log::info!("Logging initialized. Log directory: {}", log_dir.display());

    Ok(())
}
